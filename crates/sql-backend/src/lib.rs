pub mod backend;
pub mod configuration;
pub mod database_string;
pub mod entry_id;
pub mod error;
pub mod logging;
pub mod queries;
pub mod schema_map;
pub mod search;
pub mod sql_tables;
pub mod sql_wrap;
mod write;

#[cfg(test)]
mod test_utils;

pub use backend::{BackendInfo, Collaborators, SqlBackend};
pub use configuration::{SqlBackendConfiguration, SqlBackendConfigurationBuilder};
pub use error::BackendError;
pub use search::ResultSink;
pub use sql_tables::{connect, init_catalog};
