use tracing_subscriber::prelude::*;

use crate::configuration::SqlBackendConfiguration;

pub fn init(config: &SqlBackendConfiguration) -> anyhow::Result<()> {
    let max_log_level = log_level_from_config(config);
    let sqlx_max_log_level = sqlx_log_level_from_config(config);
    let filter = tracing_subscriber::filter::Targets::new()
        .with_target("ldsql_sql_backend", max_log_level)
        .with_target("ldsql_domain", max_log_level)
        .with_target("ldsql_schema", max_log_level)
        .with_target("sqlx", sqlx_max_log_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .try_init()?;
    Ok(())
}

fn log_level_from_config(config: &SqlBackendConfiguration) -> tracing::Level {
    if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    }
}

fn sqlx_log_level_from_config(config: &SqlBackendConfiguration) -> tracing::Level {
    if config.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    }
}

#[cfg(test)]
pub fn init_for_tests() {
    if let Err(e) = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
    {
        log::warn!("Could not set up test logging: {:#}", e);
    }
}
