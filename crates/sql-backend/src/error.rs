use ldap3_proto::LdapResultCode;
use ldsql_domain::error::LdapError;
use ldsql_schema::{DescriptionError, SchemaViolation};
use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Database error: `{0}`")]
    DatabaseError(#[from] sea_orm::DbErr),
    #[error("Entry not found: `{0}`")]
    EntryNotFound(String),
    #[error("Unknown object class: `{0}`")]
    UnknownObjectClass(String),
    #[error("Constraint violation: `{0}`")]
    ConstraintViolation(String),
    #[error("Invalid value returned by the database: `{0}`")]
    InvalidBackendValue(String),
    #[error("Unchecked limit exceeded")]
    AdminLimitExceeded,
    #[error(transparent)]
    Description(#[from] DescriptionError),
    #[error("Schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Internal error: `{0}`")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for LdapError {
    fn from(error: BackendError) -> Self {
        match error {
            // Native diagnostics stay in the logs.
            BackendError::DatabaseError(_) | BackendError::InvalidBackendValue(_) => {
                LdapError::new(LdapResultCode::Other, "SQL-backend error")
            }
            BackendError::EntryNotFound(dn) => {
                LdapError::new(LdapResultCode::NoSuchObject, format!("No such object: {dn}"))
            }
            BackendError::UnknownObjectClass(_) | BackendError::SchemaViolation(_) => {
                LdapError::new(LdapResultCode::ObjectClassViolation, error.to_string())
            }
            BackendError::ConstraintViolation(_) => {
                LdapError::new(LdapResultCode::ConstraintViolation, error.to_string())
            }
            BackendError::AdminLimitExceeded => {
                LdapError::new(LdapResultCode::AdminLimitExceeded, error.to_string())
            }
            BackendError::Description(e) => {
                LdapError::new(LdapResultCode::UndefinedAttributeType, e.to_string())
            }
            BackendError::InternalError(_) | BackendError::InvalidConfiguration(_) => {
                LdapError::new(LdapResultCode::OperationsError, "Internal error")
            }
        }
    }
}
