use std::sync::Arc;

use ldsql_domain::{
    dn::{parse_rdn, rdn},
    AccessControl, AddRequest, AllowAll, DefaultRdnDiff, DeleteRequest, DnNormalizer, Entry,
    FilterEvaluator, LdapDnNormalizer, LdapResult, ModifyDnRequest, ModifyRequest,
    OperationResult, RdnDiff, SchemaFilterEvaluator, SearchRequest,
};
use ldsql_schema::{names, Schema};
use tracing::{debug, info, instrument, warn};

use crate::{
    configuration::SqlBackendConfiguration,
    error::{BackendError, Result},
    queries::SqlQueries,
    schema_map::SchemaMap,
    search::ResultSink,
    sql_wrap::{SqlConnection, SqlTransaction},
};

/// The services the backend relies on but does not implement.
#[derive(Clone)]
pub struct Collaborators {
    pub normalizer: Arc<dyn DnNormalizer>,
    pub evaluator: Arc<dyn FilterEvaluator>,
    pub access: Arc<dyn AccessControl>,
    pub rdn_diff: Arc<dyn RdnDiff>,
}

impl Collaborators {
    pub fn with_defaults(schema: &Arc<Schema>) -> Self {
        Self {
            normalizer: Arc::new(LdapDnNormalizer::new(schema.clone())),
            evaluator: Arc::new(SchemaFilterEvaluator::new(schema.clone())),
            access: Arc::new(AllowAll),
            rdn_diff: Arc::new(DefaultRdnDiff),
        }
    }

    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn FilterEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }
}

/// Everything an operation needs besides its connection. Immutable once the
/// backend is open.
pub struct BackendInfo {
    pub(crate) config: SqlBackendConfiguration,
    pub(crate) queries: SqlQueries,
    pub(crate) schema: Arc<Schema>,
    pub(crate) schema_map: SchemaMap,
    pub(crate) suffix_dn: String,
    pub(crate) suffix_ndn: String,
    /// The synthetic suffix entry, when the suffix is not stored.
    pub(crate) base_entry: Option<Entry>,
    pub(crate) collaborators: Collaborators,
}

impl BackendInfo {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn schema_map(&self) -> &SchemaMap {
        &self.schema_map
    }

    pub fn suffix(&self) -> &str {
        &self.suffix_dn
    }
}

fn build_base_entry(schema: &Schema, suffix_dn: &str, suffix_ndn: &str) -> Result<Entry> {
    let mut entry = Entry::new(suffix_dn, suffix_ndn);
    entry.add_values(
        schema.resolve(names::OBJECT_CLASS)?,
        [names::TOP.to_owned(), names::EXTENSIBLE_OBJECT.to_owned()],
    );
    let avas = parse_rdn(rdn(suffix_dn))
        .map_err(|e| BackendError::InvalidConfiguration(format!("suffix: {e}")))?;
    for (attribute, value) in avas {
        entry.add_values(schema.resolve(&attribute)?, [value]);
    }
    Ok(entry)
}

/// Commits when `result` is a success of a real request; rolls back
/// otherwise.
pub(crate) async fn finish<T: SqlTransaction>(
    transaction: T,
    result: LdapResult<()>,
    noop: bool,
) -> LdapResult<()> {
    match result {
        Ok(()) if !noop => {
            transaction.commit().await.map_err(BackendError::from)?;
            Ok(())
        }
        Ok(()) => {
            debug!("No-op request, rolling back");
            transaction.rollback().await.map_err(BackendError::from)?;
            Ok(())
        }
        Err(e) => {
            debug!("Rolling back: {}", e);
            if let Err(rollback_error) = transaction.rollback().await {
                warn!("Rollback failed: {}", rollback_error);
            }
            Err(e)
        }
    }
}

/// An LDAP naming context stored in a relational database.
pub struct SqlBackend<C: SqlConnection> {
    connection: C,
    info: BackendInfo,
}

impl<C: SqlConnection> SqlBackend<C> {
    /// Loads the mapping catalog. Fails if any mapping refers to something
    /// the schema does not define.
    #[instrument(skip_all, level = "debug", fields(suffix = %config.suffix))]
    pub async fn open(
        config: SqlBackendConfiguration,
        connection: C,
        schema: Arc<Schema>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let queries = SqlQueries::new(&config);
        let (suffix_dn, suffix_ndn) = collaborators
            .normalizer
            .pretty_normalize(&config.suffix)
            .map_err(|e| BackendError::InvalidConfiguration(format!("suffix: {e}")))?;
        let schema_map = SchemaMap::load(&connection, &schema, &queries).await?;
        let base_entry = if config.base_object {
            Some(build_base_entry(&schema, &suffix_dn, &suffix_ndn)?)
        } else {
            None
        };
        info!(
            "SQL backend open for `{}` with {} object class mappings",
            suffix_dn,
            schema_map.len()
        );
        Ok(Self {
            connection,
            info: BackendInfo {
                config,
                queries,
                schema,
                schema_map,
                suffix_dn,
                suffix_ndn,
                base_entry,
                collaborators,
            },
        })
    }

    /// Reloads the mapping catalog. The current mappings stay in place if
    /// the load fails.
    pub async fn reload_schema_map(&mut self) -> Result<()> {
        let schema_map =
            SchemaMap::load(&self.connection, &self.info.schema, &self.info.queries).await?;
        self.info.schema_map = schema_map;
        Ok(())
    }

    pub fn info(&self) -> &BackendInfo {
        &self.info
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub async fn search<S: ResultSink>(
        &self,
        request: &SearchRequest,
        sink: &mut S,
    ) -> OperationResult {
        self.info
            .search(&self.connection, request, sink)
            .await
            .into()
    }

    pub async fn add(&self, request: AddRequest) -> OperationResult {
        let result = match self.connection.begin().await {
            Ok(transaction) => {
                let result = self.info.add(&transaction, &request).await;
                finish(transaction, result, request.noop).await
            }
            Err(e) => Err(BackendError::from(e).into()),
        };
        result.into()
    }

    pub async fn delete(&self, request: DeleteRequest) -> OperationResult {
        let result = match self.connection.begin().await {
            Ok(transaction) => {
                let result = self.info.delete(&transaction, &request).await;
                finish(transaction, result, request.noop).await
            }
            Err(e) => Err(BackendError::from(e).into()),
        };
        result.into()
    }

    pub async fn modify(&self, request: ModifyRequest) -> OperationResult {
        let result = match self.connection.begin().await {
            Ok(transaction) => {
                let result = self.info.modify(&transaction, &request).await;
                finish(transaction, result, request.noop).await
            }
            Err(e) => Err(BackendError::from(e).into()),
        };
        result.into()
    }

    pub async fn modrdn(&self, request: ModifyDnRequest) -> OperationResult {
        // Moving an entry below itself is refused before touching the
        // database.
        if let Err(e) = self.info.check_new_superior(&request) {
            return e.into();
        }
        let result = match self.connection.begin().await {
            Ok(transaction) => {
                let result = self.info.modrdn(&transaction, &request).await;
                finish(transaction, result, request.noop).await
            }
            Err(e) => Err(BackendError::from(e).into()),
        };
        result.into()
    }

    /// Hands the connection back to the caller.
    pub fn close(self) -> C {
        info!("SQL backend for `{}` closed", self.info.suffix_dn);
        self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fixture_backend, fixture_config, get_fixture_db, get_schema};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_open_builds_base_entry() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        let base = backend.info().base_entry.clone().unwrap();
        assert_eq!(base.dn, "dc=example,dc=com");
        assert!(base.has_object_class("extensibleObject"));
        assert_eq!(base.values_by_name("dc"), &["example"]);
    }

    #[tokio::test]
    async fn test_open_fails_on_undefined_attribute() {
        crate::logging::init_for_tests();
        let schema = get_schema();
        let sql_pool = get_fixture_db().await;
        crate::sql_wrap::SqlExecutor::execute(
            &sql_pool,
            "INSERT INTO ldap_attr_mappings (oc_map_id,name,sel_expr,from_tbls) VALUES (2,'shoeSize','institutes.shoe','institutes')",
            vec![],
        )
        .await
        .unwrap();
        let result = SqlBackend::open(
            fixture_config(),
            sql_pool,
            schema.clone(),
            Collaborators::with_defaults(&schema),
        )
        .await;
        assert!(matches!(result, Err(BackendError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_reload_keeps_map_on_failure() {
        crate::logging::init_for_tests();
        let mut backend = fixture_backend(fixture_config()).await;
        crate::sql_wrap::SqlExecutor::execute(
            backend.connection(),
            "INSERT INTO ldap_oc_mappings (id,name,keytbl,keycol) VALUES (9,'spaceship','ships','id')",
            vec![],
        )
        .await
        .unwrap();
        assert!(backend.reload_schema_map().await.is_err());
        assert_eq!(backend.info().schema_map().len(), 3);
        crate::sql_wrap::SqlExecutor::execute(
            backend.connection(),
            "DELETE FROM ldap_oc_mappings WHERE id=9",
            vec![],
        )
        .await
        .unwrap();
        backend.reload_schema_map().await.unwrap();
        assert_eq!(backend.info().schema_map().len(), 3);
    }
}
