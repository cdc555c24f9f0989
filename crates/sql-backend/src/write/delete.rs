use ldap3_proto::LdapResultCode;
use ldsql_domain::{AccessRight, AclTarget, DeleteRequest, LdapError, LdapResult};
use ldsql_schema::names;
use tracing::{debug, instrument};

use super::unwilling;
use crate::{
    backend::BackendInfo, error::BackendError, search::AttributeSelection, sql_wrap::SqlExecutor,
};

impl BackendInfo {
    #[instrument(skip_all, level = "debug", err, fields(dn = %request.dn))]
    pub(crate) async fn delete<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        request: &DeleteRequest,
    ) -> LdapResult<()> {
        let (_, ndn) = self.normalize_in_suffix(&request.dn)?;
        let id = self.resolve_target(conn, &ndn).await?;
        if id.is_base_object() {
            return Err(unwilling("the suffix entry cannot be deleted"));
        }
        let oc_map = self.oc_map_of(&id)?;
        let entry = self.id2entry(conn, &id, &AttributeSelection::All).await?;
        self.check_access(&entry, &AclTarget::Entry, &[], AccessRight::WriteDelete)?;
        let (_, parent) = self.resolve_parent(conn, &ndn).await?;
        self.check_access(&parent, &AclTarget::Children, &[], AccessRight::WriteDelete)?;

        if self.has_children(conn, &ndn).await? {
            return Err(LdapError::new(
                LdapResultCode::NotAllowedOnNonLeaf,
                format!("`{}` has children", id.dn),
            ));
        }

        let object_class = self
            .schema
            .resolve(names::OBJECT_CLASS)
            .map_err(BackendError::from)?;
        let referral = self.schema.resolve(names::REF).map_err(BackendError::from)?;
        // The auxiliary tables are emptied below by entry id.
        for mapping in oc_map
            .attributes()
            .iter()
            .filter(|m| m.description != object_class && m.description != referral)
        {
            let values = entry.values(&mapping.description);
            if values.is_empty() {
                continue;
            }
            self.delete_attribute_values(conn, oc_map, &id.keyval, &mapping.description, values)
                .await?;
        }

        match &oc_map.delete_proc {
            Some(delete_proc) => {
                self.run_proc(
                    conn,
                    delete_proc,
                    vec![id.keyval.to_sql()],
                    oc_map.delete_return,
                )
                .await?
            }
            None => self.unmapped(&format!("deleting `{}` rows", oc_map.name))?,
        }

        for query in [
            &self.queries.delobjclasses_query,
            &self.queries.delreferrals_query,
            &self.queries.delentry_query,
        ] {
            conn.execute(query, vec![id.id.to_sql()])
                .await
                .map_err(BackendError::from)?;
        }
        debug!("Deleted `{}`", id.dn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        dump_tables, faulty_backend, fixture_backend, fixture_backend_with_access,
        fixture_config, MockAccess,
    };
    use ldsql_domain::OperationResult;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn delete_request(dn: &str) -> DeleteRequest {
        DeleteRequest {
            dn: dn.to_owned(),
            noop: false,
        }
    }

    #[tokio::test]
    async fn test_delete_leaf() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        assert_eq!(
            backend
                .delete(delete_request("cn=John Doe,o=Acme,dc=example,dc=com"))
                .await,
            OperationResult::success()
        );
        assert!(matches!(
            backend
                .info()
                .dn_to_id(backend.connection(), "cn=john doe,o=acme,dc=example,dc=com")
                .await,
            Err(BackendError::EntryNotFound(_))
        ));
        let tables = dump_tables(backend.connection()).await;
        assert!(!tables.iter().any(|row| row.contains("555")), "{tables:?}");
        assert!(!tables
            .iter()
            .any(|row| row.starts_with("ldap_entry_objclasses")));
        assert!(!tables.iter().any(|row| row.contains("John")));
    }

    #[tokio::test]
    async fn test_delete_non_leaf_changes_nothing() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        let before = dump_tables(backend.connection()).await;
        assert_eq!(
            backend
                .delete(delete_request("o=Acme,dc=example,dc=com"))
                .await
                .code,
            LdapResultCode::NotAllowedOnNonLeaf
        );
        assert_eq!(dump_tables(backend.connection()).await, before);
    }

    #[tokio::test]
    async fn test_delete_refusals() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        let missing = backend
            .delete(delete_request("cn=Ghost,o=Acme,dc=example,dc=com"))
            .await;
        assert_eq!(missing.code, LdapResultCode::NoSuchObject);
        assert_eq!(missing.matched_dn, "o=Acme,dc=example,dc=com");
        assert_eq!(
            backend
                .delete(delete_request("dc=example,dc=com"))
                .await
                .code,
            LdapResultCode::UnwillingToPerform
        );
    }

    #[tokio::test]
    async fn test_delete_referral() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        assert!(backend
            .delete(delete_request("cn=Remote,dc=example,dc=com"))
            .await
            .is_success());
        let tables = dump_tables(backend.connection()).await;
        assert!(!tables.iter().any(|row| row.contains("ldap://")), "{tables:?}");
    }

    #[tokio::test]
    async fn test_delete_denied() {
        crate::logging::init_for_tests();
        let mut access = MockAccess::new();
        access
            .expect_access_allowed()
            .returning(|_, target, _, right| {
                !(*target == AclTarget::Entry && right == AccessRight::WriteDelete)
            });
        let backend = fixture_backend_with_access(fixture_config(), Arc::new(access)).await;
        let before = dump_tables(backend.connection()).await;
        assert_eq!(
            backend
                .delete(delete_request("cn=Jane Smith,dc=example,dc=com"))
                .await
                .code,
            LdapResultCode::InsufficentAccessRights
        );
        assert_eq!(dump_tables(backend.connection()).await, before);
    }

    #[tokio::test]
    async fn test_delete_is_atomic_at_every_step() {
        crate::logging::init_for_tests();
        let mut step = 0;
        loop {
            let (backend, pristine) = faulty_backend(fixture_config(), step).await;
            let result = backend
                .delete(delete_request("cn=John Doe,o=Acme,dc=example,dc=com"))
                .await;
            if result.is_success() {
                assert!(step > 0);
                break;
            }
            assert_eq!(result.code, LdapResultCode::Other, "step {step}");
            assert_eq!(dump_tables(backend.connection()).await, pristine, "step {step}");
            step += 1;
        }
    }
}
