use ldap3_proto::LdapResultCode;
use ldsql_domain::{
    dn::{is_descendant_or_self, parent_dn, rdn},
    AccessRight, AclTarget, LdapError, LdapResult, ModifyDnRequest,
};
use tracing::{debug, instrument};

use super::unwilling;
use crate::{
    backend::BackendInfo, error::BackendError, search::AttributeSelection, sql_wrap::SqlExecutor,
};

impl BackendInfo {
    /// Refuses to move an entry below itself. Needs no database access.
    pub(crate) fn check_new_superior(&self, request: &ModifyDnRequest) -> LdapResult<()> {
        let Some(new_superior) = &request.new_superior else {
            return Ok(());
        };
        let ndn = self.collaborators.normalizer.normalize(&request.dn)?;
        let superior_ndn = self.collaborators.normalizer.normalize(new_superior)?;
        if is_descendant_or_self(&superior_ndn, &ndn) {
            return Err(unwilling(format!(
                "`{}` cannot be moved below itself",
                request.dn
            )));
        }
        Ok(())
    }

    #[instrument(skip_all, level = "debug", err, fields(dn = %request.dn, new_rdn = %request.new_rdn))]
    pub(crate) async fn modrdn<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        request: &ModifyDnRequest,
    ) -> LdapResult<()> {
        self.check_new_superior(request)?;
        let (_, ndn) = self.normalize_in_suffix(&request.dn)?;
        let id = self.resolve_target(conn, &ndn).await?;
        if id.is_base_object() {
            return Err(unwilling("the suffix entry cannot be renamed"));
        }
        if self.has_children(conn, &ndn).await? {
            return Err(LdapError::new(
                LdapResultCode::NotAllowedOnNonLeaf,
                format!("`{}` has children", id.dn),
            ));
        }
        let oc_map = self.oc_map_of(&id)?;
        let mut entry = self.id2entry(conn, &id, &AttributeSelection::All).await?;

        let new_parent_dn = match &request.new_superior {
            Some(new_superior) => self.normalize_in_suffix(new_superior)?.0,
            None => parent_dn(&id.dn).unwrap_or_default().to_owned(),
        };
        let new_dn = if new_parent_dn.is_empty() {
            request.new_rdn.clone()
        } else {
            format!("{},{}", request.new_rdn, new_parent_dn)
        };
        let (new_dn, new_ndn) = self.normalize_in_suffix(&new_dn)?;
        if new_ndn != ndn {
            match self.dn_to_id(conn, &new_ndn).await {
                Ok(_) => {
                    return Err(LdapError::new(
                        LdapResultCode::EntryAlreadyExists,
                        format!("`{new_dn}` already exists"),
                    ))
                }
                Err(BackendError::EntryNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.check_access(&entry, &AclTarget::Entry, &[], AccessRight::Write)?;
        let (new_parent_id, new_parent) = self.resolve_parent(conn, &new_ndn).await?;
        if parent_dn(&new_ndn) != parent_dn(&ndn) {
            let (_, old_parent) = self.resolve_parent(conn, &ndn).await?;
            self.check_access(
                &old_parent,
                &AclTarget::Children,
                &[],
                AccessRight::WriteDelete,
            )?;
            self.check_access(&new_parent, &AclTarget::Children, &[], AccessRight::WriteAdd)?;
        }
        let modifications = self.collaborators.rdn_diff.modrdn_to_modifications(
            &entry,
            rdn(&id.dn),
            &request.new_rdn,
            request.delete_old_rdn,
        )?;
        self.check_modification_access(&entry, &modifications)?;

        conn.execute(&self.queries.delentry_query, vec![id.id.to_sql()])
            .await
            .map_err(BackendError::from)?;
        conn.execute(
            &self.queries.reinsentry_query,
            vec![
                id.id.to_sql(),
                new_dn.as_str().into(),
                oc_map.id.into(),
                new_parent_id.to_sql(),
                id.keyval.to_sql(),
            ],
        )
        .await
        .map_err(BackendError::from)?;
        entry.dn = new_dn;
        entry.ndn = new_ndn;

        self.apply_modifications(conn, &id, oc_map, &mut entry, &modifications)
            .await?;
        self.check_modified_entry(&entry)?;
        debug!("Renamed `{}` to `{}`", id.dn, entry.dn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        dump_tables, faulty_backend, fixture_backend, fixture_config,
    };
    use ldsql_domain::OperationResult;
    use pretty_assertions::assert_eq;

    const JOHN: &str = "cn=John Doe,o=Acme,dc=example,dc=com";

    fn modrdn_request(dn: &str, new_rdn: &str, new_superior: Option<&str>) -> ModifyDnRequest {
        ModifyDnRequest {
            dn: dn.to_owned(),
            new_rdn: new_rdn.to_owned(),
            delete_old_rdn: true,
            new_superior: new_superior.map(str::to_owned),
            noop: false,
        }
    }

    #[tokio::test]
    async fn test_rename() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        assert_eq!(
            backend
                .modrdn(modrdn_request(
                    "cn=Jane Smith,dc=example,dc=com",
                    "cn=Janet Smith",
                    None
                ))
                .await,
            OperationResult::success()
        );
        let info = backend.info();
        let conn = backend.connection();
        assert!(matches!(
            info.dn_to_id(conn, "cn=jane smith,dc=example,dc=com").await,
            Err(BackendError::EntryNotFound(_))
        ));
        let id = info
            .dn_to_id(conn, "cn=janet smith,dc=example,dc=com")
            .await
            .unwrap();
        assert_eq!(id.dn, "cn=Janet Smith,dc=example,dc=com");
        let entry = info
            .id2entry(conn, &id, &AttributeSelection::All)
            .await
            .unwrap();
        assert_eq!(entry.values_by_name("cn"), &["Janet Smith"]);
    }

    #[tokio::test]
    async fn test_move_to_new_superior() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        assert!(backend
            .modrdn(modrdn_request(JOHN, "cn=John Doe", Some("dc=example,dc=com")))
            .await
            .is_success());
        let info = backend.info();
        let conn = backend.connection();
        let id = info
            .dn_to_id(conn, "cn=john doe,dc=example,dc=com")
            .await
            .unwrap();
        assert_eq!(id.oc_map_id, 1);
        assert_eq!(
            info.count_children(conn, "o=acme,dc=example,dc=com")
                .await
                .unwrap(),
            0
        );
        let entry = info
            .id2entry(conn, &id, &AttributeSelection::All)
            .await
            .unwrap();
        assert_eq!(entry.values_by_name("telephoneNumber").len(), 2);
        assert!(entry.has_object_class("organizationalPerson"));
    }

    #[tokio::test]
    async fn test_move_below_itself_issues_no_sql() {
        crate::logging::init_for_tests();
        let (backend, _) = faulty_backend(fixture_config(), usize::MAX).await;
        backend.connection().reset_statements();
        let result = backend
            .modrdn(modrdn_request(JOHN, "cn=John Doe", Some(JOHN)))
            .await;
        assert_eq!(result.code, LdapResultCode::UnwillingToPerform);
        let below = backend
            .modrdn(modrdn_request(
                JOHN,
                "cn=John Doe",
                Some("ou=sub,cn=John Doe,o=Acme,dc=example,dc=com"),
            ))
            .await;
        assert_eq!(below.code, LdapResultCode::UnwillingToPerform);
        assert_eq!(backend.connection().statements(), 0);
    }

    #[tokio::test]
    async fn test_modrdn_refusals() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        let before = dump_tables(backend.connection()).await;
        assert_eq!(
            backend
                .modrdn(modrdn_request("o=Acme,dc=example,dc=com", "o=Acme Corp", None))
                .await
                .code,
            LdapResultCode::NotAllowedOnNonLeaf
        );
        assert_eq!(
            backend
                .modrdn(modrdn_request(
                    "cn=Jane Smith,dc=example,dc=com",
                    "cn=Remote",
                    None
                ))
                .await
                .code,
            LdapResultCode::EntryAlreadyExists
        );
        assert_eq!(
            backend
                .modrdn(modrdn_request(
                    "cn=Jane Smith,dc=example,dc=com",
                    "cn=Jane Smith",
                    Some("ou=missing,dc=example,dc=com")
                ))
                .await
                .code,
            LdapResultCode::NoSuchObject
        );
        assert_eq!(dump_tables(backend.connection()).await, before);
    }

    #[tokio::test]
    async fn test_modrdn_is_atomic_at_every_step() {
        crate::logging::init_for_tests();
        let mut step = 0;
        loop {
            let (backend, pristine) = faulty_backend(fixture_config(), step).await;
            let result = backend
                .modrdn(modrdn_request(JOHN, "cn=Johnny Doe", Some("dc=example,dc=com")))
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
