use ldap3_proto::LdapResultCode;
use ldsql_domain::{AccessRight, AclTarget, AddRequest, Entry, LdapError, LdapResult};
use ldsql_schema::names;
use tracing::{debug, instrument};

use super::unwilling;
use crate::{
    backend::BackendInfo,
    entry_id::EntryKey,
    error::BackendError,
    schema_map::{ObjectClassMapping, ProcReturn},
    sql_wrap::SqlExecutor,
};

fn first_value(rows: Vec<Vec<Option<String>>>, index: usize, sql: &str) -> LdapResult<String> {
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().nth(index).flatten())
        .ok_or_else(|| {
            BackendError::InvalidBackendValue(format!("no key returned by `{sql}`")).into()
        })
}

impl BackendInfo {
    /// Creates the row of a new entry in its key table and returns its key.
    async fn create_row<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        oc_map: &ObjectClassMapping,
    ) -> LdapResult<EntryKey> {
        let create_proc = oc_map.create_proc.as_deref().ok_or_else(|| {
            unwilling(format!(
                "operation not permitted within namingContext: `{}` has no create procedure",
                oc_map.name
            ))
        })?;
        let key = if self.queries.create_needs_select {
            let create_keyval = oc_map.create_keyval.as_deref().ok_or_else(|| {
                unwilling(format!(
                    "operation not permitted within namingContext: `{}` has no key retrieval query",
                    oc_map.name
                ))
            })?;
            self.run_proc(conn, create_proc, vec![], oc_map.create_return)
                .await?;
            let rows = conn
                .query_rows(create_keyval, vec![], 1)
                .await
                .map_err(BackendError::from)?;
            first_value(rows, 0, create_keyval)?
        } else {
            match oc_map.create_return {
                ProcReturn::NoOutput => {
                    let rows = conn
                        .query_rows(create_proc, vec![], 1)
                        .await
                        .map_err(BackendError::from)?;
                    first_value(rows, 0, create_proc)?
                }
                ProcReturn::ReturnCode => {
                    let rows = conn
                        .query_rows(create_proc, vec![], 2)
                        .await
                        .map_err(BackendError::from)?;
                    let code = rows
                        .first()
                        .and_then(|row| row.first().cloned().flatten())
                        .unwrap_or_default();
                    let code: i64 = code.trim().parse().map_err(|_| {
                        BackendError::InvalidBackendValue(format!("return code `{code}`"))
                    })?;
                    if code != 0 {
                        return Err(LdapError::new(
                            ldsql_domain::sanitize_result_code(code),
                            "SQL-backend procedure failed",
                        ));
                    }
                    first_value(rows, 1, create_proc)?
                }
            }
        };
        Ok(EntryKey::parse(&key))
    }

    #[instrument(skip_all, level = "debug", err, fields(dn = %request.dn))]
    pub(crate) async fn add<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        request: &AddRequest,
    ) -> LdapResult<()> {
        let (dn, ndn) = self.normalize_in_suffix(&request.dn)?;
        match self.dn_to_id(conn, &ndn).await {
            Ok(_) => {
                return Err(LdapError::new(
                    LdapResultCode::EntryAlreadyExists,
                    format!("`{dn}` already exists"),
                ))
            }
            Err(BackendError::EntryNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let mut entry = Entry::new(dn.as_str(), ndn.as_str());
        for (attribute, values) in &request.attributes {
            let description = self.schema.resolve(attribute).map_err(BackendError::from)?;
            entry.add_values(description, values.iter().cloned());
        }
        if entry.object_classes().is_empty() {
            return Err(LdapError::new(
                LdapResultCode::ObjectClassViolation,
                "no objectClass attribute",
            ));
        }
        let structural = if self.config.schema_check {
            let counts: Vec<_> = entry
                .attributes
                .iter()
                .map(|a| (a.description.as_ref(), a.values.len()))
                .collect();
            self.schema.check_entry(entry.object_classes(), &counts)
        } else {
            self.schema.structural_object_class(entry.object_classes())
        }
        .map_err(BackendError::from)?;
        // A more specific class than the mapped one lands in the auxiliary
        // objectClass table.
        let oc_map = self.schema_map.lookup_nearest(&self.schema, structural).ok_or_else(|| {
            unwilling(format!(
                "operation not permitted within namingContext: no mapping for objectClass `{}`",
                self.schema.object_class(structural).name()
            ))
        })?;

        let (parent_id, parent) = self.resolve_parent(conn, &ndn).await?;
        self.check_access(&parent, &AclTarget::Children, &[], AccessRight::WriteAdd)?;

        let keyval = self.create_row(conn, oc_map).await?;
        debug!(%keyval, "Created `{}` row", oc_map.name);

        let object_class = self
            .schema
            .resolve(names::OBJECT_CLASS)
            .map_err(BackendError::from)?;
        let referral = self.schema.resolve(names::REF).map_err(BackendError::from)?;
        for attribute in &entry.attributes {
            let description = &attribute.description;
            if *description == object_class
                || *description == referral
                || description.is_operational()
                || attribute.values.is_empty()
            {
                continue;
            }
            self.add_attribute_values(conn, oc_map, &keyval, description, &attribute.values)
                .await?;
        }

        conn.execute(
            &self.queries.insentry_query,
            vec![
                dn.as_str().into(),
                oc_map.id.into(),
                parent_id.to_sql(),
                keyval.to_sql(),
            ],
        )
        .await
        .map_err(BackendError::from)?;

        // These mappings write through the new ldap_entries row.
        let extra_classes: Vec<String> = entry
            .values(&object_class)
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&oc_map.name))
            .cloned()
            .collect();
        if !extra_classes.is_empty() {
            self.add_attribute_values(conn, oc_map, &keyval, &object_class, &extra_classes)
                .await?;
        }
        let urls = entry.values(&referral);
        if !urls.is_empty() {
            self.add_attribute_values(conn, oc_map, &keyval, &referral, urls)
                .await?;
        }
        debug!("Added `{}`", dn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        search::AttributeSelection,
        test_utils::{
            dump_tables, faulty_backend, fixture_backend, fixture_backend_with_access,
            fixture_config, MockAccess,
        },
    };
    use ldsql_domain::OperationResult;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn add_request(dn: &str, attributes: &[(&str, &[&str])]) -> AddRequest {
        AddRequest {
            dn: dn.to_owned(),
            attributes: attributes
                .iter()
                .map(|(name, values)| {
                    (
                        (*name).to_owned(),
                        values.iter().map(|v| (*v).to_owned()).collect(),
                    )
                })
                .collect(),
            noop: false,
        }
    }

    fn bob() -> AddRequest {
        add_request(
            "cn=Bob Brown,o=Acme,dc=example,dc=com",
            &[
                ("objectClass", &["person", "organizationalPerson"]),
                ("cn", &["Bob Brown"]),
                ("sn", &["Brown"]),
                ("telephoneNumber", &["+1 555 0000"]),
            ],
        )
    }

    #[tokio::test]
    async fn test_add_person() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        assert_eq!(backend.add(bob()).await, OperationResult::success());

        let info = backend.info();
        let id = info
            .dn_to_id(backend.connection(), "cn=bob brown,o=acme,dc=example,dc=com")
            .await
            .unwrap();
        assert_eq!(id.oc_map_id, 1);
        assert_eq!(id.id, EntryKey::Numeric(5));
        assert_eq!(id.keyval, EntryKey::Numeric(3));
        let entry = info
            .id2entry(backend.connection(), &id, &AttributeSelection::All)
            .await
            .unwrap();
        assert_eq!(entry.values_by_name("sn"), &["Brown"]);
        assert_eq!(entry.values_by_name("telephoneNumber"), &["+1 555 0000"]);
        assert_eq!(
            entry.object_classes(),
            &["person".to_owned(), "organizationalPerson".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_add_refusals() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        let code = |result: OperationResult| result.code;

        let existing = add_request(
            "cn=JOHN DOE,o=acme,dc=example,dc=com",
            &[("objectClass", &["person"]), ("cn", &["John Doe"]), ("sn", &["Doe"])],
        );
        assert_eq!(code(backend.add(existing).await), LdapResultCode::EntryAlreadyExists);

        let orphan = add_request(
            "cn=Lost,ou=nowhere,dc=example,dc=com",
            &[("objectClass", &["person"]), ("cn", &["Lost"]), ("sn", &["Lost"])],
        );
        let result = backend.add(orphan).await;
        assert_eq!(result.code, LdapResultCode::NoSuchObject);
        assert_eq!(result.matched_dn, "dc=example,dc=com");

        let unmapped_class = add_request(
            "ou=Sales,dc=example,dc=com",
            &[("objectClass", &["organizationalUnit"]), ("ou", &["Sales"])],
        );
        assert_eq!(
            code(backend.add(unmapped_class).await),
            LdapResultCode::UnwillingToPerform
        );

        let no_class = add_request("cn=Nobody,dc=example,dc=com", &[("cn", &["Nobody"])]);
        assert_eq!(
            code(backend.add(no_class).await),
            LdapResultCode::ObjectClassViolation
        );

        let outside = add_request(
            "cn=Else,dc=elsewhere",
            &[("objectClass", &["person"]), ("cn", &["Else"]), ("sn", &["Else"])],
        );
        assert_eq!(code(backend.add(outside).await), LdapResultCode::NoSuchObject);
    }

    #[tokio::test]
    async fn test_add_with_schema_check() {
        crate::logging::init_for_tests();
        let mut config = fixture_config();
        config.schema_check = true;
        let backend = fixture_backend(config).await;
        let missing_sn = add_request(
            "cn=Half,dc=example,dc=com",
            &[("objectClass", &["person"]), ("cn", &["Half"])],
        );
        assert_eq!(
            backend.add(missing_sn).await.code,
            LdapResultCode::ObjectClassViolation
        );
    }

    #[tokio::test]
    async fn test_add_orphan_allowed() {
        crate::logging::init_for_tests();
        let mut config = fixture_config();
        config.allow_orphans = true;
        let backend = fixture_backend(config).await;
        let orphan = add_request(
            "cn=Lost,ou=nowhere,dc=example,dc=com",
            &[("objectClass", &["person"]), ("cn", &["Lost"]), ("sn", &["Lost"])],
        );
        assert!(backend.add(orphan).await.is_success());
    }

    #[tokio::test]
    async fn test_add_unmapped_attribute() {
        crate::logging::init_for_tests();
        let request = add_request(
            "cn=Described,dc=example,dc=com",
            &[
                ("objectClass", &["person"]),
                ("cn", &["Described"]),
                ("sn", &["D"]),
                ("description", &["not stored"]),
            ],
        );
        let lenient = fixture_backend(fixture_config()).await;
        assert!(lenient.add(request.clone()).await.is_success());

        let mut config = fixture_config();
        config.fail_if_no_mapping = true;
        let strict = fixture_backend(config).await;
        let before = dump_tables(strict.connection()).await;
        assert_eq!(
            strict.add(request).await.code,
            LdapResultCode::UnwillingToPerform
        );
        assert_eq!(dump_tables(strict.connection()).await, before);
    }

    #[tokio::test]
    async fn test_noop_add_leaves_nothing() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        let before = dump_tables(backend.connection()).await;
        let mut request = bob();
        request.noop = true;
        assert!(backend.add(request).await.is_success());
        assert_eq!(dump_tables(backend.connection()).await, before);
    }

    #[tokio::test]
    async fn test_add_denied_on_parent() {
        crate::logging::init_for_tests();
        let mut access = MockAccess::new();
        access
            .expect_access_allowed()
            .returning(|entry, target, _, right| {
                !(entry.ndn == "o=acme,dc=example,dc=com"
                    && *target == AclTarget::Children
                    && right == AccessRight::WriteAdd)
            });
        let backend = fixture_backend_with_access(fixture_config(), Arc::new(access)).await;
        let before = dump_tables(backend.connection()).await;
        assert_eq!(
            backend.add(bob()).await.code,
            LdapResultCode::InsufficentAccessRights
        );
        assert_eq!(dump_tables(backend.connection()).await, before);
    }

    #[tokio::test]
    async fn test_failed_entry_insert_rolls_back() {
        crate::logging::init_for_tests();
        let backend = fixture_backend(fixture_config()).await;
        crate::sql_wrap::SqlExecutor::execute(
            backend.connection(),
            "CREATE TRIGGER no_entries BEFORE INSERT ON ldap_entries BEGIN SELECT RAISE(ABORT, 'refused'); END",
            vec![],
        )
        .await
        .unwrap();
        let before = dump_tables(backend.connection()).await;
        let result = backend.add(bob()).await;
        assert_eq!(result.code, LdapResultCode::Other);
        assert_eq!(result.message, "SQL-backend error");
        assert_eq!(dump_tables(backend.connection()).await, before);
        assert!(matches!(
            backend
                .info()
                .dn_to_id(backend.connection(), "cn=bob brown,o=acme,dc=example,dc=com")
                .await,
            Err(BackendError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_is_atomic_at_every_step() {
        crate::logging::init_for_tests();
        let mut step = 0;
        loop {
            let (backend, pristine) = faulty_backend(fixture_config(), step).await;
            let result = backend.add(bob()).await;
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
