//! Add, delete, modify and modrdn.
//!
//! Every statement of an operation runs on the transaction it is given. The
//! caller commits or rolls back depending on the returned result.

mod add;
mod delete;
mod modify;
mod modrdn;

use ldap3_proto::LdapResultCode;
use ldsql_domain::{
    dn::{is_descendant_or_self, parent_dn},
    sanitize_result_code, AccessRight, AclTarget, Entry, LdapError, LdapResult,
};
use ldsql_schema::AttributeDescription;
use tracing::debug;

use crate::{
    backend::BackendInfo,
    entry_id::{EntryId, EntryKey},
    error::BackendError,
    schema_map::{ObjectClassMapping, ProcReturn},
    search::AttributeSelection,
    sql_wrap::{SqlExecutor, SqlValue},
};

pub(crate) fn unwilling(message: impl Into<String>) -> LdapError {
    LdapError::new(LdapResultCode::UnwillingToPerform, message)
}

impl BackendInfo {
    /// Runs a catalog procedure. With [`ProcReturn::ReturnCode`] the first
    /// column of the first row is an LDAP result code.
    pub(crate) async fn run_proc<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        sql: &str,
        params: Vec<SqlValue>,
        expect: ProcReturn,
    ) -> LdapResult<()> {
        match expect {
            ProcReturn::NoOutput => {
                conn.execute(sql, params).await.map_err(BackendError::from)?;
                Ok(())
            }
            ProcReturn::ReturnCode => {
                let rows = conn
                    .query_rows(sql, params, 1)
                    .await
                    .map_err(BackendError::from)?;
                let code = rows
                    .first()
                    .and_then(|row| row.first())
                    .and_then(|c| c.as_deref())
                    .ok_or_else(|| {
                        BackendError::InvalidBackendValue(format!("no return code from `{sql}`"))
                    })?;
                let code: i64 = code.trim().parse().map_err(|_| {
                    BackendError::InvalidBackendValue(format!("return code `{code}`"))
                })?;
                match sanitize_result_code(code) {
                    LdapResultCode::Success => Ok(()),
                    result_code => {
                        debug!("Procedure returned {}", code);
                        Err(LdapError::new(result_code, "SQL-backend procedure failed"))
                    }
                }
            }
        }
    }

    /// A write touches something without a mapping: refused when mappings
    /// must be complete, skipped otherwise.
    pub(crate) fn unmapped(&self, what: &str) -> LdapResult<()> {
        if self.config.fail_if_no_mapping {
            Err(unwilling(format!(
                "operation not permitted within namingContext: no mapping for {what}"
            )))
        } else {
            debug!("No mapping for {}, skipping", what);
            Ok(())
        }
    }

    pub(crate) fn check_access(
        &self,
        entry: &Entry,
        target: &AclTarget,
        values: &[String],
        right: AccessRight,
    ) -> LdapResult<()> {
        if self
            .collaborators
            .access
            .access_allowed(entry, target, values, right)
        {
            Ok(())
        } else {
            debug!("{} access to `{}` denied", right, entry.dn);
            Err(LdapError::new(
                LdapResultCode::InsufficentAccessRights,
                format!("Insufficient access rights on `{}`", entry.dn),
            ))
        }
    }

    /// Pretty and normalized forms of a DN that must lie within the suffix.
    pub(crate) fn normalize_in_suffix(&self, dn: &str) -> LdapResult<(String, String)> {
        let (dn, ndn) = self.collaborators.normalizer.pretty_normalize(dn)?;
        if !is_descendant_or_self(&ndn, &self.suffix_ndn) {
            return Err(LdapError::new(
                LdapResultCode::NoSuchObject,
                format!("`{dn}` is outside of `{}`", self.suffix_dn),
            ));
        }
        Ok((dn, ndn))
    }

    /// Resolves the target of a write, reporting the matched DN when it is
    /// missing.
    pub(crate) async fn resolve_target<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        ndn: &str,
    ) -> LdapResult<EntryId> {
        match self.dn_to_id(conn, ndn).await {
            Ok(id) => Ok(id),
            Err(BackendError::EntryNotFound(_)) => {
                let matched = self.matched_dn(conn, ndn).await?;
                Err(
                    LdapError::new(LdapResultCode::NoSuchObject, format!("No such object: {ndn}"))
                        .with_matched_dn(matched),
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The parent of `ndn`, its id, and the entry its ACLs are checked on.
    /// The suffix itself hangs below the base object id.
    pub(crate) async fn resolve_parent<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        ndn: &str,
    ) -> LdapResult<(EntryKey, Entry)> {
        let parent_ndn = parent_dn(ndn).unwrap_or_default();
        if ndn == self.suffix_ndn {
            return Ok((EntryKey::BASE_OBJECT, Entry::new(parent_ndn, parent_ndn)));
        }
        match self.dn_to_id(conn, parent_ndn).await {
            Ok(parent) => {
                let entry = self
                    .id2entry(conn, &parent, &AttributeSelection::All)
                    .await?;
                Ok((parent.id, entry))
            }
            Err(BackendError::EntryNotFound(_)) if self.config.allow_orphans => {
                debug!("Orphan entry `{}`", ndn);
                Ok((EntryKey::BASE_OBJECT, Entry::new(parent_ndn, parent_ndn)))
            }
            Err(BackendError::EntryNotFound(_)) => {
                let matched = self.matched_dn(conn, ndn).await?;
                Err(LdapError::new(
                    LdapResultCode::NoSuchObject,
                    format!("Parent of `{ndn}` does not exist"),
                )
                .with_matched_dn(matched))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the add procedure of `description` once per value.
    pub(crate) async fn add_attribute_values<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        oc_map: &ObjectClassMapping,
        keyval: &EntryKey,
        description: &AttributeDescription,
        values: &[String],
    ) -> LdapResult<()> {
        let Some(mapping) = self.schema_map.lookup_attr(oc_map, description) else {
            return self.unmapped(&format!("`{}` in `{}`", description.name(), oc_map.name));
        };
        let Some(add_proc) = &mapping.add_proc else {
            return self.unmapped(&format!("adding `{}` to `{}`", description.name(), oc_map.name));
        };
        for value in values {
            self.run_proc(
                conn,
                add_proc,
                mapping.add_param_order.params(keyval.to_sql(), value),
                mapping.add_return,
            )
            .await?;
        }
        Ok(())
    }

    /// Runs the delete procedure of `description` once per value.
    pub(crate) async fn delete_attribute_values<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        oc_map: &ObjectClassMapping,
        keyval: &EntryKey,
        description: &AttributeDescription,
        values: &[String],
    ) -> LdapResult<()> {
        let Some(mapping) = self.schema_map.lookup_attr(oc_map, description) else {
            return self.unmapped(&format!("`{}` in `{}`", description.name(), oc_map.name));
        };
        let Some(delete_proc) = &mapping.delete_proc else {
            return self.unmapped(&format!(
                "deleting `{}` from `{}`",
                description.name(),
                oc_map.name
            ));
        };
        for value in values {
            self.run_proc(
                conn,
                delete_proc,
                mapping.delete_param_order.params(keyval.to_sql(), value),
                mapping.delete_return,
            )
            .await?;
        }
        Ok(())
    }

    pub(crate) fn oc_map_of(&self, id: &EntryId) -> LdapResult<&ObjectClassMapping> {
        self.schema_map.lookup_by_id(id.oc_map_id).ok_or_else(|| {
            BackendError::InvalidBackendValue(format!(
                "entry `{}` has unknown oc_map_id {}",
                id.dn, id.oc_map_id
            ))
            .into()
        })
    }
}
