use ldap3_proto::LdapResultCode;
use ldsql_domain::{
    AccessRight, AclTarget, Entry, LdapError, LdapResult, ModOp, Modification, ModifyRequest,
};
use ldsql_schema::{names, AttributeDescription};
use tracing::{debug, instrument};

use super::unwilling;
use crate::{
    backend::BackendInfo,
    entry_id::EntryId,
    error::BackendError,
    schema_map::ObjectClassMapping,
    search::AttributeSelection,
    sql_wrap::SqlExecutor,
};

fn remove_values(entry: &mut Entry, description: &AttributeDescription, values: &[String]) {
    if let Some(attribute) = entry
        .attributes
        .iter_mut()
        .find(|a| *a.description == *description)
    {
        attribute.values.retain(|v| !values.contains(v));
    }
    entry.attributes.retain(|a| !a.values.is_empty());
}

fn structural_violation(name: &str) -> LdapError {
    LdapError::new(
        LdapResultCode::ObjectClassViolation,
        format!("the structural objectClass `{name}` cannot be removed"),
    )
}

pub(crate) fn required_right(op: ModOp) -> AccessRight {
    match op {
        ModOp::Add => AccessRight::WriteAdd,
        ModOp::Delete => AccessRight::WriteDelete,
        ModOp::Replace | ModOp::Increment => AccessRight::Write,
    }
}

impl BackendInfo {
    /// Checks the per-attribute write rights of a modification list against
    /// the entry as currently stored.
    pub(crate) fn check_modification_access(
        &self,
        entry: &Entry,
        modifications: &[Modification],
    ) -> LdapResult<()> {
        for modification in modifications {
            let description = self
                .schema
                .resolve(&modification.attribute)
                .map_err(BackendError::from)?;
            self.check_access(
                entry,
                &AclTarget::Attribute(description),
                &modification.values,
                required_right(modification.op),
            )?;
        }
        Ok(())
    }

    /// Applies `modifications` to the stored entry, keeping `entry` in sync
    /// with what was written.
    pub(crate) async fn apply_modifications<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        id: &EntryId,
        oc_map: &ObjectClassMapping,
        entry: &mut Entry,
        modifications: &[Modification],
    ) -> LdapResult<()> {
        let object_class = self
            .schema
            .resolve(names::OBJECT_CLASS)
            .map_err(BackendError::from)?;
        for modification in modifications {
            let description = self
                .schema
                .resolve(&modification.attribute)
                .map_err(BackendError::from)?;
            let is_object_class = description == object_class;
            // The mapped class is implied by the key table, never stored.
            let without_mapped_class = |values: &[String]| -> Vec<String> {
                values
                    .iter()
                    .filter(|v| !(is_object_class && v.eq_ignore_ascii_case(&oc_map.name)))
                    .cloned()
                    .collect()
            };
            debug!(op = %modification.op, attribute = %description.name(), "Applying modification");
            match modification.op {
                ModOp::Add => {
                    let values = without_mapped_class(&modification.values);
                    self.add_attribute_values(conn, oc_map, &id.keyval, &description, &values)
                        .await?;
                    entry.add_values(description.clone(), modification.values.iter().cloned());
                }
                ModOp::Delete => {
                    let values = if modification.values.is_empty() {
                        entry.values(&description).to_vec()
                    } else {
                        modification.values.clone()
                    };
                    if is_object_class
                        && values.iter().any(|v| v.eq_ignore_ascii_case(&oc_map.name))
                    {
                        return Err(structural_violation(&oc_map.name));
                    }
                    if !values.is_empty() {
                        self.delete_attribute_values(
                            conn,
                            oc_map,
                            &id.keyval,
                            &description,
                            &values,
                        )
                        .await?;
                    }
                    remove_values(entry, &description, &values);
                }
                ModOp::Replace => {
                    if is_object_class
                        && !modification
                            .values
                            .iter()
                            .any(|v| v.eq_ignore_ascii_case(&oc_map.name))
                    {
                        return Err(structural_violation(&oc_map.name));
                    }
                    let Some(mapping) = self.schema_map.lookup_attr(oc_map, &description) else {
                        self.unmapped(&format!(
                            "`{}` in `{}`",
                            description.name(),
                            oc_map.name
                        ))?;
                        continue;
                    };
                    let stored = without_mapped_class(entry.values(&description));
                    let replacement = without_mapped_class(&modification.values);
                    if mapping.delete_proc.is_some() && !stored.is_empty() {
                        self.delete_attribute_values(
                            conn,
                            oc_map,
                            &id.keyval,
                            &description,
                            &stored,
                        )
                        .await?;
                    }
                    if mapping.add_proc.is_some() && !replacement.is_empty() {
                        self.add_attribute_values(
                            conn,
                            oc_map,
                            &id.keyval,
                            &description,
                            &replacement,
                        )
                        .await?;
                    }
                    entry.remove(&description);
                    entry.add_values(description.clone(), modification.values.iter().cloned());
                }
                ModOp::Increment => {
                    if self.config.fail_if_no_mapping {
                        return Err(unwilling("increment is not supported"));
                    }
                    debug!("Ignoring increment of `{}`", description.name());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn check_modified_entry(&self, entry: &Entry) -> LdapResult<()> {
        if !self.config.schema_check {
            return Ok(());
        }
        let counts: Vec<_> = entry
            .attributes
            .iter()
            .map(|a| (a.description.as_ref(), a.values.len()))
            .collect();
        self.schema
            .check_entry(entry.object_classes(), &counts)
            .map_err(BackendError::from)?;
        Ok(())
    }

    #[instrument(skip_all, level = "debug", err, fields(dn = %request.dn))]
    pub(crate) async fn modify<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        request: &ModifyRequest,
    ) -> LdapResult<()> {
        let (_, ndn) = self.normalize_in_suffix(&request.dn)?;
        let id = self.resolve_target(conn, &ndn).await?;
        if id.is_base_object() {
            return Err(unwilling("the suffix entry cannot be modified"));
        }
        let oc_map = self.oc_map_of(&id)?;
        let mut entry = self.id2entry(conn, &id, &AttributeSelection::All).await?;
        self.check_modification_access(&entry, &request.modifications)?;
        self.apply_modifications(conn, &id, oc_map, &mut entry, &request.modifications)
            .await?;
        self.check_modified_entry(&entry)?;
        debug!("Modified `{}`", id.dn);
        Ok(())
    }
}
