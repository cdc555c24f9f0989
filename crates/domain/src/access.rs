use std::sync::Arc;

use ldsql_schema::AttributeDescription;

use crate::entry::Entry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum AccessRight {
    Read,
    Search,
    Write,
    WriteAdd,
    WriteDelete,
}

/// What an access check is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AclTarget {
    /// The entry as a whole.
    Entry,
    /// The entry's children, checked on the parent before add or delete.
    Children,
    Attribute(Arc<AttributeDescription>),
}

/// Decides whether the bound identity may perform an access. The backend
/// calls it and never makes access decisions itself. `values` is empty
/// unless the check is about specific attribute values.
pub trait AccessControl: Send + Sync {
    fn access_allowed(
        &self,
        entry: &Entry,
        target: &AclTarget,
        values: &[String],
        right: AccessRight,
    ) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn access_allowed(&self, _: &Entry, _: &AclTarget, _: &[String], _: AccessRight) -> bool {
        true
    }
}
