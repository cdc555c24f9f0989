use ldap3_proto::proto::{LdapModify, LdapModifyType};

use crate::{dn::parse_rdn, entry::Entry, error::LdapResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
    Increment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Modification {
    pub fn new<S: Into<String>>(
        op: ModOp,
        attribute: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            op,
            attribute: attribute.to_owned(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<LdapModify> for Modification {
    fn from(change: LdapModify) -> Self {
        let op = match change.operation {
            LdapModifyType::Add => ModOp::Add,
            LdapModifyType::Delete => ModOp::Delete,
            LdapModifyType::Replace => ModOp::Replace,
            #[allow(unreachable_patterns)]
            _ => ModOp::Increment,
        };
        Self {
            op,
            attribute: change.modification.atype,
            values: change
                .modification
                .vals
                .into_iter()
                .map(|v| String::from_utf8_lossy(&v).into_owned())
                .collect(),
        }
    }
}

/// Computes the attribute changes implied by renaming an entry.
pub trait RdnDiff: Send + Sync {
    fn modrdn_to_modifications(
        &self,
        entry: &Entry,
        old_rdn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> LdapResult<Vec<Modification>>;
}

/// Adds the new RDN values the entry lacks and, when asked, deletes the old
/// RDN values that the new RDN does not repeat.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRdnDiff;

impl RdnDiff for DefaultRdnDiff {
    fn modrdn_to_modifications(
        &self,
        entry: &Entry,
        old_rdn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> LdapResult<Vec<Modification>> {
        let old_avas = parse_rdn(old_rdn)?;
        let new_avas = parse_rdn(new_rdn)?;
        let same = |(a1, v1): &(String, String), (a2, v2): &(String, String)| {
            a1.eq_ignore_ascii_case(a2) && v1.eq_ignore_ascii_case(v2)
        };
        let mut modifications = Vec::new();
        for (attribute, value) in &new_avas {
            let present = entry
                .values_by_name(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value));
            if !present {
                modifications.push(Modification::new(ModOp::Add, attribute, [value.clone()]));
            }
        }
        if delete_old_rdn {
            for ava in &old_avas {
                if !new_avas.iter().any(|n| same(n, ava)) {
                    modifications.push(Modification::new(ModOp::Delete, &ava.0, [ava.1.clone()]));
                }
            }
        }
        Ok(modifications)
    }
}
