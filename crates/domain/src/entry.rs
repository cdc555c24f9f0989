use std::sync::Arc;

use ldap3_proto::{LdapPartialAttribute, LdapSearchResultEntry};
use ldsql_schema::{names, AttributeDescription};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryAttribute {
    pub description: Arc<AttributeDescription>,
    pub values: Vec<String>,
}

/// A directory entry as assembled from the relational store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub ndn: String,
    pub attributes: Vec<EntryAttribute>,
}

impl Entry {
    pub fn new(dn: impl Into<String>, ndn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ndn: ndn.into(),
            attributes: Vec::new(),
        }
    }

    /// Adds values, skipping those already present.
    pub fn add_values(
        &mut self,
        description: Arc<AttributeDescription>,
        values: impl IntoIterator<Item = String>,
    ) {
        let index = match self
            .attributes
            .iter()
            .position(|a| a.description == description)
        {
            Some(index) => index,
            None => {
                self.attributes.push(EntryAttribute {
                    description,
                    values: Vec::new(),
                });
                self.attributes.len() - 1
            }
        };
        let attribute = &mut self.attributes[index];
        for value in values {
            if !attribute.values.contains(&value) {
                attribute.values.push(value);
            }
        }
    }

    pub fn get(&self, description: &AttributeDescription) -> Option<&EntryAttribute> {
        self.attributes
            .iter()
            .find(|a| *a.description == *description)
    }

    pub fn values(&self, description: &AttributeDescription) -> &[String] {
        self.get(description)
            .map(|a| a.values.as_slice())
            .unwrap_or_default()
    }

    /// Values of the attribute whose canonical description is `name`.
    pub fn values_by_name(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|a| a.description.name().eq_ignore_ascii_case(name))
            .map(|a| a.values.as_slice())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, description: &AttributeDescription) {
        self.attributes.retain(|a| *a.description != *description);
    }

    pub fn object_classes(&self) -> &[String] {
        self.values_by_name(names::OBJECT_CLASS)
    }

    pub fn has_object_class(&self, name: &str) -> bool {
        self.object_classes()
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(name))
    }

    pub fn into_ldap_entry(self, types_only: bool) -> LdapSearchResultEntry {
        LdapSearchResultEntry {
            dn: self.dn,
            attributes: self
                .attributes
                .into_iter()
                .filter(|a| !a.values.is_empty())
                .map(|a| LdapPartialAttribute {
                    atype: a.description.name().to_owned(),
                    vals: if types_only {
                        Vec::new()
                    } else {
                        a.values.into_iter().map(String::into_bytes).collect()
                    },
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldsql_schema::Schema;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_values_merges() {
        let schema = Schema::with_core_schema().unwrap();
        let cn = schema.resolve("cn").unwrap();
        let mut entry = Entry::new("cn=Bob,dc=com", "cn=bob,dc=com");
        entry.add_values(cn.clone(), ["Bob".to_owned(), "Robert".to_owned()]);
        entry.add_values(cn.clone(), ["Bob".to_owned()]);
        entry.add_values(schema.resolve("objectClass").unwrap(), ["person".to_owned()]);
        assert_eq!(entry.values(&cn), &["Bob", "Robert"]);
        assert!(entry.has_object_class("PERSON"));
        let ldap = entry.into_ldap_entry(false);
        assert_eq!(
            ldap,
            LdapSearchResultEntry {
                dn: "cn=Bob,dc=com".to_owned(),
                attributes: vec![
                    LdapPartialAttribute {
                        atype: "cn".to_owned(),
                        vals: vec![b"Bob".to_vec(), b"Robert".to_vec()],
                    },
                    LdapPartialAttribute {
                        atype: "objectClass".to_owned(),
                        vals: vec![b"person".to_vec()],
                    },
                ]
            }
        );
    }
}
