use std::{
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use ldap3_proto::proto::{LdapAddRequest, LdapModifyRequest, LdapSearchScope};
use serde::{Deserialize, Serialize};

use crate::{filter::Filter, modification::Modification};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
    /// The subtree below the base, without the base itself.
    Subordinate,
}

impl From<&LdapSearchScope> for SearchScope {
    fn from(scope: &LdapSearchScope) -> Self {
        match scope {
            LdapSearchScope::Base => SearchScope::Base,
            LdapSearchScope::OneLevel => SearchScope::OneLevel,
            LdapSearchScope::Subtree => SearchScope::Subtree,
            #[allow(unreachable_patterns)]
            _ => SearchScope::Subordinate,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: Filter,
    pub attributes: Vec<String>,
    /// 0 means no limit.
    pub size_limit: usize,
    pub time_limit: Option<Duration>,
    pub types_only: bool,
    /// Return referral entries as entries instead of references.
    pub manage_dsa_it: bool,
    /// Set by the connection layer when the client abandons the search.
    pub abandoned: Arc<AtomicBool>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: Filter) -> Self {
        Self {
            base: base.into(),
            scope,
            filter,
            attributes: Vec::new(),
            size_limit: 0,
            time_limit: None,
            types_only: false,
            manage_dsa_it: false,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<(String, Vec<String>)>,
    /// Dry run: everything is executed, then rolled back.
    pub noop: bool,
}

impl From<LdapAddRequest> for AddRequest {
    fn from(request: LdapAddRequest) -> Self {
        Self {
            dn: request.dn,
            attributes: request
                .attributes
                .into_iter()
                .map(|a| {
                    (
                        a.atype,
                        a.vals
                            .into_iter()
                            .map(|v| String::from_utf8_lossy(&v).into_owned())
                            .collect(),
                    )
                })
                .collect(),
            noop: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteRequest {
    pub dn: String,
    pub noop: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub modifications: Vec<Modification>,
    pub noop: bool,
}

impl From<LdapModifyRequest> for ModifyRequest {
    fn from(request: LdapModifyRequest) -> Self {
        Self {
            dn: request.dn,
            modifications: request.changes.into_iter().map(Into::into).collect(),
            noop: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
    pub noop: bool,
}
