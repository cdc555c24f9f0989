use ldap3_proto::proto::{LdapFilter, LdapMatchingRuleAssertion, LdapSubstringFilter};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubstringFilter {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub final_: Option<String>,
}

impl SubstringFilter {
    pub fn is_empty(&self) -> bool {
        self.initial.is_none() && self.any.is_empty() && self.final_.is_none()
    }
}

impl From<LdapSubstringFilter> for SubstringFilter {
    fn from(filter: LdapSubstringFilter) -> Self {
        Self {
            initial: filter.initial,
            any: filter.any,
            final_: filter.final_,
        }
    }
}

/// An extensible match assertion, `(type:dn:rule:=value)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensibleMatch {
    pub attribute: Option<String>,
    /// Matching rule name or OID; the attribute's equality rule when absent.
    pub rule: Option<String>,
    pub value: String,
    /// The values of the entry's DN also take part in the match.
    pub dn_attributes: bool,
}

impl From<LdapMatchingRuleAssertion> for ExtensibleMatch {
    fn from(assertion: LdapMatchingRuleAssertion) -> Self {
        Self {
            attribute: assertion.type_,
            rule: assertion.matching_rule,
            value: assertion.match_value,
            dn_attributes: assertion.dn_attributes,
        }
    }
}

/// A search filter, with attribute names kept as sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, String),
    Substring(String, SubstringFilter),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    Present(String),
    Approx(String, String),
    Extensible(ExtensibleMatch),
    /// A component that can never be evaluated.
    Undefined,
}

impl Filter {
    /// The always-true filter `(&)`.
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn present(attribute: &str) -> Self {
        Filter::Present(attribute.to_owned())
    }

    pub fn equality(attribute: &str, value: &str) -> Self {
        Filter::Equality(attribute.to_owned(), value.to_owned())
    }
}

impl From<LdapFilter> for Filter {
    fn from(filter: LdapFilter) -> Self {
        match filter {
            LdapFilter::And(filters) => Filter::And(filters.into_iter().map(Into::into).collect()),
            LdapFilter::Or(filters) => Filter::Or(filters.into_iter().map(Into::into).collect()),
            LdapFilter::Not(filter) => Filter::Not(Box::new((*filter).into())),
            LdapFilter::Equality(attribute, value) => Filter::Equality(attribute, value),
            LdapFilter::Substring(attribute, substring) => {
                Filter::Substring(attribute, substring.into())
            }
            LdapFilter::GreaterOrEqual(attribute, value) => Filter::GreaterOrEqual(attribute, value),
            LdapFilter::LessOrEqual(attribute, value) => Filter::LessOrEqual(attribute, value),
            LdapFilter::Present(attribute) => Filter::Present(attribute),
            LdapFilter::Approx(attribute, value) => Filter::Approx(attribute, value),
            LdapFilter::Extensible(assertion) => Filter::Extensible(assertion.into()),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{filter})"),
            Filter::Equality(a, v) => write!(f, "({a}={v})"),
            Filter::Substring(a, s) => {
                write!(f, "({a}={}*", s.initial.as_deref().unwrap_or_default())?;
                for any in &s.any {
                    write!(f, "{any}*")?;
                }
                write!(f, "{})", s.final_.as_deref().unwrap_or_default())
            }
            Filter::GreaterOrEqual(a, v) => write!(f, "({a}>={v})"),
            Filter::LessOrEqual(a, v) => write!(f, "({a}<={v})"),
            Filter::Present(a) => write!(f, "({a}=*)"),
            Filter::Approx(a, v) => write!(f, "({a}~={v})"),
            Filter::Extensible(m) => {
                f.write_str("(")?;
                if let Some(attribute) = &m.attribute {
                    f.write_str(attribute)?;
                }
                if m.dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = &m.rule {
                    write!(f, ":{rule}")?;
                }
                write!(f, ":={})", m.value)
            }
            Filter::Undefined => f.write_str("(?=undefined)"),
        }
    }
}
