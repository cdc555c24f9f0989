use std::sync::Arc;

use ldap3_proto::LdapResultCode;
use ldsql_schema::Schema;

use crate::{
    error::{LdapError, LdapResult},
    requests::SearchScope,
};

/// Splits `s` at every unescaped occurrence of `separator`.
fn split_unescaped(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn invalid_dn(dn: &str) -> LdapError {
    LdapError::new(
        LdapResultCode::InvalidDNSyntax,
        format!(r#"Invalid DN: "{}""#, dn),
    )
}

/// Parses one RDN such as `cn=John+sn=Doe` into (type, value) pairs.
pub fn parse_rdn(rdn: &str) -> LdapResult<Vec<(String, String)>> {
    split_unescaped(rdn, '+')
        .into_iter()
        .map(|ava| {
            let (attribute, value) = ava.split_once('=').ok_or_else(|| invalid_dn(rdn))?;
            let attribute = attribute.trim();
            let value = value.trim();
            if attribute.is_empty() || value.is_empty() {
                return Err(invalid_dn(rdn));
            }
            Ok((attribute.to_owned(), value.to_owned()))
        })
        .collect()
}

/// The RDN strings of `dn`, leaf first. The empty DN has none.
pub fn split_rdns(dn: &str) -> LdapResult<Vec<&str>> {
    if dn.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rdns: Vec<&str> = split_unescaped(dn, ',').into_iter().map(str::trim).collect();
    if rdns.iter().any(|r| r.is_empty()) {
        return Err(invalid_dn(dn));
    }
    Ok(rdns)
}

/// The leftmost RDN of a well-formed DN.
pub fn rdn(dn: &str) -> &str {
    split_unescaped(dn, ',').into_iter().next().unwrap_or(dn)
}

/// Everything after the leftmost RDN; `None` for the empty DN, and the empty
/// string for a single-RDN DN.
pub fn parent_dn(dn: &str) -> Option<&str> {
    if dn.is_empty() {
        return None;
    }
    let first = rdn(dn);
    Some(dn[first.len()..].trim_start_matches(',').trim_start())
}

/// Whether `ndn` is `base_ndn` or below it. Both must be normalized.
pub fn is_descendant_or_self(ndn: &str, base_ndn: &str) -> bool {
    base_ndn.is_empty()
        || ndn == base_ndn
        || (ndn.len() > base_ndn.len() + 1
            && ndn.ends_with(base_ndn)
            && ndn.as_bytes()[ndn.len() - base_ndn.len() - 1] == b',')
}

/// Exact scope test on normalized DNs.
pub fn is_in_scope(ndn: &str, base_ndn: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => ndn == base_ndn,
        SearchScope::OneLevel => ndn != base_ndn && parent_dn(ndn) == Some(base_ndn),
        SearchScope::Subtree => is_descendant_or_self(ndn, base_ndn),
        SearchScope::Subordinate => ndn != base_ndn && is_descendant_or_self(ndn, base_ndn),
    }
}

/// Produces the pretty and normalized forms of a DN.
pub trait DnNormalizer: Send + Sync {
    fn pretty_normalize(&self, dn: &str) -> LdapResult<(String, String)>;

    fn normalize(&self, dn: &str) -> LdapResult<String> {
        self.pretty_normalize(dn).map(|(_, normalized)| normalized)
    }
}

/// Normalizes attribute types to their canonical schema name and values
/// according to the type's equality rule.
pub struct LdapDnNormalizer {
    schema: Arc<Schema>,
}

impl LdapDnNormalizer {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    fn normalize_ava(&self, attribute: &str, value: &str) -> ((String, String), String) {
        let attribute_type = self.schema.find_attribute_type(attribute);
        let pretty_type = attribute_type
            .map(|t| t.name().to_owned())
            .unwrap_or_else(|| attribute.to_owned());
        let case_exact = attribute_type
            .and_then(|t| t.equality())
            .map(|rule| !rule.is_case_insensitive())
            .unwrap_or(false);
        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
        let normalized_value = if case_exact {
            collapsed
        } else {
            collapsed.to_lowercase()
        };
        (
            (pretty_type.clone(), value.to_owned()),
            format!("{}={}", pretty_type.to_ascii_lowercase(), normalized_value),
        )
    }
}

impl DnNormalizer for LdapDnNormalizer {
    fn pretty_normalize(&self, dn: &str) -> LdapResult<(String, String)> {
        let mut pretty = Vec::new();
        let mut normalized = Vec::new();
        for rdn in split_rdns(dn)? {
            let mut avas: Vec<((String, String), String)> = parse_rdn(rdn)?
                .iter()
                .map(|(a, v)| self.normalize_ava(a, v))
                .collect();
            avas.sort_by(|a, b| a.1.cmp(&b.1));
            pretty.push(
                avas.iter()
                    .map(|((t, v), _)| format!("{t}={v}"))
                    .collect::<Vec<_>>()
                    .join("+"),
            );
            normalized.push(
                avas.into_iter()
                    .map(|(_, n)| n)
                    .collect::<Vec<_>>()
                    .join("+"),
            );
        }
        Ok((pretty.join(","), normalized.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn normalizer() -> LdapDnNormalizer {
        LdapDnNormalizer::new(Arc::new(Schema::with_core_schema().unwrap()))
    }

    #[test]
    fn test_pretty_normalize() {
        let (pretty, normalized) = normalizer()
            .pretty_normalize("commonName=John  Doe , DC=Example,dc=COM")
            .unwrap();
        assert_eq!(pretty, "cn=John  Doe,dc=Example,dc=COM");
        assert_eq!(normalized, "cn=john doe,dc=example,dc=com");
        assert_eq!(normalizer().normalize("").unwrap(), "");
    }

    #[test]
    fn test_multi_valued_rdn_sorted() {
        let normalized = normalizer().normalize("sn=Doe+cn=John,dc=com").unwrap();
        assert_eq!(normalized, "cn=john+sn=doe,dc=com");
    }

    #[test]
    fn test_invalid_dn() {
        assert_eq!(
            normalizer().normalize("cn=a,,dc=com").unwrap_err().code,
            LdapResultCode::InvalidDNSyntax
        );
        assert_eq!(
            normalizer().normalize("nodn").unwrap_err().code,
            LdapResultCode::InvalidDNSyntax
        );
    }

    #[test]
    fn test_escaped_separators() {
        assert_eq!(rdn(r"cn=Doe\, John,dc=com"), r"cn=Doe\, John");
        assert_eq!(parent_dn(r"cn=Doe\, John,dc=com"), Some("dc=com"));
        assert_eq!(parent_dn("dc=com"), Some(""));
        assert_eq!(parent_dn(""), None);
    }

    #[test]
    fn test_scopes() {
        let base = "dc=example,dc=com";
        assert!(is_in_scope(base, base, SearchScope::Base));
        assert!(is_in_scope("ou=people,dc=example,dc=com", base, SearchScope::OneLevel));
        assert!(!is_in_scope(
            "cn=a,ou=people,dc=example,dc=com",
            base,
            SearchScope::OneLevel
        ));
        assert!(is_in_scope(
            "cn=a,ou=people,dc=example,dc=com",
            base,
            SearchScope::Subtree
        ));
        assert!(is_in_scope(base, base, SearchScope::Subtree));
        assert!(!is_in_scope(base, base, SearchScope::Subordinate));
        assert!(!is_in_scope("dc=notexample,dc=com", base, SearchScope::Subtree));
        assert!(is_in_scope("dc=com", "", SearchScope::Subtree));
    }
}
