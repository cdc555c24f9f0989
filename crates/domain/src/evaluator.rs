use std::{cmp::Ordering, sync::Arc};

use ldsql_schema::{
    names, AttributeDescription, Comparison, MatchingRule, MatchingRuleKind, Schema,
};
use tracing::debug;

use crate::{
    dn::{parse_rdn, split_rdns},
    entry::Entry,
    filter::{ExtensibleMatch, Filter, SubstringFilter},
};

/// Outcome of evaluating a filter against an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum FilterResult {
    True,
    False,
    Undefined,
}

impl FilterResult {
    fn from_bool(b: bool) -> Self {
        if b {
            FilterResult::True
        } else {
            FilterResult::False
        }
    }

    fn negate(self) -> Self {
        match self {
            FilterResult::True => FilterResult::False,
            FilterResult::False => FilterResult::True,
            FilterResult::Undefined => FilterResult::Undefined,
        }
    }
}

/// Tests a candidate entry against the original search filter.
pub trait FilterEvaluator: Send + Sync {
    fn evaluate(&self, entry: &Entry, filter: &Filter) -> FilterResult;
}

/// Evaluates filters with the matching rules of a schema.
pub struct SchemaFilterEvaluator {
    schema: Arc<Schema>,
}

impl SchemaFilterEvaluator {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Values of every entry attribute that can stand for `description`.
    fn values_for<'a>(
        &self,
        entry: &'a Entry,
        description: &AttributeDescription,
    ) -> impl Iterator<Item = &'a String> + 'a {
        let matching: Vec<&'a [String]> = entry
            .attributes
            .iter()
            .filter(|a| {
                self.schema
                    .is_subtype_of_with_tags(&a.description, description)
            })
            .map(|a| a.values.as_slice())
            .collect();
        matching.into_iter().flatten()
    }

    fn resolve(&self, attribute: &str) -> Option<Arc<AttributeDescription>> {
        match self.schema.resolve(attribute) {
            Ok(description) => Some(description),
            Err(e) => {
                debug!(?e, attribute, "Filter attribute does not resolve");
                None
            }
        }
    }

    fn is_object_class(&self, description: &AttributeDescription) -> bool {
        description.name().eq_ignore_ascii_case(names::OBJECT_CLASS)
    }

    fn object_class_matches(&self, entry: &Entry, asserted: &str) -> FilterResult {
        let classes = self.schema.object_classes();
        let Some(asserted_class) = classes.find(asserted) else {
            return FilterResult::from_bool(entry.has_object_class(asserted));
        };
        FilterResult::from_bool(entry.object_classes().iter().any(|name| {
            classes
                .find(name)
                .map(|class| classes.is_subclass(class.id(), asserted_class.id()))
                .unwrap_or(false)
        }))
    }

    fn equality(&self, entry: &Entry, attribute: &str, value: &str) -> FilterResult {
        let Some(description) = self.resolve(attribute) else {
            return FilterResult::Undefined;
        };
        if self.is_object_class(&description) {
            return self.object_class_matches(entry, value);
        }
        let attribute_type = self.schema.attribute_type(description.attribute_type());
        let Some(rule) = attribute_type.equality() else {
            return FilterResult::Undefined;
        };
        let Some(asserted) = normalize(rule, value) else {
            return FilterResult::Undefined;
        };
        FilterResult::from_bool(
            self.values_for(entry, &description)
                .any(|v| normalize(rule, v).as_ref() == Some(&asserted)),
        )
    }

    fn ordering(&self, entry: &Entry, attribute: &str, value: &str, wanted: Ordering) -> FilterResult {
        let Some(description) = self.resolve(attribute) else {
            return FilterResult::Undefined;
        };
        let attribute_type = self.schema.attribute_type(description.attribute_type());
        let Some(rule) = attribute_type.ordering() else {
            return FilterResult::Undefined;
        };
        let Some(asserted) = normalize(rule, value) else {
            return FilterResult::Undefined;
        };
        FilterResult::from_bool(self.values_for(entry, &description).any(|v| {
            let Some(stored) = normalize(rule, v) else {
                return false;
            };
            let ordering = match rule.comparison {
                Comparison::Integer => compare_integers(&stored, &asserted),
                _ => stored.cmp(&asserted),
            };
            ordering == wanted || ordering == Ordering::Equal
        }))
    }

    fn substring(&self, entry: &Entry, attribute: &str, substring: &SubstringFilter) -> FilterResult {
        let Some(description) = self.resolve(attribute) else {
            return FilterResult::Undefined;
        };
        let attribute_type = self.schema.attribute_type(description.attribute_type());
        let Some(rule) = attribute_type.substrings().or(attribute_type.equality()) else {
            return FilterResult::Undefined;
        };
        let pattern = SubstringFilter {
            initial: substring.initial.as_deref().and_then(|s| normalize(rule, s)),
            any: substring
                .any
                .iter()
                .filter_map(|s| normalize(rule, s))
                .collect(),
            final_: substring.final_.as_deref().and_then(|s| normalize(rule, s)),
        };
        FilterResult::from_bool(self.values_for(entry, &description).any(|v| {
            normalize(rule, v)
                .map(|v| substring_matches(&v, &pattern))
                .unwrap_or(false)
        }))
    }

    fn present(&self, entry: &Entry, attribute: &str) -> FilterResult {
        let Some(description) = self.resolve(attribute) else {
            return FilterResult::False;
        };
        FilterResult::from_bool(self.values_for(entry, &description).next().is_some())
    }

    fn approx(&self, entry: &Entry, attribute: &str, value: &str) -> FilterResult {
        let Some(description) = self.resolve(attribute) else {
            return FilterResult::Undefined;
        };
        if self.is_object_class(&description) {
            return self.object_class_matches(entry, value);
        }
        let asserted = collapse(value).to_lowercase();
        FilterResult::from_bool(
            self.values_for(entry, &description)
                .any(|v| collapse(v).to_lowercase().contains(&asserted)),
        )
    }

    /// The (type, value) pairs of the entry's DN.
    fn dn_values(&self, entry: &Entry) -> Vec<(Arc<AttributeDescription>, String)> {
        split_rdns(&entry.dn)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|rdn| parse_rdn(rdn).ok())
            .flatten()
            .filter_map(|(attribute, value)| {
                self.schema
                    .resolve(&attribute)
                    .ok()
                    .map(|description| (description, value))
            })
            .collect()
    }

    fn extensible(&self, entry: &Entry, assertion: &ExtensibleMatch) -> FilterResult {
        let named_rule = match &assertion.rule {
            Some(name) => match self.schema.find_matching_rule(name) {
                Some(rule) if rule.kind == MatchingRuleKind::Equality => Some(rule),
                _ => {
                    debug!(rule = %name, "Unsupported extensible matching rule");
                    return FilterResult::Undefined;
                }
            },
            None => None,
        };
        let description = match &assertion.attribute {
            Some(attribute) => match self.resolve(attribute) {
                Some(description) => Some(description),
                None => return FilterResult::Undefined,
            },
            None => None,
        };
        let Some(description) = description else {
            // Without a type, the rule applies to every value of a
            // compatible syntax.
            let Some(rule) = named_rule else {
                return FilterResult::Undefined;
            };
            let Some(asserted) = normalize(rule, &assertion.value) else {
                return FilterResult::Undefined;
            };
            let applies = |description: &AttributeDescription| {
                rule.applies_to(
                    self.schema
                        .attribute_type(description.attribute_type())
                        .syntax(),
                )
            };
            let matches = |v: &str| normalize(rule, v).as_ref() == Some(&asserted);
            let in_entry = entry
                .attributes
                .iter()
                .filter(|a| applies(a.description.as_ref()))
                .flat_map(|a| a.values.iter())
                .any(|v| matches(v.as_str()));
            let in_dn = assertion.dn_attributes
                && self
                    .dn_values(entry)
                    .iter()
                    .any(|(description, v)| {
                        applies(description.as_ref()) && matches(v.as_str())
                    });
            return FilterResult::from_bool(in_entry || in_dn);
        };
        if named_rule.is_none() && self.is_object_class(&description) {
            return self.object_class_matches(entry, &assertion.value);
        }
        let attribute_type = self.schema.attribute_type(description.attribute_type());
        let Some(rule) = named_rule.or(attribute_type.equality()) else {
            return FilterResult::Undefined;
        };
        let Some(asserted) = normalize(rule, &assertion.value) else {
            return FilterResult::Undefined;
        };
        let matches = |v: &str| normalize(rule, v).as_ref() == Some(&asserted);
        let in_entry = self
            .values_for(entry, &description)
            .any(|v| matches(v.as_str()));
        let in_dn = assertion.dn_attributes
            && self.dn_values(entry).iter().any(|(dn_description, v)| {
                self.schema
                    .is_subtype_of_with_tags(dn_description, &description)
                    && matches(v.as_str())
            });
        FilterResult::from_bool(in_entry || in_dn)
    }
}

impl FilterEvaluator for SchemaFilterEvaluator {
    fn evaluate(&self, entry: &Entry, filter: &Filter) -> FilterResult {
        match filter {
            Filter::And(filters) => {
                let mut result = FilterResult::True;
                for filter in filters {
                    match self.evaluate(entry, filter) {
                        FilterResult::False => return FilterResult::False,
                        FilterResult::Undefined => result = FilterResult::Undefined,
                        FilterResult::True => {}
                    }
                }
                result
            }
            Filter::Or(filters) => {
                let mut result = FilterResult::False;
                for filter in filters {
                    match self.evaluate(entry, filter) {
                        FilterResult::True => return FilterResult::True,
                        FilterResult::Undefined => result = FilterResult::Undefined,
                        FilterResult::False => {}
                    }
                }
                result
            }
            Filter::Not(filter) => self.evaluate(entry, filter).negate(),
            Filter::Equality(attribute, value) => self.equality(entry, attribute, value),
            Filter::Substring(attribute, substring) => self.substring(entry, attribute, substring),
            Filter::GreaterOrEqual(attribute, value) => {
                self.ordering(entry, attribute, value, Ordering::Greater)
            }
            Filter::LessOrEqual(attribute, value) => {
                self.ordering(entry, attribute, value, Ordering::Less)
            }
            Filter::Present(attribute) => self.present(entry, attribute),
            Filter::Approx(attribute, value) => self.approx(entry, attribute, value),
            Filter::Extensible(assertion) => self.extensible(entry, assertion),
            Filter::Undefined => FilterResult::Undefined,
        }
    }
}

fn collapse(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The form two values are compared in, or `None` when `value` is not valid
/// for the rule.
fn normalize(rule: &MatchingRule, value: &str) -> Option<String> {
    match rule.comparison {
        Comparison::CaseExact => Some(collapse(value)),
        Comparison::CaseIgnore => Some(collapse(value).to_lowercase()),
        Comparison::Telephone => Some(
            value
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .flat_map(char::to_lowercase)
                .collect(),
        ),
        Comparison::Integer => value
            .trim()
            .parse::<i64>()
            .ok()
            .map(|i| i.to_string()),
    }
}

fn compare_integers(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn substring_matches(value: &str, pattern: &SubstringFilter) -> bool {
    let mut rest = value;
    if let Some(initial) = &pattern.initial {
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for any in &pattern.any {
        match rest.find(any.as_str()) {
            Some(index) => rest = &rest[index + any.len()..],
            None => return false,
        }
    }
    match &pattern.final_ {
        Some(final_) => rest.ends_with(final_.as_str()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<Schema>, Entry) {
        let schema = Arc::new(Schema::with_core_schema().unwrap());
        let mut entry = Entry::new("cn=John Doe,dc=com", "cn=john doe,dc=com");
        let mut add = |attribute: &str, values: &[&str]| {
            entry.add_values(
                schema.resolve(attribute).unwrap(),
                values.iter().map(|v| (*v).to_owned()),
            )
        };
        add("objectClass", &["inetOrgPerson"]);
        add("cn", &["John  Doe"]);
        add("sn", &["Doe"]);
        add("telephoneNumber", &["+1 555-1234"]);
        add("employeeNumber", &["42"]);
        add("description;lang-en", &["Hello"]);
        (schema, entry)
    }

    fn eval(filter: Filter) -> FilterResult {
        let (schema, entry) = setup();
        SchemaFilterEvaluator::new(schema).evaluate(&entry, &filter)
    }

    #[test]
    fn test_equality_uses_matching_rules() {
        assert_eq!(eval(Filter::equality("CN", "john doe")), FilterResult::True);
        assert_eq!(eval(Filter::equality("cn", "jane")), FilterResult::False);
        assert_eq!(
            eval(Filter::equality("telephoneNumber", "+15551234")),
            FilterResult::True
        );
        assert_eq!(eval(Filter::equality("employeeNumber", "042")), FilterResult::True);
        assert_eq!(
            eval(Filter::equality("employeeNumber", "abc")),
            FilterResult::Undefined
        );
    }

    #[test]
    fn test_subtypes_and_tags() {
        assert_eq!(eval(Filter::equality("name", "DOE")), FilterResult::True);
        assert_eq!(eval(Filter::present("description")), FilterResult::True);
        assert_eq!(
            eval(Filter::present("description;lang-fr")),
            FilterResult::False
        );
    }

    #[test]
    fn test_object_class_inheritance() {
        assert_eq!(eval(Filter::equality("objectClass", "person")), FilterResult::True);
        assert_eq!(eval(Filter::equality("objectClass", "top")), FilterResult::True);
        assert_eq!(
            eval(Filter::equality("objectClass", "organization")),
            FilterResult::False
        );
    }

    #[test]
    fn test_three_valued_logic() {
        let undefined = Filter::equality("noSuchAttribute", "x");
        assert_eq!(eval(undefined.clone()), FilterResult::Undefined);
        assert_eq!(
            eval(Filter::Not(Box::new(undefined.clone()))),
            FilterResult::Undefined
        );
        assert_eq!(
            eval(Filter::Or(vec![undefined.clone(), Filter::present("cn")])),
            FilterResult::True
        );
        assert_eq!(
            eval(Filter::And(vec![undefined.clone(), Filter::present("mail")])),
            FilterResult::False
        );
        assert_eq!(
            eval(Filter::And(vec![undefined, Filter::present("cn")])),
            FilterResult::Undefined
        );
        assert_eq!(eval(Filter::all()), FilterResult::True);
        assert_eq!(eval(Filter::Or(vec![])), FilterResult::False);
    }

    #[test]
    fn test_substring_and_ordering() {
        let substring = |initial: Option<&str>, any: &[&str], final_: Option<&str>| {
            Filter::Substring(
                "cn".to_owned(),
                SubstringFilter {
                    initial: initial.map(str::to_owned),
                    any: any.iter().map(|s| (*s).to_owned()).collect(),
                    final_: final_.map(str::to_owned),
                },
            )
        };
        assert_eq!(eval(substring(Some("JO"), &["n d"], Some("oe"))), FilterResult::True);
        assert_eq!(eval(substring(None, &["oe"], Some("john"))), FilterResult::False);
        assert_eq!(
            eval(Filter::GreaterOrEqual("employeeNumber".to_owned(), "9".to_owned())),
            FilterResult::True
        );
        assert_eq!(
            eval(Filter::LessOrEqual("employeeNumber".to_owned(), "9".to_owned())),
            FilterResult::False
        );
        assert_eq!(
            eval(Filter::GreaterOrEqual("cn".to_owned(), "a".to_owned())),
            FilterResult::Undefined
        );
    }

    #[test]
    fn test_extensible_match() {
        let extensible = |attribute: Option<&str>, rule: Option<&str>, value: &str, dn: bool| {
            Filter::Extensible(ExtensibleMatch {
                attribute: attribute.map(str::to_owned),
                rule: rule.map(str::to_owned),
                value: value.to_owned(),
                dn_attributes: dn,
            })
        };
        assert_eq!(
            eval(extensible(Some("cn"), None, "JOHN DOE", false)),
            FilterResult::True
        );
        assert_eq!(
            eval(extensible(Some("cn"), Some("caseExactMatch"), "john doe", false)),
            FilterResult::False
        );
        assert_eq!(
            eval(extensible(Some("cn"), Some("2.5.13.5"), "John Doe", false)),
            FilterResult::True
        );
        assert_eq!(
            eval(extensible(None, Some("caseIgnoreMatch"), "doe", false)),
            FilterResult::True
        );
        assert_eq!(
            eval(extensible(None, Some("caseIgnoreMatch"), "com", false)),
            FilterResult::False
        );
        assert_eq!(
            eval(extensible(None, Some("caseIgnoreIA5Match"), "COM", true)),
            FilterResult::True
        );
        assert_eq!(
            eval(extensible(Some("dc"), None, "com", true)),
            FilterResult::True
        );
        assert_eq!(
            eval(extensible(Some("objectClass"), None, "person", false)),
            FilterResult::True
        );
        assert_eq!(
            eval(extensible(None, None, "doe", false)),
            FilterResult::Undefined
        );
        assert_eq!(
            eval(extensible(Some("cn"), Some("noSuchMatch"), "doe", false)),
            FilterResult::Undefined
        );
        assert_eq!(
            eval(extensible(Some("cn"), Some("caseIgnoreSubstringsMatch"), "doe", false)),
            FilterResult::Undefined
        );
    }
}
