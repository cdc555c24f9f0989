//! Lowering of search filters into SQL conditions, one object class mapping
//! at a time.
//!
//! The SQL produced may select more entries than the filter matches: every
//! candidate is tested against the filter in memory afterwards. It must
//! never select fewer.

use std::sync::Arc;

use ldsql_domain::{ExtensibleMatch, Filter, SubstringFilter};
use ldsql_schema::{names, AttributeDescription, Comparison, MatchingRule, MatchingRuleKind};
use tracing::debug;

use super::sql_builder::{like_pattern, telephone_pattern, SelectBuilder, SqlFragment};
use crate::{
    backend::BackendInfo,
    queries::SqlQueries,
    schema_map::{AttributeMapping, ObjectClassMapping},
    sql_wrap::SqlValue,
};

/// How closely a condition follows the filter it was compiled from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precision {
    /// Selects exactly the entries for which the filter is true, so that its
    /// negation is also safe to push down.
    Exact,
    Approximate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lowered {
    Match(SqlFragment, Precision),
    /// No entry of the object class can match.
    Nothing,
}

impl Lowered {
    fn everything(precision: Precision) -> Self {
        Lowered::Match(SqlFragment::always(), precision)
    }
}

/// What the filter needs from the entry loading phase.
#[derive(Clone, Debug, Default)]
pub struct FilterRequirements {
    pub has_subordinates: bool,
    pub entry_uuid: bool,
    /// An attribute did not resolve: load every mapped attribute.
    pub fetch_all: bool,
    pub attributes: Vec<Arc<AttributeDescription>>,
}

impl FilterRequirements {
    fn add_attribute(&mut self, description: &Arc<AttributeDescription>) {
        if !self.attributes.contains(description) {
            self.attributes.push(description.clone());
        }
    }

    pub fn merge(&mut self, other: FilterRequirements) {
        self.has_subordinates |= other.has_subordinates;
        self.entry_uuid |= other.entry_uuid;
        self.fetch_all |= other.fetch_all;
        for description in &other.attributes {
            self.add_attribute(description);
        }
    }
}

fn upper_expression(queries: &SqlQueries, mapping: &AttributeMapping) -> String {
    mapping
        .sel_expr_u
        .clone()
        .unwrap_or_else(|| queries.upper(&mapping.sel_expr))
}

/// Folds a `LIKE` pattern to upper case. The database may not fold
/// non-ASCII characters like we do, so those become wildcards.
fn fold(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_uppercase() } else { '%' })
        .collect()
}

fn like(queries: &SqlQueries, mapping: &AttributeMapping, pattern: &str, case_fold: bool) -> SqlFragment {
    if case_fold && queries.has_upper() {
        SqlFragment::with_param(
            format!("{} LIKE ?", upper_expression(queries, mapping)),
            fold(pattern),
        )
    } else {
        SqlFragment::with_param(format!("{} LIKE ?", mapping.sel_expr), pattern)
    }
}

fn equality_condition(
    queries: &SqlQueries,
    mapping: &AttributeMapping,
    rule: &MatchingRule,
    value: &str,
) -> Option<(SqlFragment, Precision)> {
    match rule.comparison {
        Comparison::Integer => {
            let value: i64 = value.trim().parse().ok()?;
            Some((
                SqlFragment::with_param(format!("{}=?", mapping.sel_expr), value),
                Precision::Exact,
            ))
        }
        Comparison::Telephone => Some((
            like(queries, mapping, &telephone_pattern([value]), true),
            Precision::Approximate,
        )),
        // Whitespace runs are insignificant to the string rules.
        Comparison::CaseIgnore | Comparison::CaseExact => Some((
            like(queries, mapping, &like_pattern([value]), rule.is_case_insensitive()),
            Precision::Approximate,
        )),
    }
}

fn ordering_condition(
    mapping: &AttributeMapping,
    rule: &MatchingRule,
    operator: &str,
    value: &str,
) -> Option<SqlFragment> {
    match rule.comparison {
        Comparison::Integer => {
            let value: i64 = value.trim().parse().ok()?;
            Some(SqlFragment::with_param(
                format!("{}{operator}?", mapping.sel_expr),
                value,
            ))
        }
        // The database cannot order strings with their whitespace collapsed.
        _ => Some(SqlFragment::new(format!("{} IS NOT NULL", mapping.sel_expr))),
    }
}

fn substring_condition(
    queries: &SqlQueries,
    mapping: &AttributeMapping,
    rule: &MatchingRule,
    substring: &SubstringFilter,
) -> SqlFragment {
    let parts = substring
        .initial
        .iter()
        .chain(substring.any.iter())
        .chain(substring.final_.iter())
        .map(String::as_str);
    if rule.is_telephone() {
        return like(queries, mapping, &telephone_pattern(parts), true);
    }
    like(queries, mapping, &like_pattern(parts), rule.is_case_insensitive())
}

/// Compiles a filter for the candidates of one object class mapping.
pub struct FilterCompiler<'a> {
    info: &'a BackendInfo,
    oc_map: &'a ObjectClassMapping,
    requirements: FilterRequirements,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(info: &'a BackendInfo, oc_map: &'a ObjectClassMapping) -> Self {
        Self {
            info,
            oc_map,
            requirements: FilterRequirements::default(),
        }
    }

    pub fn into_requirements(self) -> FilterRequirements {
        self.requirements
    }

    pub fn compile(&mut self, filter: &Filter) -> Lowered {
        match filter {
            Filter::And(filters) => {
                let mut parts = Vec::with_capacity(filters.len());
                let mut precision = Precision::Exact;
                for filter in filters {
                    match self.compile(filter) {
                        Lowered::Nothing => return Lowered::Nothing,
                        Lowered::Match(fragment, p) => {
                            precision = precision.max(p);
                            parts.push(fragment);
                        }
                    }
                }
                if parts.is_empty() {
                    Lowered::everything(precision)
                } else {
                    Lowered::Match(SqlFragment::join(" AND ", parts), precision)
                }
            }
            Filter::Or(filters) => {
                let mut parts = Vec::with_capacity(filters.len());
                let mut precision = Precision::Exact;
                for filter in filters {
                    if let Lowered::Match(fragment, p) = self.compile(filter) {
                        precision = precision.max(p);
                        parts.push(fragment);
                    }
                }
                if parts.is_empty() {
                    Lowered::Nothing
                } else {
                    Lowered::Match(SqlFragment::join(" OR ", parts), precision)
                }
            }
            Filter::Not(filter) => match self.compile(filter) {
                Lowered::Match(fragment, Precision::Exact) => {
                    Lowered::Match(fragment.negate(), Precision::Exact)
                }
                _ => Lowered::everything(Precision::Approximate),
            },
            Filter::Undefined => Lowered::Nothing,
            Filter::Equality(attribute, _)
            | Filter::Substring(attribute, _)
            | Filter::GreaterOrEqual(attribute, _)
            | Filter::LessOrEqual(attribute, _)
            | Filter::Present(attribute)
            | Filter::Approx(attribute, _)
            | Filter::Extensible(ExtensibleMatch {
                attribute: Some(attribute),
                dn_attributes: false,
                ..
            }) => self.compile_assertion(attribute, filter),
            // Matched against any attribute or the DN: tested in memory only.
            Filter::Extensible(_) => {
                self.requirements.fetch_all = true;
                Lowered::everything(Precision::Approximate)
            }
        }
    }

    fn compile_assertion(&mut self, attribute: &str, filter: &Filter) -> Lowered {
        let info = self.info;
        let description = match info.schema.resolve(attribute) {
            Ok(description) => description,
            Err(e) => {
                debug!(attribute, "Unresolvable filter attribute: {}", e);
                self.requirements.fetch_all = true;
                return Lowered::everything(Precision::Approximate);
            }
        };
        let attribute_type = info.schema.attribute_type(description.attribute_type());
        let type_name = attribute_type.name();
        if type_name.eq_ignore_ascii_case(names::OBJECT_CLASS) {
            return self.compile_object_class(filter);
        }
        if type_name.eq_ignore_ascii_case(names::HAS_SUBORDINATES) {
            self.requirements.has_subordinates = true;
            return Lowered::everything(Precision::Approximate);
        }
        if type_name.eq_ignore_ascii_case(names::ENTRY_UUID) {
            self.requirements.entry_uuid = true;
            return Lowered::everything(Precision::Approximate);
        }
        if type_name.eq_ignore_ascii_case(names::STRUCTURAL_OBJECT_CLASS) {
            return Lowered::everything(Precision::Approximate);
        }
        let queries = &info.queries;
        match filter {
            Filter::Equality(_, value) => {
                let Some(rule) = attribute_type.equality() else {
                    return Lowered::Nothing;
                };
                self.mapped(&description, |mapping| {
                    equality_condition(queries, mapping, rule, value)
                })
            }
            Filter::Substring(_, substring) => {
                let Some(rule) = attribute_type
                    .substrings()
                    .or(attribute_type.equality())
                else {
                    return Lowered::Nothing;
                };
                self.mapped(&description, |mapping| {
                    Some((
                        substring_condition(queries, mapping, rule, substring),
                        Precision::Approximate,
                    ))
                })
            }
            Filter::GreaterOrEqual(_, value) | Filter::LessOrEqual(_, value) => {
                let Some(rule) = attribute_type.ordering() else {
                    return Lowered::Nothing;
                };
                let operator = if matches!(filter, Filter::GreaterOrEqual(..)) {
                    ">="
                } else {
                    "<="
                };
                self.mapped(&description, |mapping| {
                    ordering_condition(mapping, rule, operator, value)
                        .map(|condition| (condition, Precision::Approximate))
                })
            }
            Filter::Present(_) => self.mapped(&description, |mapping| {
                Some((
                    SqlFragment::new(format!("{} IS NOT NULL", mapping.sel_expr)),
                    Precision::Exact,
                ))
            }),
            Filter::Approx(_, value) => self.mapped(&description, |mapping| {
                Some((
                    like(queries, mapping, &like_pattern([value.as_str()]), true),
                    Precision::Approximate,
                ))
            }),
            Filter::Extensible(assertion) => {
                let rule = match &assertion.rule {
                    Some(name) => info
                        .schema
                        .find_matching_rule(name)
                        .filter(|rule| rule.kind == MatchingRuleKind::Equality),
                    None => attribute_type.equality(),
                };
                let Some(rule) = rule else {
                    return Lowered::everything(Precision::Approximate);
                };
                self.mapped(&description, |mapping| {
                    equality_condition(queries, mapping, rule, &assertion.value)
                })
            }
            _ => Lowered::everything(Precision::Approximate),
        }
    }

    /// Applies `condition` to every mapping able to supply `description`:
    /// `key IN (SELECT key FROM tables WHERE join AND condition)`, ORed.
    fn mapped<F>(&mut self, description: &Arc<AttributeDescription>, condition: F) -> Lowered
    where
        F: Fn(&AttributeMapping) -> Option<(SqlFragment, Precision)>,
    {
        let mappings =
            self.info
                .schema_map
                .lookup_with_superiors(&self.info.schema, self.oc_map, description);
        if mappings.is_empty() {
            debug!(
                "`{}` is not mapped for `{}`",
                description.name(),
                self.oc_map.name
            );
            return Lowered::everything(Precision::Approximate);
        }
        self.requirements.add_attribute(description);
        let key = self.oc_map.key_column();
        let mut parts = Vec::with_capacity(mappings.len());
        let mut precision = Precision::Exact;
        for mapping in mappings {
            let Some((condition, p)) = condition(mapping) else {
                continue;
            };
            precision = precision.max(p);
            let mut select = SelectBuilder::default()
                .column(key.as_str())
                .from(&mapping.from_tbls);
            if let Some(join_where) = &mapping.join_where {
                select = select.condition(SqlFragment::new(join_where.as_str()).parenthesize());
            }
            let mut part = SqlFragment::new(format!("{key} IN ("));
            part.push_fragment(select.condition(condition).build())
                .push_sql(")");
            parts.push(part);
        }
        match parts.len() {
            0 => Lowered::Nothing,
            1 => Lowered::Match(parts.remove(0), precision),
            _ => Lowered::Match(SqlFragment::join(" OR ", parts), precision),
        }
    }

    fn compile_object_class(&mut self, filter: &Filter) -> Lowered {
        match filter {
            Filter::Present(_) => Lowered::everything(Precision::Exact),
            Filter::Equality(_, value) | Filter::Approx(_, value) => {
                self.object_class_equality(value.trim())
            }
            _ => Lowered::everything(Precision::Approximate),
        }
    }

    fn object_class_equality(&self, value: &str) -> Lowered {
        let classes = self.info.schema.object_classes();
        let names: Vec<String> = match classes.find(value) {
            Some(asserted) => {
                if classes.is_subclass(self.oc_map.object_class, asserted.id()) {
                    return Lowered::everything(Precision::Exact);
                }
                classes
                    .iter()
                    .filter(|class| classes.is_subclass(class.id(), asserted.id()))
                    .flat_map(|class| class.names().iter().cloned())
                    .collect()
            }
            None => vec![value.to_owned()],
        };
        let queries = &self.info.queries;
        let column = queries.upper("ldap_entry_objclasses.oc_name");
        let values = names.into_iter().map(|name| {
            SqlValue::Text(if queries.has_upper() {
                name.to_uppercase()
            } else {
                name
            })
        });
        let mut condition = SqlFragment::new(
            "ldap_entries.id IN (SELECT ldap_entry_objclasses.entry_id FROM ldap_entry_objclasses WHERE ",
        );
        condition
            .push_fragment(SqlFragment::in_list(&column, values))
            .push_sql(")");
        Lowered::Match(condition, Precision::Approximate)
    }
}
