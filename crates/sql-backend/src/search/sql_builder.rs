use itertools::Itertools;
use ldsql_domain::SearchScope;

use crate::{entry_id::EntryId, queries::SqlQueries, sql_wrap::SqlValue};

/// A piece of SQL together with the values bound to its `?` placeholders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SqlFragment {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// `sql` holds exactly one placeholder.
    pub fn with_param(sql: impl Into<String>, param: impl Into<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params: vec![param.into()],
        }
    }

    /// `1=1`
    pub fn always() -> Self {
        Self::new("1=1")
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn push_param(&mut self, param: impl Into<SqlValue>) -> &mut Self {
        self.sql.push('?');
        self.params.push(param.into());
        self
    }

    pub fn push_fragment(&mut self, other: SqlFragment) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
        self
    }

    /// Joins the fragments with `separator`, each in parentheses.
    pub fn join(separator: &str, fragments: impl IntoIterator<Item = SqlFragment>) -> Self {
        let mut result = SqlFragment::default();
        for (index, fragment) in fragments.into_iter().enumerate() {
            if index > 0 {
                result.push_sql(separator);
            }
            result.push_sql("(").push_fragment(fragment).push_sql(")");
        }
        result
    }

    pub fn parenthesize(self) -> Self {
        let mut result = SqlFragment::new("(");
        result.push_fragment(self).push_sql(")");
        result
    }

    pub fn negate(self) -> Self {
        let mut result = SqlFragment::new("NOT (");
        result.push_fragment(self).push_sql(")");
        result
    }

    /// `expr IN (?,?,...)`
    pub fn in_list(expr: &str, values: impl IntoIterator<Item = SqlValue>) -> Self {
        let values = values.into_iter().collect_vec();
        let mut result = SqlFragment::new(format!(
            "{expr} IN ({})",
            std::iter::repeat("?").take(values.len()).join(",")
        ));
        result.params = values;
        result
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

/// Accumulates the parts of a SELECT statement.
#[derive(Clone, Debug, Default)]
pub struct SelectBuilder {
    distinct: bool,
    columns: Vec<String>,
    tables: Vec<String>,
    conditions: Vec<SqlFragment>,
}

impl SelectBuilder {
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// Adds the comma separated tables of `tables` not listed yet.
    pub fn from(mut self, tables: &str) -> Self {
        for table in tables.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !self.tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                self.tables.push(table.to_owned());
            }
        }
        self
    }

    pub fn condition(mut self, condition: SqlFragment) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn build(self) -> SqlFragment {
        let mut result = SqlFragment::new(format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            self.columns.join(","),
            self.tables.join(",")
        ));
        if !self.conditions.is_empty() {
            result.push_sql(" WHERE ");
            for (index, condition) in self.conditions.into_iter().enumerate() {
                if index > 0 {
                    result.push_sql(" AND ");
                }
                result.push_fragment(condition);
            }
        }
        result
    }
}

/// `LIKE` pattern matching the words of `parts` in order. Stored values may
/// differ from the asserted ones in the whitespace around and between words,
/// so every whitespace run is a wildcard.
pub fn like_pattern<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut pattern = String::from("%");
    for word in parts.into_iter().flat_map(str::split_whitespace) {
        pattern.push_str(word);
        pattern.push('%');
    }
    pattern
}

/// Telephone numbers compare ignoring punctuation: every significant
/// character is surrounded by wildcards.
pub fn telephone_pattern<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut pattern = String::from("%");
    for c in parts
        .into_iter()
        .flat_map(str::chars)
        .filter(|c| !c.is_whitespace() && *c != '-')
    {
        pattern.push(c);
        pattern.push('%');
    }
    pattern
}

/// The scope condition on `ldap_entries` for a search below `base`.
pub fn scope_condition(queries: &SqlQueries, base: &EntryId, scope: SearchScope) -> SqlFragment {
    let dn_column = queries.dn_column();
    match scope {
        SearchScope::Base => {
            let param = queries.dn_param(&base.ndn);
            if param.is_ascii() {
                SqlFragment::with_param(format!("{dn_column}=?"), param)
            } else {
                // The database may not fold non-ASCII characters like we do.
                let pattern: String = param
                    .chars()
                    .map(|c| if c.is_ascii() { c } else { '_' })
                    .collect();
                SqlFragment::with_param(format!("{dn_column} LIKE ?"), pattern)
            }
        }
        SearchScope::OneLevel => {
            SqlFragment::with_param("ldap_entries.parent=?", base.id.to_sql())
        }
        SearchScope::Subtree if base.ndn.is_empty() => SqlFragment::always(),
        SearchScope::Subtree | SearchScope::Subordinate => {
            let param = queries.dn_param(&base.ndn);
            let separator = if scope == SearchScope::Subordinate {
                ","
            } else {
                ""
            };
            let pattern = if queries.uses_dn_ru() {
                format!("{param}{separator}%")
            } else {
                format!("%{separator}{param}")
            };
            SqlFragment::with_param(format!("{dn_column} LIKE ?"), pattern)
        }
    }
}
