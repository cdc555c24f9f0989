use std::{collections::BTreeMap, sync::Arc};

use ldsql_schema::{names, AttributeDescription, DescriptionKey, ObjectClassId, Schema};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{BackendError, Result},
    queries::SqlQueries,
    sql_wrap::{SqlExecutor, SqlRow, SqlValue},
};

/// Bit of `param_order` / `expect_return` governing the add procedure.
const ADD_BIT: i64 = 1;
/// Bit of `param_order` / `expect_return` governing the delete procedure.
const DELETE_BIT: i64 = 2;

/// Order of the bound parameters of an attribute procedure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum ParamOrder {
    #[default]
    KeyvalFirst,
    ValueFirst,
}

impl ParamOrder {
    fn from_flags(flags: i64, bit: i64) -> Self {
        if flags & bit != 0 {
            ParamOrder::ValueFirst
        } else {
            ParamOrder::KeyvalFirst
        }
    }

    pub fn params(self, keyval: SqlValue, value: &str) -> Vec<SqlValue> {
        match self {
            ParamOrder::KeyvalFirst => vec![keyval, value.into()],
            ParamOrder::ValueFirst => vec![value.into(), keyval],
        }
    }
}

/// Whether a procedure reports an LDAP result code in its first column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum ProcReturn {
    #[default]
    NoOutput,
    ReturnCode,
}

impl ProcReturn {
    fn from_flags(flags: i64, bit: i64) -> Self {
        if flags & bit != 0 {
            ProcReturn::ReturnCode
        } else {
            ProcReturn::NoOutput
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttributeMapping {
    pub description: Arc<AttributeDescription>,
    pub sel_expr: String,
    /// Upper-cased select expression, for case-insensitive comparisons.
    pub sel_expr_u: Option<String>,
    pub from_tbls: String,
    pub join_where: Option<String>,
    pub add_proc: Option<String>,
    pub delete_proc: Option<String>,
    pub add_param_order: ParamOrder,
    pub delete_param_order: ParamOrder,
    pub add_return: ProcReturn,
    pub delete_return: ProcReturn,
    /// Selects the values of one entry, bound to its keyval.
    pub query: String,
}

impl AttributeMapping {
    fn build_query(&mut self, key_column: &str) {
        let alias: String = self
            .description
            .name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.query = format!(
            "SELECT {} AS {} FROM {} WHERE {}=?",
            self.sel_expr, alias, self.from_tbls, key_column
        );
        if let Some(join_where) = &self.join_where {
            self.query.push_str(" AND ");
            self.query.push_str(join_where);
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObjectClassMapping {
    pub id: i64,
    pub object_class: ObjectClassId,
    pub name: String,
    pub keytbl: String,
    pub keycol: String,
    pub create_proc: Option<String>,
    /// Retrieves the key of a freshly created row.
    pub create_keyval: Option<String>,
    pub delete_proc: Option<String>,
    pub create_return: ProcReturn,
    pub delete_return: ProcReturn,
    attributes: Vec<AttributeMapping>,
    by_description: BTreeMap<DescriptionKey, usize>,
}

impl ObjectClassMapping {
    pub fn key_column(&self) -> String {
        format!("{}.{}", self.keytbl, self.keycol)
    }

    pub fn attributes(&self) -> &[AttributeMapping] {
        &self.attributes
    }

    fn insert(&mut self, mut mapping: AttributeMapping) {
        mapping.build_query(&self.key_column());
        self.by_description
            .entry(mapping.description.key())
            .or_insert(self.attributes.len());
        self.attributes.push(mapping);
    }

    /// Mapping of `ldap_entry_objclasses`, holding the classes beyond the
    /// mapped one, or of `ldap_referrals`.
    fn synthetic(&self, description: Arc<AttributeDescription>, table: &str, column: &str) -> AttributeMapping {
        let entry_subquery = format!(
            "(SELECT id FROM ldap_entries WHERE oc_map_id={} AND keyval=?)",
            self.id
        );
        AttributeMapping {
            description,
            sel_expr: format!("{table}.{column}"),
            sel_expr_u: None,
            from_tbls: merge_from_clause(&self.keytbl, &format!("ldap_entries,{table}")),
            join_where: Some(format!(
                "ldap_entries.id={table}.entry_id AND ldap_entries.keyval={} AND ldap_entries.oc_map_id={}",
                self.key_column(),
                self.id
            )),
            add_proc: Some(format!(
                "INSERT INTO {table} (entry_id,{column}) VALUES ({entry_subquery},?)"
            )),
            delete_proc: Some(format!(
                "DELETE FROM {table} WHERE entry_id={entry_subquery} AND {column}=?"
            )),
            add_param_order: ParamOrder::KeyvalFirst,
            delete_param_order: ParamOrder::KeyvalFirst,
            add_return: ProcReturn::NoOutput,
            delete_return: ProcReturn::NoOutput,
            query: String::new(),
        }
    }
}

/// Appends to `from` the tables of `other` it does not list yet.
pub fn merge_from_clause(from: &str, other: &str) -> String {
    let mut tables: Vec<&str> = from
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    for table in other.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
            tables.push(table);
        }
    }
    tables.join(",")
}

/// The relational mapping of the directory, loaded once when the backend
/// opens.
#[derive(Clone, Debug, Default)]
pub struct SchemaMap {
    by_id: BTreeMap<i64, ObjectClassMapping>,
    by_oc: BTreeMap<ObjectClassId, i64>,
}

fn column<'a>(row: &'a SqlRow, index: usize) -> Option<&'a str> {
    row.get(index)
        .and_then(|c| c.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

fn required_column<'a>(row: &'a SqlRow, index: usize, what: &str) -> Result<&'a str> {
    column(row, index)
        .ok_or_else(|| BackendError::InvalidBackendValue(format!("missing {what} in mapping row")))
}

fn integer_column(row: &SqlRow, index: usize, what: &str) -> Result<i64> {
    match column(row, index) {
        None => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| BackendError::InvalidBackendValue(format!("{what}: `{value}`"))),
    }
}

impl SchemaMap {
    /// Loads the object class mappings and their attribute mappings. Any
    /// error aborts the whole load.
    #[instrument(skip_all, level = "debug")]
    pub async fn load<E: SqlExecutor + ?Sized>(
        conn: &E,
        schema: &Schema,
        queries: &SqlQueries,
    ) -> Result<SchemaMap> {
        let oc_columns = if queries.create_needs_select { 8 } else { 7 };
        let rows = conn.query_rows(&queries.oc_query, vec![], oc_columns).await?;
        let object_class_description = schema.resolve(names::OBJECT_CLASS)?;
        let ref_description = schema.resolve(names::REF)?;
        let mut map = SchemaMap::default();
        for row in rows {
            let id = integer_column(&row, 0, "object class mapping id")?;
            let name = required_column(&row, 1, "object class name")?;
            let object_class = schema
                .find_object_class(name)
                .ok_or_else(|| BackendError::UnknownObjectClass(name.to_owned()))?;
            let create_proc = column(&row, 4).map(str::to_owned);
            let (create_keyval, delete_index) = if queries.create_needs_select {
                (column(&row, 5).map(str::to_owned), 6)
            } else {
                (None, 5)
            };
            let delete_proc = column(&row, delete_index).map(str::to_owned);
            let expect_return = integer_column(&row, delete_index + 1, "expect_return")?;
            let mut oc_map = ObjectClassMapping {
                id,
                object_class: object_class.id(),
                name: object_class.name().to_owned(),
                keytbl: required_column(&row, 2, "key table")?.to_owned(),
                keycol: required_column(&row, 3, "key column")?.to_owned(),
                create_proc,
                create_keyval,
                delete_proc,
                create_return: ProcReturn::from_flags(expect_return, ADD_BIT),
                delete_return: ProcReturn::from_flags(expect_return, DELETE_BIT),
                attributes: Vec::new(),
                by_description: BTreeMap::new(),
            };
            debug!(
                id,
                object_class = %oc_map.name,
                key = %oc_map.key_column(),
                "Loading object class mapping"
            );
            let object_class_mapping = oc_map.synthetic(
                object_class_description.clone(),
                "ldap_entry_objclasses",
                "oc_name",
            );
            oc_map.insert(object_class_mapping);
            let ref_mapping = oc_map.synthetic(ref_description.clone(), "ldap_referrals", "url");
            oc_map.insert(ref_mapping);

            let at_rows = conn
                .query_rows(&queries.at_query, vec![SqlValue::Integer(id)], 9)
                .await?;
            for at_row in at_rows {
                let at_name = required_column(&at_row, 0, "attribute name")?;
                let description = schema.resolve(at_name).map_err(|e| {
                    warn!("Mapping of `{}` for `{}`: {}", at_name, oc_map.name, e);
                    BackendError::ConstraintViolation(format!(
                        "attribute `{}` of `{}` is not defined in the LDAP schema",
                        at_name, oc_map.name
                    ))
                })?;
                let param_order = integer_column(&at_row, 6, "param_order")?;
                let expect_return = integer_column(&at_row, 7, "expect_return")?;
                oc_map.insert(AttributeMapping {
                    description,
                    sel_expr: required_column(&at_row, 1, "select expression")?.to_owned(),
                    sel_expr_u: column(&at_row, 8).map(str::to_owned),
                    from_tbls: merge_from_clause(
                        required_column(&at_row, 2, "from tables")?,
                        &oc_map.keytbl,
                    ),
                    join_where: column(&at_row, 3).map(str::to_owned),
                    add_proc: column(&at_row, 4).map(str::to_owned),
                    delete_proc: column(&at_row, 5).map(str::to_owned),
                    add_param_order: ParamOrder::from_flags(param_order, ADD_BIT),
                    delete_param_order: ParamOrder::from_flags(param_order, DELETE_BIT),
                    add_return: ProcReturn::from_flags(expect_return, ADD_BIT),
                    delete_return: ProcReturn::from_flags(expect_return, DELETE_BIT),
                    query: String::new(),
                });
            }
            if map.by_id.contains_key(&id) || map.by_oc.contains_key(&oc_map.object_class) {
                return Err(BackendError::ConstraintViolation(format!(
                    "duplicate mapping for object class `{}` (id {})",
                    oc_map.name, id
                )));
            }
            map.by_oc.insert(oc_map.object_class, id);
            map.by_id.insert(id, oc_map);
        }
        info!("Loaded {} object class mappings", map.by_id.len());
        Ok(map)
    }

    pub fn lookup_by_oc(&self, object_class: ObjectClassId) -> Option<&ObjectClassMapping> {
        self.by_oc.get(&object_class).and_then(|id| self.by_id.get(id))
    }

    /// The mapping of `object_class` or of its nearest mapped superclass.
    pub fn lookup_nearest(
        &self,
        schema: &Schema,
        object_class: ObjectClassId,
    ) -> Option<&ObjectClassMapping> {
        schema
            .object_classes()
            .ancestors(object_class)
            .into_iter()
            .find_map(|class| self.lookup_by_oc(class))
    }

    pub fn lookup_by_id(&self, id: i64) -> Option<&ObjectClassMapping> {
        self.by_id.get(&id)
    }

    pub fn lookup_by_name(&self, schema: &Schema, name: &str) -> Option<&ObjectClassMapping> {
        schema
            .find_object_class(name)
            .and_then(|class| self.lookup_by_oc(class.id()))
    }

    pub fn lookup_attr<'a>(
        &self,
        oc_map: &'a ObjectClassMapping,
        description: &AttributeDescription,
    ) -> Option<&'a AttributeMapping> {
        oc_map
            .by_description
            .get(&description.key())
            .map(|index| &oc_map.attributes[*index])
    }

    /// Every mapping that can supply values for `description`: its own, and
    /// those of its subtypes carrying at least its tags.
    pub fn lookup_with_superiors<'a>(
        &self,
        schema: &Schema,
        oc_map: &'a ObjectClassMapping,
        description: &AttributeDescription,
    ) -> Vec<&'a AttributeMapping> {
        oc_map
            .attributes
            .iter()
            .filter(|m| schema.is_subtype_of_with_tags(&m.description, description))
            .collect()
    }

    /// Object class mappings in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectClassMapping> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
