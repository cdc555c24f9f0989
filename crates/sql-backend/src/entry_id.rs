use ldsql_domain::dn::{is_descendant_or_self, parent_dn};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    backend::BackendInfo,
    error::{BackendError, Result},
    sql_wrap::{SqlExecutor, SqlRow, SqlValue},
};

/// Object class map id of the synthetic suffix entry.
pub const BASE_OBJECT_OC_MAP_ID: i64 = 0;

const BASE_CHILDREN_QUERY: &str = "SELECT COUNT(id) FROM ldap_entries WHERE parent=?";

/// A primary key as stored by the database: numeric, or arbitrary text.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum EntryKey {
    Numeric(i64),
    Arbitrary(String),
}

impl EntryKey {
    pub const BASE_OBJECT: EntryKey = EntryKey::Numeric(0);

    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(n) => EntryKey::Numeric(n),
            Err(_) => EntryKey::Arbitrary(raw.to_owned()),
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            EntryKey::Numeric(n) => SqlValue::Integer(*n),
            EntryKey::Arbitrary(s) => SqlValue::Text(s.clone()),
        }
    }
}

/// Identity of a stored entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryId {
    /// Row id in `ldap_entries`.
    pub id: EntryKey,
    /// Key of the row in the object class's key table.
    pub keyval: EntryKey,
    pub oc_map_id: i64,
    pub dn: String,
    pub ndn: String,
}

impl EntryId {
    pub fn is_base_object(&self) -> bool {
        self.oc_map_id == BASE_OBJECT_OC_MAP_ID && self.id == EntryKey::BASE_OBJECT
    }

    /// A stable UUID derived from the object class map and the entry id.
    pub fn entry_uuid(&self) -> Uuid {
        Uuid::new_v3(
            &Uuid::NAMESPACE_OID,
            format!("{}:{}", self.oc_map_id, self.id).as_bytes(),
        )
    }
}

fn first_column(rows: &[SqlRow]) -> Option<&str> {
    rows.first()
        .and_then(|row| row.first())
        .and_then(|c| c.as_deref())
}

/// Parses a COUNT result. Some drivers report counts as decimals.
pub(crate) fn parse_count(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let (integer, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if !fraction.chars().all(|c| c == '0') {
        return Err(BackendError::InvalidBackendValue(format!(
            "fractional count `{raw}`"
        )));
    }
    integer
        .parse()
        .map_err(|_| BackendError::InvalidBackendValue(format!("count `{raw}`")))
}

impl BackendInfo {
    pub(crate) fn base_object_id(&self) -> EntryId {
        EntryId {
            id: EntryKey::BASE_OBJECT,
            keyval: EntryKey::BASE_OBJECT,
            oc_map_id: BASE_OBJECT_OC_MAP_ID,
            dn: self.suffix_dn.clone(),
            ndn: self.suffix_ndn.clone(),
        }
    }

    fn is_base_object_dn(&self, ndn: &str) -> bool {
        self.base_entry.is_some() && ndn == self.suffix_ndn
    }

    /// Resolves a normalized DN to the identity of the stored entry.
    #[instrument(skip(self, conn), level = "debug")]
    pub async fn dn_to_id<E: SqlExecutor + ?Sized>(&self, conn: &E, ndn: &str) -> Result<EntryId> {
        if self.is_base_object_dn(ndn) {
            return Ok(self.base_object_id());
        }
        let rows = conn
            .query_rows(
                &self.queries.id_query,
                vec![self.queries.dn_param(ndn).into()],
                4,
            )
            .await?;
        if rows.len() > 1 {
            warn!("{} rows for DN `{}`, using the first one", rows.len(), ndn);
        }
        let Some(row) = rows.into_iter().next() else {
            debug!("No entry for `{}`", ndn);
            return Err(BackendError::EntryNotFound(ndn.to_owned()));
        };
        let column = |index: usize, what: &str| {
            row.get(index)
                .cloned()
                .flatten()
                .ok_or_else(|| BackendError::InvalidBackendValue(format!("NULL {what} for `{ndn}`")))
        };
        let oc_map_id = column(2, "oc_map_id")?;
        let stored_dn = column(3, "dn")?;
        let (dn, ndn) = self
            .collaborators
            .normalizer
            .pretty_normalize(&stored_dn)
            .map_err(|e| {
                BackendError::InvalidBackendValue(format!("stored DN `{stored_dn}`: {e}"))
            })?;
        Ok(EntryId {
            id: EntryKey::parse(&column(0, "id")?),
            keyval: EntryKey::parse(&column(1, "keyval")?),
            oc_map_id: oc_map_id.trim().parse().map_err(|_| {
                BackendError::InvalidBackendValue(format!("oc_map_id `{oc_map_id}`"))
            })?,
            dn,
            ndn,
        })
    }

    #[instrument(skip(self, conn), level = "debug")]
    pub async fn count_children<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        ndn: &str,
    ) -> Result<u64> {
        let rows = if self.is_base_object_dn(ndn) {
            conn.query_rows(
                BASE_CHILDREN_QUERY,
                vec![EntryKey::BASE_OBJECT.to_sql()],
                1,
            )
            .await?
        } else {
            conn.query_rows(
                &self.queries.children_query,
                vec![self.queries.dn_param(ndn).into()],
                1,
            )
            .await?
        };
        first_column(&rows).map(parse_count).unwrap_or(Ok(0))
    }

    pub async fn has_children<E: SqlExecutor + ?Sized>(&self, conn: &E, ndn: &str) -> Result<bool> {
        Ok(self.count_children(conn, ndn).await? > 0)
    }

    /// The nearest existing ancestor of a missing entry, within the suffix.
    pub async fn matched_dn<E: SqlExecutor + ?Sized>(&self, conn: &E, ndn: &str) -> Result<String> {
        let mut current = parent_dn(ndn);
        while let Some(dn) = current {
            if dn.is_empty() || !is_descendant_or_self(dn, &self.suffix_ndn) {
                break;
            }
            match self.dn_to_id(conn, dn).await {
                Ok(id) => return Ok(id.dn),
                Err(BackendError::EntryNotFound(_)) => current = parent_dn(dn),
                Err(e) => return Err(e),
            }
        }
        Ok(String::new())
    }
}
