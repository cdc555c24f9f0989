mod filter_compiler;
pub mod sql_builder;

use std::sync::{atomic::Ordering, Arc};

use itertools::Itertools;
use ldap3_proto::{
    proto::{LdapOp, LdapSearchResultEntry, LdapSearchResultReference},
    LdapResultCode,
};
use ldsql_domain::{
    dn::{is_descendant_or_self, is_in_scope},
    AccessRight, AclTarget, Entry, FilterResult, LdapError, LdapResult, SearchRequest,
    SearchScope,
};
use ldsql_schema::{names, AttributeDescription, RequestedAttribute, Schema};
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub use filter_compiler::{FilterCompiler, FilterRequirements, Lowered, Precision};
use sql_builder::{scope_condition, SelectBuilder, SqlFragment};

use crate::{
    backend::BackendInfo,
    entry_id::{EntryId, EntryKey},
    error::{BackendError, Result},
    sql_wrap::{SqlExecutor, SqlRow},
};

/// Receives the results of a search as they are found.
pub trait ResultSink: Send {
    fn entry(&mut self, entry: LdapSearchResultEntry);
    fn reference(&mut self, uris: Vec<String>);
}

impl ResultSink for Vec<LdapOp> {
    fn entry(&mut self, entry: LdapSearchResultEntry) {
        self.push(LdapOp::SearchResultEntry(entry));
    }

    fn reference(&mut self, uris: Vec<String>) {
        self.push(LdapOp::SearchResultReference(LdapSearchResultReference {
            uris,
        }));
    }
}

/// The attribute mappings `id2entry` runs.
#[derive(Clone, Debug)]
pub enum AttributeSelection {
    All,
    /// The mappings able to supply one of these descriptions.
    Only(Vec<Arc<AttributeDescription>>),
}

impl AttributeSelection {
    fn includes(&self, schema: &Schema, description: &AttributeDescription) -> bool {
        match self {
            AttributeSelection::All => true,
            AttributeSelection::Only(wanted) => wanted
                .iter()
                .any(|w| schema.is_subtype_of_with_tags(description, w)),
        }
    }
}

struct SearchPlan {
    base_ndn: String,
    requested: Vec<RequestedAttribute>,
    fetch: AttributeSelection,
    has_subordinates: Option<Arc<AttributeDescription>>,
    entry_uuid: Option<Arc<AttributeDescription>>,
    size_limit: Option<usize>,
    deadline: Option<Instant>,
}

fn min_limit<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl BackendInfo {
    /// Loads an entry, running the selected attribute mappings.
    #[instrument(skip(self, conn, fetch), level = "debug", fields(dn = %id.dn))]
    pub async fn id2entry<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        id: &EntryId,
        fetch: &AttributeSelection,
    ) -> Result<Entry> {
        if id.is_base_object() {
            return self
                .base_entry
                .clone()
                .ok_or_else(|| BackendError::InternalError("no base object".to_owned()));
        }
        let oc_map = self.schema_map.lookup_by_id(id.oc_map_id).ok_or_else(|| {
            BackendError::InvalidBackendValue(format!(
                "entry `{}` has unknown oc_map_id {}",
                id.dn, id.oc_map_id
            ))
        })?;
        let mut entry = Entry::new(id.dn.as_str(), id.ndn.as_str());
        entry.add_values(
            self.schema.resolve(names::OBJECT_CLASS)?,
            [oc_map.name.clone()],
        );
        for mapping in oc_map.attributes() {
            if !fetch.includes(&self.schema, &mapping.description) {
                continue;
            }
            let values = conn
                .query_rows(&mapping.query, vec![id.keyval.to_sql()], 1)
                .await?
                .into_iter()
                .filter_map(|row| row.into_iter().next().flatten())
                .collect_vec();
            if !values.is_empty() {
                entry.add_values(mapping.description.clone(), values);
            }
        }
        if self.config.schema_check {
            match self.schema.structural_object_class(entry.object_classes()) {
                Ok(class) => {
                    let name = self.schema.object_class(class).name().to_owned();
                    entry.add_values(
                        self.schema.resolve(names::STRUCTURAL_OBJECT_CLASS)?,
                        [name],
                    );
                }
                Err(e) => warn!("No structural object class for `{}`: {}", id.dn, e),
            }
        }
        Ok(entry)
    }

    fn candidate_from_row(&self, oc_map_id: i64, row: SqlRow) -> Result<EntryId> {
        let mut columns = row.into_iter();
        let mut next = |what: &str| {
            columns
                .next()
                .flatten()
                .ok_or_else(|| BackendError::InvalidBackendValue(format!("NULL candidate {what}")))
        };
        let id = EntryKey::parse(&next("id")?);
        let keyval = EntryKey::parse(&next("keyval")?);
        let stored_dn = next("dn")?;
        let (dn, ndn) = self
            .collaborators
            .normalizer
            .pretty_normalize(&stored_dn)
            .map_err(|e| {
                BackendError::InvalidBackendValue(format!("stored DN `{stored_dn}`: {e}"))
            })?;
        Ok(EntryId {
            id,
            keyval,
            oc_map_id,
            dn,
            ndn,
        })
    }

    /// Runs one query per object class mapping and collects the entries it
    /// selects, in mapping order.
    #[instrument(skip_all, level = "debug")]
    pub(crate) async fn collect_candidates<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        request: &SearchRequest,
        base: &EntryId,
        requirements: &mut FilterRequirements,
    ) -> Result<Vec<EntryId>> {
        let mut remaining = (self.config.unchecked_limit > 0).then_some(self.config.unchecked_limit);
        let mut candidates = Vec::new();
        if self.base_entry.is_some() && is_in_scope(&self.suffix_ndn, &base.ndn, request.scope) {
            candidates.push(self.base_object_id());
        }
        let scope = scope_condition(&self.queries, base, request.scope);
        for oc_map in self.schema_map.iter() {
            if request.scope == SearchScope::Base && oc_map.id != base.oc_map_id {
                continue;
            }
            let mut compiler = FilterCompiler::new(self, oc_map);
            let lowered = compiler.compile(&request.filter);
            requirements.merge(compiler.into_requirements());
            let Lowered::Match(filter, _) = lowered else {
                debug!("No `{}` entry can match", oc_map.name);
                continue;
            };
            let key = oc_map.key_column();
            let (sql, params) = SelectBuilder::default()
                .distinct()
                .column("ldap_entries.id")
                .column(key.as_str())
                .column("ldap_entries.dn")
                .from("ldap_entries")
                .from(&oc_map.keytbl)
                .condition(SqlFragment::new(format!("{key}=ldap_entries.keyval")))
                .condition(SqlFragment::with_param("ldap_entries.oc_map_id=?", oc_map.id))
                .condition(scope.clone().parenthesize())
                .condition(filter.parenthesize())
                .build()
                .into_parts();
            let rows = conn.query_rows(&sql, params, 3).await?;
            debug!("{} candidates of `{}`", rows.len(), oc_map.name);
            for row in rows {
                if let Some(remaining) = remaining.as_mut() {
                    if *remaining == 0 {
                        return Err(BackendError::AdminLimitExceeded);
                    }
                    *remaining -= 1;
                }
                match self.candidate_from_row(oc_map.id, row) {
                    Ok(candidate) => candidates.push(candidate),
                    Err(e) => warn!("Skipping candidate: {}", e),
                }
            }
        }
        Ok(candidates)
    }

    fn requested_attributes(&self, attributes: &[String]) -> Vec<RequestedAttribute> {
        let requested = self.schema.parse_requested_attributes(attributes);
        if requested.is_empty() {
            vec![RequestedAttribute::AllUserAttributes]
        } else {
            requested
        }
    }

    fn fetch_selection(
        &self,
        requested: &[RequestedAttribute],
        requirements: &FilterRequirements,
    ) -> Result<AttributeSelection> {
        let explicit_only = requested.iter().all(|r| {
            matches!(
                r,
                RequestedAttribute::Description { .. } | RequestedAttribute::NoAttributes
            )
        });
        if requirements.fetch_all || !explicit_only {
            return Ok(AttributeSelection::All);
        }
        let mut wanted = requirements.attributes.clone();
        wanted.extend(requested.iter().filter_map(|r| match r {
            RequestedAttribute::Description { description, .. } => Some(description.clone()),
            _ => None,
        }));
        wanted.push(self.schema.resolve(names::OBJECT_CLASS)?);
        wanted.push(self.schema.resolve(names::REF)?);
        Ok(AttributeSelection::Only(wanted.into_iter().unique().collect()))
    }

    /// A synthesized attribute is computed when the filter or the requested
    /// list names it.
    fn synthesized(
        &self,
        name: &str,
        flagged: bool,
        requested: &[RequestedAttribute],
    ) -> Result<Option<Arc<AttributeDescription>>> {
        let description = self.schema.resolve(name)?;
        Ok(
            (flagged || self.schema.matches_requested_list(&description, requested))
                .then_some(description),
        )
    }

    fn project(
        &self,
        mut entry: Entry,
        requested: &[RequestedAttribute],
        types_only: bool,
    ) -> LdapSearchResultEntry {
        let keep = entry
            .attributes
            .iter()
            .map(|a| {
                self.schema.matches_requested_list(&a.description, requested)
                    && self.collaborators.access.access_allowed(
                        &entry,
                        &AclTarget::Attribute(a.description.clone()),
                        &[],
                        AccessRight::Read,
                    )
            })
            .collect_vec();
        let mut keep = keep.into_iter();
        entry.attributes.retain(|_| keep.next().unwrap_or(false));
        entry.into_ldap_entry(types_only)
    }

    /// A referral base is answered with a referral unless ManageDsaIT is
    /// set.
    async fn check_base_referral<E: SqlExecutor + ?Sized>(
        &self,
        conn: &E,
        base: &EntryId,
        request: &SearchRequest,
    ) -> LdapResult<()> {
        if request.manage_dsa_it || base.is_base_object() {
            return Ok(());
        }
        let ref_description = self.schema.resolve(names::REF).map_err(BackendError::from)?;
        let selection = AttributeSelection::Only(vec![
            self.schema
                .resolve(names::OBJECT_CLASS)
                .map_err(BackendError::from)?,
            ref_description.clone(),
        ]);
        let entry = self.id2entry(conn, base, &selection).await?;
        if entry.has_object_class(names::REFERRAL) {
            return Err(LdapError::new(
                LdapResultCode::Referral,
                format!("Referral: {}", entry.values(&ref_description).join(" ")),
            )
            .with_matched_dn(base.dn.clone()));
        }
        Ok(())
    }

    #[instrument(skip_all, level = "debug", fields(base = %request.base, scope = %request.scope, filter = %request.filter))]
    pub async fn search<E: SqlExecutor + ?Sized, S: ResultSink>(
        &self,
        conn: &E,
        request: &SearchRequest,
        sink: &mut S,
    ) -> LdapResult<()> {
        let base_ndn = self.collaborators.normalizer.normalize(&request.base)?;
        if !is_descendant_or_self(&base_ndn, &self.suffix_ndn) {
            return Err(LdapError::new(
                LdapResultCode::NoSuchObject,
                format!("`{}` is outside of `{}`", request.base, self.suffix_dn),
            ));
        }
        let base = match self.dn_to_id(conn, &base_ndn).await {
            Ok(base) => base,
            Err(BackendError::EntryNotFound(_)) => {
                let matched = self.matched_dn(conn, &base_ndn).await?;
                return Err(LdapError::new(
                    LdapResultCode::NoSuchObject,
                    format!("No such object: {}", request.base),
                )
                .with_matched_dn(matched));
            }
            Err(e) => return Err(e.into()),
        };
        self.check_base_referral(conn, &base, request).await?;

        let requested = self.requested_attributes(&request.attributes);
        let mut requirements = FilterRequirements::default();
        let candidates = self
            .collect_candidates(conn, request, &base, &mut requirements)
            .await?;
        let limit = |l: usize| (l > 0).then_some(l);
        let time_limit = min_limit(
            request.time_limit,
            (self.config.time_limit > 0).then(|| Duration::from_secs(self.config.time_limit)),
        );
        let plan = SearchPlan {
            fetch: self.fetch_selection(&requested, &requirements)?,
            has_subordinates: self.synthesized(
                names::HAS_SUBORDINATES,
                requirements.has_subordinates,
                &requested,
            )?,
            entry_uuid: self.synthesized(names::ENTRY_UUID, requirements.entry_uuid, &requested)?,
            requested,
            base_ndn,
            size_limit: min_limit(limit(request.size_limit), limit(self.config.size_limit)),
            deadline: time_limit.map(|t| Instant::now() + t),
        };
        self.load_and_test(conn, request, &plan, candidates, sink).await
    }

    async fn load_and_test<E: SqlExecutor + ?Sized, S: ResultSink>(
        &self,
        conn: &E,
        request: &SearchRequest,
        plan: &SearchPlan,
        candidates: Vec<EntryId>,
        sink: &mut S,
    ) -> LdapResult<()> {
        let ref_description = self.schema.resolve(names::REF).map_err(BackendError::from)?;
        let mut sent = 0;
        for candidate in candidates {
            if request.abandoned.load(Ordering::Relaxed) {
                debug!("Search abandoned");
                return Err(LdapError::new(LdapResultCode::Other, "Search abandoned"));
            }
            if plan.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(LdapError::new(
                    LdapResultCode::TimeLimitExceeded,
                    "Time limit exceeded",
                ));
            }
            if !is_in_scope(&candidate.ndn, &plan.base_ndn, request.scope) {
                continue;
            }
            let mut entry = self.id2entry(conn, &candidate, &plan.fetch).await?;
            if !request.manage_dsa_it
                && request.scope != SearchScope::Base
                && entry.has_object_class(names::REFERRAL)
            {
                debug!("`{}` is a referral", entry.dn);
                sink.reference(entry.values(&ref_description).to_vec());
                continue;
            }
            if let Some(description) = &plan.has_subordinates {
                let has_children = self.has_children(conn, &candidate.ndn).await?;
                entry.add_values(
                    description.clone(),
                    [if has_children { "TRUE" } else { "FALSE" }.to_owned()],
                );
            }
            if let Some(description) = &plan.entry_uuid {
                entry.add_values(
                    description.clone(),
                    [candidate.entry_uuid().hyphenated().to_string()],
                );
            }
            if !self.collaborators.access.access_allowed(
                &entry,
                &AclTarget::Entry,
                &[],
                AccessRight::Search,
            ) {
                debug!("Search access to `{}` denied", entry.dn);
                continue;
            }
            if self.collaborators.evaluator.evaluate(&entry, &request.filter) != FilterResult::True {
                continue;
            }
            if plan.size_limit.is_some_and(|limit| sent >= limit) {
                return Err(LdapError::new(
                    LdapResultCode::SizeLimitExceeded,
                    "Size limit exceeded",
                ));
            }
            sink.entry(self.project(entry, &plan.requested, request.types_only));
            sent += 1;
        }
        debug!("Sent {} entries", sent);
        Ok(())
    }
}
