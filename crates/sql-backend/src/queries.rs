use crate::configuration::SqlBackendConfiguration;

const OC_QUERY: &str =
    "SELECT id,name,keytbl,keycol,create_proc,delete_proc,expect_return FROM ldap_oc_mappings";
const OC_QUERY_WITH_KEYVAL: &str = "SELECT id,name,keytbl,keycol,create_proc,create_keyval,delete_proc,expect_return FROM ldap_oc_mappings";

/// SQL derived from the configuration when the backend opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlQueries {
    pub oc_query: String,
    pub at_query: String,
    pub id_query: String,
    pub children_query: String,
    pub insentry_query: String,
    pub reinsentry_query: String,
    pub delentry_query: String,
    pub delobjclasses_query: String,
    pub delreferrals_query: String,
    pub create_needs_select: bool,
    upper_func: Option<String>,
    strcast_func: Option<String>,
    upper_needs_cast: bool,
    dn_ru: bool,
}

impl SqlQueries {
    pub fn new(config: &SqlBackendConfiguration) -> Self {
        let mut queries = Self {
            oc_query: config.oc_query.clone().unwrap_or_else(|| {
                if config.create_needs_select {
                    OC_QUERY_WITH_KEYVAL
                } else {
                    OC_QUERY
                }
                .to_owned()
            }),
            at_query: config.at_query.clone(),
            id_query: String::new(),
            children_query: String::new(),
            insentry_query: config.insentry_query.clone(),
            reinsentry_query: config.reinsentry_query.clone(),
            delentry_query: config.delentry_query.clone(),
            delobjclasses_query: config.delobjclasses_query.clone(),
            delreferrals_query: config.delreferrals_query.clone(),
            create_needs_select: config.create_needs_select,
            upper_func: config.upper_func.clone(),
            strcast_func: config.strcast_func.clone(),
            upper_needs_cast: config.upper_needs_cast,
            dn_ru: config.has_ldapinfo_dn_ru,
        };
        let dn_column = queries.dn_column();
        queries.id_query = format!(
            "SELECT ldap_entries.id,ldap_entries.keyval,ldap_entries.oc_map_id,ldap_entries.dn FROM ldap_entries WHERE {dn_column}=?"
        );
        queries.children_query = format!(
            "SELECT COUNT(DISTINCT subordinates.id) FROM ldap_entries,ldap_entries AS subordinates WHERE subordinates.parent=ldap_entries.id AND {dn_column}=?"
        );
        queries
    }

    pub fn has_upper(&self) -> bool {
        self.upper_func.is_some()
    }

    /// Folds `expr` to upper case in SQL.
    pub fn upper(&self, expr: &str) -> String {
        match (&self.upper_func, &self.strcast_func) {
            (None, _) => expr.to_owned(),
            (Some(upper), Some(cast)) if self.upper_needs_cast => format!("{upper}({cast}({expr}))"),
            (Some(upper), _) => format!("{upper}({expr})"),
        }
    }

    /// The `ldap_entries` column DN comparisons are made against.
    pub fn dn_column(&self) -> String {
        if self.dn_ru {
            "ldap_entries.dn_ru".to_owned()
        } else {
            self.upper("ldap_entries.dn")
        }
    }

    pub fn uses_dn_ru(&self) -> bool {
        self.dn_ru
    }

    /// The form of a normalized DN matching `dn_column`.
    pub fn dn_param(&self, ndn: &str) -> String {
        if self.dn_ru {
            ndn.to_uppercase().chars().rev().collect()
        } else if self.has_upper() {
            ndn.to_uppercase()
        } else {
            ndn.to_owned()
        }
    }
}
