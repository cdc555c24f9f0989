use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::database_string::DatabaseUrl;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://ldap.db?mode=rwc";

#[derive(Clone, derive_more::Debug, Deserialize, Serialize, derive_builder::Builder)]
#[builder(pattern = "owned")]
pub struct SqlBackendConfiguration {
    #[builder(default = r#"default_database_url()"#)]
    pub database_url: DatabaseUrl,
    #[builder(default = "5")]
    pub max_connections: u32,
    /// The naming context served by the backend.
    #[builder(default = r#"String::from("dc=example,dc=com")"#)]
    pub suffix: String,

    /// Object class mapping query. When unset, derived from
    /// `create_needs_select`.
    #[builder(default)]
    pub oc_query: Option<String>,
    #[builder(
        default = r#"String::from("SELECT name,sel_expr,from_tbls,join_where,add_proc,delete_proc,param_order,expect_return,sel_expr_u FROM ldap_attr_mappings WHERE oc_map_id=?")"#
    )]
    pub at_query: String,
    #[builder(
        default = r#"String::from("INSERT INTO ldap_entries (dn,oc_map_id,parent,keyval) VALUES (?,?,?,?)")"#
    )]
    pub insentry_query: String,
    /// Re-inserts an entry under its previous id, for modrdn.
    #[builder(
        default = r#"String::from("INSERT INTO ldap_entries (id,dn,oc_map_id,parent,keyval) VALUES (?,?,?,?,?)")"#
    )]
    pub reinsentry_query: String,
    #[builder(default = r#"String::from("DELETE FROM ldap_entries WHERE id=?")"#)]
    pub delentry_query: String,
    #[builder(default = r#"String::from("DELETE FROM ldap_entry_objclasses WHERE entry_id=?")"#)]
    pub delobjclasses_query: String,
    #[builder(default = r#"String::from("DELETE FROM ldap_referrals WHERE entry_id=?")"#)]
    pub delreferrals_query: String,

    /// SQL function folding strings to upper case. `None` when the database
    /// compares case-insensitively on its own.
    #[builder(default = r#"Some(String::from("UPPER"))"#)]
    pub upper_func: Option<String>,
    /// Wrap the upper-cased expression in `strcast_func`.
    #[builder(default = "false")]
    pub upper_needs_cast: bool,
    #[builder(default)]
    pub strcast_func: Option<String>,
    /// Compare DNs against the reversed, upper-cased `dn_ru` column.
    #[builder(default = "false")]
    pub has_ldapinfo_dn_ru: bool,
    /// The create procedures do not return the new key; run the mapping's
    /// `create_keyval` query after them.
    #[builder(default = "false")]
    pub create_needs_select: bool,
    /// Refuse writes touching attributes or classes without a mapping.
    #[builder(default = "false")]
    pub fail_if_no_mapping: bool,
    #[builder(default = "false")]
    pub schema_check: bool,
    /// Serve the suffix entry without storing it.
    #[builder(default = "false")]
    pub base_object: bool,
    /// Accept entries whose parent does not exist.
    #[builder(default = "false")]
    pub allow_orphans: bool,

    /// Maximum number of candidates collected by one search, 0 for none.
    #[builder(default)]
    pub unchecked_limit: usize,
    /// 0 for none.
    #[builder(default)]
    pub size_limit: usize,
    /// In seconds, 0 for none.
    #[builder(default)]
    pub time_limit: u64,

    #[builder(default = "false")]
    pub verbose: bool,
}

fn default_database_url() -> DatabaseUrl {
    match Url::parse(DEFAULT_DATABASE_URL) {
        Ok(url) => url.into(),
        Err(e) => unreachable!("invalid default database URL: {e}"),
    }
}

impl std::default::Default for SqlBackendConfiguration {
    fn default() -> Self {
        SqlBackendConfigurationBuilder::default().build().unwrap()
    }
}

impl SqlBackendConfigurationBuilder {
    #[cfg(test)]
    pub fn for_tests() -> SqlBackendConfiguration {
        SqlBackendConfigurationBuilder::default()
            .verbose(true)
            .suffix("dc=example,dc=com".to_owned())
            .build()
            .unwrap()
    }
}

/// Loads the configuration from the defaults, then `config_file`, then
/// `LDSQL_`-prefixed environment variables.
pub fn init(config_file: &str) -> Result<SqlBackendConfiguration> {
    info!("Loading configuration from {}", config_file);
    let config: SqlBackendConfiguration = Figment::from(Serialized::defaults(
        SqlBackendConfiguration::default(),
    ))
    .merge(Toml::file(config_file))
    .merge(Env::prefixed("LDSQL_").split("__"))
    .extract()
    .context("while parsing the configuration")?;
    if config.verbose {
        info!("Configuration: {:#?}", &config);
    }
    Ok(config)
}
