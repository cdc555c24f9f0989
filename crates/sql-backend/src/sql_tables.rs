use sea_orm::{
    sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Index, Table},
    ConnectionTrait, DeriveIden,
};
use tracing::{info, instrument};

use crate::configuration::SqlBackendConfiguration;

pub type DbConnection = sea_orm::DatabaseConnection;

/// Opens the connection pool described by the configuration.
#[instrument(skip_all, level = "debug", fields(database_url = ?config.database_url))]
pub async fn connect(config: &SqlBackendConfiguration) -> Result<DbConnection, sea_orm::DbErr> {
    let mut sql_opt = sea_orm::ConnectOptions::new(config.database_url.to_string());
    sql_opt
        .max_connections(config.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    sea_orm::Database::connect(sql_opt).await
}

#[derive(DeriveIden, Clone, Copy)]
pub(crate) enum LdapOcMappings {
    Table,
    Id,
    Name,
    Keytbl,
    Keycol,
    CreateProc,
    CreateKeyval,
    DeleteProc,
    ExpectReturn,
}

#[derive(DeriveIden, Clone, Copy)]
pub(crate) enum LdapAttrMappings {
    Table,
    Id,
    OcMapId,
    Name,
    SelExpr,
    SelExprU,
    FromTbls,
    JoinWhere,
    AddProc,
    DeleteProc,
    ParamOrder,
    ExpectReturn,
}

#[derive(DeriveIden, Clone, Copy)]
pub(crate) enum LdapEntries {
    Table,
    Id,
    Dn,
    DnRu,
    OcMapId,
    Parent,
    Keyval,
}

#[derive(DeriveIden, Clone, Copy)]
pub(crate) enum LdapEntryObjclasses {
    Table,
    EntryId,
    OcName,
}

#[derive(DeriveIden, Clone, Copy)]
pub(crate) enum LdapReferrals {
    Table,
    EntryId,
    Url,
}

/// Creates the mapping catalog and the entry tables, if they are missing.
/// The tables backing the mapped object classes are the deployment's own.
#[instrument(skip_all, level = "debug")]
pub async fn init_catalog(pool: &DbConnection) -> Result<(), sea_orm::DbErr> {
    let builder = pool.get_database_backend();

    pool.execute(
        builder.build(
            Table::create()
                .table(LdapOcMappings::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(LdapOcMappings::Id)
                        .integer()
                        .auto_increment()
                        .not_null()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(LdapOcMappings::Name)
                        .string_len(64)
                        .not_null(),
                )
                .col(
                    ColumnDef::new(LdapOcMappings::Keytbl)
                        .string_len(64)
                        .not_null(),
                )
                .col(
                    ColumnDef::new(LdapOcMappings::Keycol)
                        .string_len(64)
                        .not_null(),
                )
                .col(ColumnDef::new(LdapOcMappings::CreateProc).string_len(255))
                .col(ColumnDef::new(LdapOcMappings::CreateKeyval).string_len(255))
                .col(ColumnDef::new(LdapOcMappings::DeleteProc).string_len(255))
                .col(
                    ColumnDef::new(LdapOcMappings::ExpectReturn)
                        .integer()
                        .not_null()
                        .default(0),
                ),
        ),
    )
    .await?;

    pool.execute(
        builder.build(
            Table::create()
                .table(LdapAttrMappings::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(LdapAttrMappings::Id)
                        .integer()
                        .auto_increment()
                        .not_null()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(LdapAttrMappings::OcMapId)
                        .integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(LdapAttrMappings::Name)
                        .string_len(255)
                        .not_null(),
                )
                .col(
                    ColumnDef::new(LdapAttrMappings::SelExpr)
                        .string_len(255)
                        .not_null(),
                )
                .col(ColumnDef::new(LdapAttrMappings::SelExprU).string_len(255))
                .col(
                    ColumnDef::new(LdapAttrMappings::FromTbls)
                        .string_len(255)
                        .not_null(),
                )
                .col(ColumnDef::new(LdapAttrMappings::JoinWhere).string_len(255))
                .col(ColumnDef::new(LdapAttrMappings::AddProc).string_len(255))
                .col(ColumnDef::new(LdapAttrMappings::DeleteProc).string_len(255))
                .col(
                    ColumnDef::new(LdapAttrMappings::ParamOrder)
                        .integer()
                        .not_null()
                        .default(0),
                )
                .col(
                    ColumnDef::new(LdapAttrMappings::ExpectReturn)
                        .integer()
                        .not_null()
                        .default(0),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("AttrMappingOcForeignKey")
                        .from(LdapAttrMappings::Table, LdapAttrMappings::OcMapId)
                        .to(LdapOcMappings::Table, LdapOcMappings::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                        .on_update(ForeignKeyAction::Cascade),
                ),
        ),
    )
    .await?;

    pool.execute(
        builder.build(
            Table::create()
                .table(LdapEntries::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(LdapEntries::Id)
                        .integer()
                        .auto_increment()
                        .not_null()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(LdapEntries::Dn)
                        .string_len(255)
                        .not_null()
                        .unique_key(),
                )
                .col(ColumnDef::new(LdapEntries::DnRu).string_len(255))
                .col(ColumnDef::new(LdapEntries::OcMapId).integer().not_null())
                .col(ColumnDef::new(LdapEntries::Parent).integer().not_null())
                .col(ColumnDef::new(LdapEntries::Keyval).integer().not_null()),
        ),
    )
    .await?;

    pool.execute(
        builder.build(
            Index::create()
                .if_not_exists()
                .name("ldap_entries_oc_keyval")
                .table(LdapEntries::Table)
                .col(LdapEntries::OcMapId)
                .col(LdapEntries::Keyval)
                .unique(),
        ),
    )
    .await?;

    pool.execute(
        builder.build(
            Table::create()
                .table(LdapEntryObjclasses::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(LdapEntryObjclasses::EntryId)
                        .integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(LdapEntryObjclasses::OcName)
                        .string_len(64)
                        .not_null(),
                ),
        ),
    )
    .await?;

    pool.execute(
        builder.build(
            Table::create()
                .table(LdapReferrals::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(LdapReferrals::EntryId)
                        .integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(LdapReferrals::Url)
                        .string_len(255)
                        .not_null(),
                ),
        ),
    )
    .await?;

    info!("SQL-backend catalog is ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_wrap::SqlExecutor;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_init_catalog_is_idempotent() {
        crate::logging::init_for_tests();
        let sql_pool = crate::test_utils::get_in_memory_db().await;
        init_catalog(&sql_pool).await.unwrap();
        init_catalog(&sql_pool).await.unwrap();
        SqlExecutor::execute(
            &sql_pool,
            "INSERT INTO ldap_entries (dn,oc_map_id,parent,keyval) VALUES (?,?,?,?)",
            vec!["dc=example,dc=com".into(), 1i64.into(), 0i64.into(), 1i64.into()],
        )
        .await
        .unwrap();
        let rows = sql_pool
            .query_rows("SELECT id, dn FROM ldap_entries", vec![], 2)
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![Some("1".to_owned()), Some("dc=example,dc=com".to_owned())]]
        );
    }

    #[tokio::test]
    async fn test_connect_from_configuration() {
        crate::logging::init_for_tests();
        let config = crate::configuration::SqlBackendConfigurationBuilder::default()
            .database_url(crate::database_string::DatabaseUrl::parse("sqlite::memory:").unwrap())
            .max_connections(1)
            .build()
            .unwrap();
        let sql_pool = connect(&config).await.unwrap();
        init_catalog(&sql_pool).await.unwrap();
        let rows = sql_pool
            .query_rows("SELECT count(*) FROM ldap_oc_mappings", vec![], 1)
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Some("0".to_owned())]]);
    }
}
