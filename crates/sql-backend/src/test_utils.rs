use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use itertools::Itertools;
use ldsql_domain::{AccessControl, AccessRight, AclTarget, Entry};
use ldsql_schema::Schema;
use sea_orm::{Database, DatabaseConnection, DatabaseTransaction, DbErr};

use crate::{
    backend::{Collaborators, SqlBackend},
    configuration::{SqlBackendConfiguration, SqlBackendConfigurationBuilder},
    queries::SqlQueries,
    sql_tables::init_catalog,
    sql_wrap::{SqlConnection, SqlExecutor, SqlRow, SqlTransaction, SqlValue},
};

mockall::mock! {
    pub Access {}
    impl AccessControl for Access {
        fn access_allowed(
            &self,
            entry: &Entry,
            target: &AclTarget,
            values: &[String],
            right: AccessRight,
        ) -> bool;
    }
}

pub async fn get_in_memory_db() -> DatabaseConnection {
    let mut sql_opt = sea_orm::ConnectOptions::new("sqlite::memory:".to_owned());
    sql_opt
        .max_connections(1)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    Database::connect(sql_opt).await.unwrap()
}

pub fn get_schema() -> Arc<Schema> {
    Arc::new(Schema::with_core_schema().unwrap())
}

const FIXTURE: &[&str] = &[
    "CREATE TABLE persons (id INTEGER PRIMARY KEY, name VARCHAR(255), surname VARCHAR(255), employee_no INTEGER)",
    "CREATE TABLE phones (id INTEGER PRIMARY KEY, phone VARCHAR(255) NOT NULL, pers_id INTEGER NOT NULL)",
    "CREATE TABLE institutes (id INTEGER PRIMARY KEY, name VARCHAR(255))",
    "CREATE TABLE referrals (id INTEGER PRIMARY KEY, name VARCHAR(255))",
    "INSERT INTO ldap_oc_mappings (id,name,keytbl,keycol,create_proc,create_keyval,delete_proc,expect_return) VALUES
        (1,'person','persons','id','INSERT INTO persons (name) VALUES (NULL)','SELECT max(id) FROM persons','DELETE FROM persons WHERE id=?',0),
        (2,'organization','institutes','id','INSERT INTO institutes (name) VALUES (NULL)','SELECT max(id) FROM institutes','DELETE FROM institutes WHERE id=?',0),
        (3,'referral','referrals','id',NULL,NULL,NULL,0)",
    "INSERT INTO ldap_attr_mappings (oc_map_id,name,sel_expr,from_tbls,join_where,add_proc,delete_proc,param_order,expect_return) VALUES
        (1,'cn','persons.name','persons',NULL,'UPDATE persons SET name=? WHERE id=?','UPDATE persons SET name=NULL WHERE id=? AND name=?',1,0),
        (1,'sn','persons.surname','persons',NULL,'UPDATE persons SET surname=? WHERE id=?','UPDATE persons SET surname=NULL WHERE id=? AND surname=?',1,0),
        (1,'telephoneNumber','phones.phone','persons,phones','phones.pers_id=persons.id','INSERT INTO phones (phone,pers_id) VALUES (?,?)','DELETE FROM phones WHERE phone=? AND pers_id=?',3,0),
        (1,'employeeNumber','persons.employee_no','persons',NULL,'UPDATE persons SET employee_no=? WHERE id=?','UPDATE persons SET employee_no=NULL WHERE id=? AND employee_no=?',1,0),
        (2,'o','institutes.name','institutes',NULL,'UPDATE institutes SET name=? WHERE id=?','UPDATE institutes SET name=NULL WHERE id=? AND name=?',1,0)",
    "INSERT INTO persons (id,name,surname) VALUES (1,'John Doe','Doe'),(2,'Jane Smith','Smith')",
    "INSERT INTO phones (id,phone,pers_id) VALUES (1,'+1 555 1234',1),(2,'555-9876',1)",
    "INSERT INTO institutes (id,name) VALUES (1,'Acme')",
    "INSERT INTO referrals (id,name) VALUES (1,'Remote')",
    "INSERT INTO ldap_entries (id,dn,oc_map_id,parent,keyval) VALUES
        (1,'o=Acme,dc=example,dc=com',2,0,1),
        (2,'cn=John Doe,o=Acme,dc=example,dc=com',1,1,1),
        (3,'cn=Jane Smith,dc=example,dc=com',1,0,2),
        (4,'cn=Remote,dc=example,dc=com',3,0,1)",
    "INSERT INTO ldap_entry_objclasses (entry_id,oc_name) VALUES (2,'organizationalPerson')",
    "INSERT INTO ldap_referrals (entry_id,url) VALUES (4,'ldap://remote.example.com/dc=remote')",
];

/// The catalog, a small directory of persons and institutes, and a
/// referral.
pub async fn get_fixture_db() -> DatabaseConnection {
    let sql_pool = get_in_memory_db().await;
    init_catalog(&sql_pool).await.unwrap();
    for statement in FIXTURE {
        sql_pool.execute(statement, vec![]).await.unwrap();
    }
    sql_pool
}

pub fn fixture_config() -> SqlBackendConfiguration {
    SqlBackendConfigurationBuilder::default()
        .verbose(true)
        .suffix("dc=example,dc=com".to_owned())
        .create_needs_select(true)
        .base_object(true)
        .build()
        .unwrap()
}

pub fn fixture_queries() -> SqlQueries {
    SqlQueries::new(&fixture_config())
}

pub async fn fixture_backend_with_collaborators(
    config: SqlBackendConfiguration,
    collaborators: impl FnOnce(Collaborators) -> Collaborators,
) -> SqlBackend<DatabaseConnection> {
    let schema = get_schema();
    SqlBackend::open(
        config,
        get_fixture_db().await,
        schema.clone(),
        collaborators(Collaborators::with_defaults(&schema)),
    )
    .await
    .unwrap()
}

pub async fn fixture_backend(config: SqlBackendConfiguration) -> SqlBackend<DatabaseConnection> {
    fixture_backend_with_collaborators(config, |c| c).await
}

pub async fn fixture_backend_with_access(
    config: SqlBackendConfiguration,
    access: Arc<dyn AccessControl>,
) -> SqlBackend<DatabaseConnection> {
    fixture_backend_with_collaborators(config, |c| c.with_access(access)).await
}

const DUMPED_TABLES: &[(&str, &str, usize)] = &[
    ("persons", "id,name,surname,employee_no", 4),
    ("phones", "id,phone,pers_id", 3),
    ("institutes", "id,name", 2),
    ("referrals", "id,name", 2),
    ("ldap_entries", "id,dn,oc_map_id,parent,keyval", 5),
    ("ldap_entry_objclasses", "entry_id,oc_name", 2),
    ("ldap_referrals", "entry_id,url", 2),
];

/// Every row of the fixture tables, as `table: value|value|...`.
pub async fn dump_tables<E: SqlExecutor + ?Sized>(conn: &E) -> Vec<String> {
    let mut dump = Vec::new();
    for (table, columns, count) in DUMPED_TABLES {
        let rows = conn
            .query_rows(
                &format!("SELECT {columns} FROM {table} ORDER BY {columns}"),
                vec![],
                *count,
            )
            .await
            .unwrap();
        dump.extend(rows.into_iter().map(|row| {
            format!(
                "{table}: {}",
                row.iter().map(|c| c.as_deref().unwrap_or("NULL")).join("|")
            )
        }));
    }
    dump
}

/// Counts the statements issued through a connection and its transactions,
/// failing the one with a given index.
#[derive(Clone)]
struct FaultCounter {
    statements: Arc<AtomicUsize>,
    fail_at: Arc<AtomicUsize>,
}

impl FaultCounter {
    fn tick(&self, sql: &str) -> Result<(), DbErr> {
        let index = self.statements.fetch_add(1, Ordering::SeqCst);
        if index == self.fail_at.load(Ordering::SeqCst) {
            return Err(DbErr::Custom(format!(
                "injected failure at statement {index}: {sql}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FaultyConnection {
    inner: DatabaseConnection,
    counter: FaultCounter,
}

impl FaultyConnection {
    pub fn statements(&self) -> usize {
        self.counter.statements.load(Ordering::SeqCst)
    }

    pub fn reset_statements(&self) {
        self.counter.statements.store(0, Ordering::SeqCst);
    }

    /// Fails the `step`-th statement from now on.
    pub fn arm(&self, step: usize) {
        self.reset_statements();
        self.counter.fail_at.store(step, Ordering::SeqCst);
    }
}

pub struct FaultyTransaction {
    inner: DatabaseTransaction,
    counter: FaultCounter,
}

#[async_trait]
impl SqlExecutor for FaultyConnection {
    async fn query_rows(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        columns: usize,
    ) -> Result<Vec<SqlRow>, DbErr> {
        self.counter.tick(sql)?;
        self.inner.query_rows(sql, params, columns).await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, DbErr> {
        self.counter.tick(sql)?;
        self.inner.execute(sql, params).await
    }
}

#[async_trait]
impl SqlExecutor for FaultyTransaction {
    async fn query_rows(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        columns: usize,
    ) -> Result<Vec<SqlRow>, DbErr> {
        self.counter.tick(sql)?;
        self.inner.query_rows(sql, params, columns).await
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64, DbErr> {
        self.counter.tick(sql)?;
        self.inner.execute(sql, params).await
    }
}

#[async_trait]
impl SqlTransaction for FaultyTransaction {
    async fn commit(self) -> Result<(), DbErr> {
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<(), DbErr> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl SqlConnection for FaultyConnection {
    type Transaction = FaultyTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DbErr> {
        Ok(FaultyTransaction {
            inner: SqlConnection::begin(&self.inner).await?,
            counter: self.counter.clone(),
        })
    }
}

/// A fixture backend whose `step`-th statement fails, and the content of
/// the tables before any operation.
pub async fn faulty_backend(
    config: SqlBackendConfiguration,
    step: usize,
) -> (SqlBackend<FaultyConnection>, Vec<String>) {
    let schema = get_schema();
    let connection = FaultyConnection {
        inner: get_fixture_db().await,
        counter: FaultCounter {
            statements: Arc::new(AtomicUsize::new(0)),
            fail_at: Arc::new(AtomicUsize::new(usize::MAX)),
        },
    };
    let backend = SqlBackend::open(
        config,
        connection,
        schema.clone(),
        Collaborators::with_defaults(&schema),
    )
    .await
    .unwrap();
    let pristine = dump_tables(backend.connection()).await;
    backend.connection().arm(step);
    (backend, pristine)
}
