//! SQLite database with Diesel ORM
//!
//! Stores users, goals, milestones and tasks. Tables are bootstrapped with
//! `CREATE TABLE IF NOT EXISTS` on open, and the schema version is recorded
//! in `schema_versions`.

use crate::schema::*;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Walk up directory tree to find .goalify folder (like git finds .git)
/// Can be overridden with GOALIFY_DB_PATH env var
fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("GOALIFY_DB_PATH") {
        return PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let goalify_dir = dir.join(".goalify");
            if goalify_dir.is_dir() {
                return goalify_dir.join("goalify.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // No .goalify found - `goalify init` creates it here
    PathBuf::from(".goalify/goalify.db")
}

/// Current schema version for goalify
pub const CURRENT_SCHEMA: GoalifySchema = GoalifySchema {
    major: 1,
    minor: 1,
    patch: 0,
    name: "goal-tree",
    features: &["users", "api_tokens", "goals", "milestones", "tasks"],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct GoalifySchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl GoalifySchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for GoalifySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

/// Current local time in the format every `*_at` column uses
pub fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339()
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

// ============================================================================
// Account Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub password_salt: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Queryable user. Credential columns never leave the process.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub password_salt: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = api_tokens)]
pub struct NewApiToken<'a> {
    pub user_id: i32,
    pub token_hash: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = api_tokens)]
pub struct ApiToken {
    pub id: i32,
    pub user_id: i32,
    pub token_hash: String,
    pub created_at: String,
    pub revoked_at: Option<String>,
}

// ============================================================================
// Goal Tree Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = goals)]
pub struct NewGoal<'a> {
    pub user_id: i32,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub priority: &'a str,
    pub status: &'a str,
    pub progress_percentage: f64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = goals)]
pub struct Goal {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub priority: String,
    pub status: String,
    pub progress_percentage: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial goal update; `None` leaves a column untouched
#[derive(AsChangeset, Default)]
#[diesel(table_name = goals)]
pub struct GoalChangeset<'a> {
    pub title: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub priority: Option<&'a str>,
    pub status: Option<&'a str>,
    pub progress_percentage: Option<f64>,
    pub updated_at: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = milestones)]
pub struct NewMilestone<'a> {
    pub goal_id: i32,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub due_date: NaiveDate,
    pub status: &'a str,
    pub priority: &'a str,
    pub progress_percentage: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = milestones)]
pub struct Milestone {
    pub id: i32,
    pub goal_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub due_date: NaiveDate,
    pub status: String,
    pub priority: String,
    pub progress_percentage: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = milestones)]
pub struct MilestoneChangeset<'a> {
    pub title: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<&'a str>,
    pub priority: Option<&'a str>,
    pub progress_percentage: Option<i32>,
    pub updated_at: Option<&'a str>,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub milestone_id: i32,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: &'a str,
    pub priority: &'a str,
    pub due_date: Option<NaiveDate>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = tasks)]
pub struct Task {
    pub id: i32,
    pub milestone_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub due_date: Option<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = tasks)]
pub struct TaskChangeset<'a> {
    pub title: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub status: Option<&'a str>,
    pub priority: Option<&'a str>,
    pub due_date: Option<Option<NaiveDate>>,
    pub updated_at: Option<&'a str>,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas. SQLite leaves foreign keys off unless asked.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA busy_timeout = 5000")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Default database location (respects GOALIFY_DB_PATH env var)
    pub fn db_path() -> PathBuf {
        get_db_path()
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self {
            pool,
            path: path.as_ref().to_path_buf(),
        };
        db.init_schema()?;
        tracing::debug!(path = %db.path.display(), "database ready");
        Ok(db)
    }

    /// Path this database was opened at
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                password_salt TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS api_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                revoked_at TEXT,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS goals (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'medium',
                status TEXT NOT NULL DEFAULT 'pending',
                progress_percentage REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS milestones (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                goal_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                due_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'medium',
                progress_percentage INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (goal_id) REFERENCES goals(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                milestone_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'medium',
                due_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (milestone_id) REFERENCES milestones(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tokens_user ON api_tokens(user_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_goals_user ON goals(user_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_goals_status ON goals(status)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_milestones_goal ON milestones(goal_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tasks_milestone ON tasks(milestone_id)").execute(&mut conn)?;

        self.register_schema(&mut conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &GoalifySchema) -> Result<()> {
        let now = now_rfc3339();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    /// Schema versions this database has seen, oldest first
    pub fn stored_schemas(&self) -> Result<Vec<StoredSchema>> {
        let mut conn = self.get_conn()?;
        let rows = schema_versions::table
            .order(schema_versions::id.asc())
            .select(StoredSchema::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    /// Row counts per table
    pub fn summary(&self) -> Result<DbSummary> {
        let mut conn = self.get_conn()?;
        let total_users: i64 = users::table.count().get_result(&mut conn)?;
        let total_goals: i64 = goals::table.count().get_result(&mut conn)?;
        let total_milestones: i64 = milestones::table.count().get_result(&mut conn)?;
        let total_tasks: i64 = tasks::table.count().get_result(&mut conn)?;
        Ok(DbSummary {
            total_users,
            total_goals,
            total_milestones,
            total_tasks,
        })
    }
}

/// Last rowid inserted on this connection
pub(crate) fn last_insert_id(conn: &mut SqliteConnection) -> diesel::QueryResult<i32> {
    diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .first(conn)
}

/// Summary statistics from the database
#[derive(Debug, Clone, Serialize)]
pub struct DbSummary {
    pub total_users: i64,
    pub total_goals: i64,
    pub total_milestones: i64,
    pub total_tasks: i64,
}
