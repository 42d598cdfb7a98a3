//! Revision fetching from the wiki database.
//!
//! The core only depends on [`DataSource`]: something that accepts a query
//! string and returns tab-delimited rows in MySQL batch format. Two sources
//! are provided, the `mysql` command-line client and a read-only SQLite file
//! for wikis running on the SQLite backend.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::DataSourceError;

pub const NS_MAIN: i32 = 0;
pub const NS_USER: i32 = 2;

/// Batch-mode rendering of SQL NULL.
pub const NULL_FIELD: &str = "NULL";

pub trait DataSource {
    /// Run `query` and return its rows, one delimited line per row, in result order.
    fn query(&mut self, query: &str) -> Result<Vec<String>, DataSourceError>;
}

#[derive(Clone)]
pub struct MysqlConnection {
    pub binary: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub host: Option<String>,
}

impl fmt::Debug for MysqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConnection")
            .field("binary", &self.binary)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .finish()
    }
}

impl MysqlConnection {
    fn arguments(&self) -> Vec<String> {
        let mut args = vec!["-u".to_string(), self.user.clone()];
        if let Some(host) = &self.host {
            args.push("-h".to_string());
            args.push(host.clone());
        }
        args.push("--batch".to_string());
        args.push("--skip-column-names".to_string());
        args.push("--default-character-set=utf8mb4".to_string());
        args
    }

    fn script(&self, query: &str) -> String {
        format!(
            "use `{}`;\n{}\n",
            self.database.replace('`', "``"),
            query.trim_end()
        )
    }
}

/// Queries through the `mysql` client, feeding the script on stdin.
#[derive(Debug, Clone)]
pub struct MysqlCliSource {
    connection: MysqlConnection,
}

impl MysqlCliSource {
    pub fn new(connection: MysqlConnection) -> Self {
        Self { connection }
    }
}

impl DataSource for MysqlCliSource {
    fn query(&mut self, query: &str) -> Result<Vec<String>, DataSourceError> {
        let mut command = Command::new(&self.connection.binary);
        command
            .args(self.connection.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(password) = &self.connection.password {
            command.env("MYSQL_PWD", password);
        }

        debug!(binary = %self.connection.binary, database = %self.connection.database, "running mysql query");
        let mut child = command.spawn().map_err(|error| {
            DataSourceError::new(
                -1,
                format!("failed to execute {}: {error}", self.connection.binary),
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let script = self.connection.script(query);
            stdin.write_all(script.as_bytes()).map_err(|error| {
                DataSourceError::new(-1, format!("failed to write query to mysql: {error}"))
            })?;
        }

        let output = child.wait_with_output().map_err(|error| {
            DataSourceError::new(-1, format!("failed to wait for mysql: {error}"))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostic = stdout
                .lines()
                .chain(stderr.lines())
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(DataSourceError::new(
                output.status.code().unwrap_or(-1),
                diagnostic,
            ));
        }

        Ok(stdout
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Queries a MediaWiki SQLite database file, opened read-only.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    path: PathBuf,
}

impl SqliteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for SqliteSource {
    fn query(&mut self, query: &str) -> Result<Vec<String>, DataSourceError> {
        let connection = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|error| sqlite_error(&self.path, error))?;
        let mut statement = connection
            .prepare(query)
            .map_err(|error| sqlite_error(&self.path, error))?;
        let column_count = statement.column_count();
        let mut rows = statement
            .query([])
            .map_err(|error| sqlite_error(&self.path, error))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|error| sqlite_error(&self.path, error))? {
            let mut fields = Vec::with_capacity(column_count);
            for index in 0..column_count {
                let value = row
                    .get_ref(index)
                    .map_err(|error| sqlite_error(&self.path, error))?;
                fields.push(render_sqlite_value(value));
            }
            out.push(fields.join("\t"));
        }
        Ok(out)
    }
}

fn render_sqlite_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => NULL_FIELD.to_string(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            escape_batch_field(&String::from_utf8_lossy(bytes))
        }
    }
}

fn sqlite_error(path: &Path, error: rusqlite::Error) -> DataSourceError {
    DataSourceError::new(1, format!("{}: {error}", path.display()))
}

/// Escape a field the way `mysql --batch` does.
pub fn escape_batch_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub namespaces: Vec<i32>,
    /// Account credited with anonymous edits (`rev_user = 0`).
    pub fallback_user_id: i64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            namespaces: vec![NS_MAIN, NS_USER],
            fallback_user_id: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevisionFetcher {
    options: FetchOptions,
}

impl RevisionFetcher {
    pub fn new(options: FetchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Every revision in the configured namespaces, oldest first.
    ///
    /// Column order: timestamp, page id, deletion marker, namespace, title,
    /// author name, author email, text. The text stays last so stray tabs in
    /// it cannot shift the other columns.
    pub fn revision_query(&self) -> String {
        format!(
            "SELECT r.rev_timestamp, p.page_id, r.rev_deleted, p.page_namespace, p.page_title, \
u.user_name, u.user_email, t.old_text \
FROM revision r \
INNER JOIN page p ON p.page_id = r.rev_page \
INNER JOIN text t ON t.old_id = r.rev_text_id \
LEFT JOIN user u ON u.user_id = CASE WHEN r.rev_user = 0 THEN {fallback} ELSE r.rev_user END \
WHERE p.page_namespace IN ({namespaces}) \
ORDER BY r.rev_timestamp ASC, r.rev_id ASC;",
            fallback = self.options.fallback_user_id,
            namespaces = namespace_list(&self.options.namespaces),
        )
    }

    pub fn fetch<S>(&self, source: &mut S) -> Result<Vec<String>, DataSourceError>
    where
        S: DataSource + ?Sized,
    {
        let rows = source.query(&self.revision_query())?;
        info!(rows = rows.len(), "fetched revision rows");
        Ok(rows)
    }
}

pub fn page_titles_query(namespace: i32) -> String {
    format!(
        "SELECT p.page_title FROM page p WHERE p.page_namespace = {namespace} ORDER BY p.page_title ASC;"
    )
}

/// Current page titles in one namespace.
pub fn list_pages<S>(source: &mut S, namespace: i32) -> Result<Vec<String>, DataSourceError>
where
    S: DataSource + ?Sized,
{
    source.query(&page_titles_query(namespace))
}

fn namespace_list(namespaces: &[i32]) -> String {
    namespaces
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
