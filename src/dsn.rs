//! DSN entries from the `[DSN]` section
//!
//! A DSN name may start with a database type (`MSSQL: prod`), in which case the
//! form selects and locks that type. The value is passed to the client verbatim,
//! split into arguments for every client but SQLite, whose value is a file path.
use crate::database::DatabaseType;
use std::str::FromStr;

/// Named LocalDB instance, reached over a named pipe rather than TCP
const LOCALDB_INSTANCE: &str = r"(localdb)\mssqllocaldb";

/// One configured DSN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsnEntry {
    /// 1-based position in the `[DSN]` section
    pub position: usize,
    pub name: String,
    pub value: String,
}

impl DsnEntry {
    pub fn new(position: usize, name: &str, value: &str) -> Self {
        Self {
            position,
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Label shown in the form, e.g. `2. MSSQL: prod`. The value is left out
    /// because it usually carries credentials.
    pub fn label(&self) -> String {
        dsn_label(self.position, &self.name)
    }

    /// Database type named at the start of the DSN, if any
    pub fn database_type(&self) -> Option<DatabaseType> {
        parse_label(&self.label())
    }
}

/// Form label for the DSN at a 1-based position
pub fn dsn_label(position: usize, name: &str) -> String {
    format!("{position}. {name}")
}

/// Extract the database type from a label of the form `<index>. <Type>: <name>[ = <value>]`.
///
/// Returns `None` when the label has fewer than two tokens or the second token is
/// not a known type followed by `:`.
pub fn parse_label(label: &str) -> Option<DatabaseType> {
    let token = label.split_whitespace().nth(1)?;
    let type_name = token.strip_suffix(':')?;
    DatabaseType::from_str(type_name).ok()
}

/// Split a DSN value into client arguments
pub fn split(value: &str, database: DatabaseType) -> Vec<String> {
    match database {
        DatabaseType::SQLite => vec![value.to_string()],
        DatabaseType::MSSQL
        | DatabaseType::MySQL
        | DatabaseType::Oracle
        | DatabaseType::PostgreSQL => value.split_whitespace().map(str::to_string).collect(),
    }
}

/// Check whether a host or DSN designates the LocalDB named-pipe instance.
///
/// `mssql://` URLs match on their host only; values with any other URL scheme
/// never match; anything else matches when it contains the instance name.
pub fn is_localdb(value: &str) -> bool {
    let lower = value.to_lowercase();

    match lower.split_once("://") {
        Some(("mssql", rest)) => url_host(rest) == LOCALDB_INSTANCE,
        Some((scheme, _)) if is_url_scheme(scheme) => false,
        _ => lower.contains(LOCALDB_INSTANCE),
    }
}

fn is_url_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Host part of the text following `scheme://`
fn url_host(rest: &str) -> &str {
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);
    match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    }
}
