//! Supported database types and the client programs used to reach them
//!
//! Every per-database decision in the crate matches on [`DatabaseType`], so adding
//! a database means the compiler points at every place that needs a new arm.
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Supported database types, in the order the form lists them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, EnumString)]
pub enum DatabaseType {
    MSSQL,
    MySQL,
    Oracle,
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Get the default port for this database type
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseType::MSSQL => Some(1433),
            DatabaseType::MySQL => Some(3306),
            DatabaseType::Oracle => Some(1521),
            DatabaseType::PostgreSQL => Some(5432),
            DatabaseType::SQLite => None, // File-based
        }
    }

    /// Get default username for this database type
    pub fn default_user(&self) -> Option<&'static str> {
        match self {
            DatabaseType::MSSQL => Some("sa"),
            DatabaseType::MySQL => Some("root"),
            DatabaseType::Oracle => Some("system"),
            DatabaseType::PostgreSQL => Some("postgres"),
            DatabaseType::SQLite => None,
        }
    }

    /// Check if this database type is file-based (no network connection)
    pub fn is_file_based(&self) -> bool {
        matches!(self, DatabaseType::SQLite)
    }

    /// Executable name of the modern client, which differs on Windows for some clients
    pub fn modern_client(&self, platform: Platform) -> &'static str {
        match (self, platform) {
            (DatabaseType::MSSQL, Platform::Windows) => "mssql-cli.bat",
            (DatabaseType::MSSQL, Platform::Unix) => "mssql-cli",
            (DatabaseType::MySQL, _) => "mycli",
            (DatabaseType::Oracle, Platform::Windows) => "sql.exe",
            (DatabaseType::Oracle, Platform::Unix) => "sql",
            (DatabaseType::PostgreSQL, _) => "pgcli",
            (DatabaseType::SQLite, _) => "litecli",
        }
    }

    /// Executable name of the legacy (vendor) client
    pub fn legacy_client(&self) -> &'static str {
        match self {
            DatabaseType::MSSQL => "sqlcmd",
            DatabaseType::MySQL => "mysql",
            DatabaseType::Oracle => "sqlplus",
            DatabaseType::PostgreSQL => "psql",
            DatabaseType::SQLite => "sqlite3",
        }
    }
}

/// Which of the two clients of a database type is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientGeneration {
    /// mssql-cli, mycli, SQLcl, pgcli, litecli
    #[default]
    Modern,
    /// sqlcmd, mysql, SQL*Plus, psql, sqlite3
    Legacy,
}

impl ClientGeneration {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            ClientGeneration::Legacy
        } else {
            ClientGeneration::Modern
        }
    }
}

/// A database type paired with the client generation used to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKind {
    pub database: DatabaseType,
    pub generation: ClientGeneration,
}

impl ClientKind {
    pub fn new(database: DatabaseType, generation: ClientGeneration) -> Self {
        Self {
            database,
            generation,
        }
    }

    /// Name of the configuration section holding this client's options:
    /// `MSSQL` for the modern client, `MSSQL-2` for the legacy one.
    pub fn section_name(&self) -> String {
        match self.generation {
            ClientGeneration::Modern => self.database.to_string(),
            ClientGeneration::Legacy => format!("{}-2", self.database),
        }
    }

    /// Built-in executable for this client on the given platform
    pub fn default_executable(&self, platform: Platform) -> &'static str {
        match self.generation {
            ClientGeneration::Modern => self.database.modern_client(platform),
            ClientGeneration::Legacy => self.database.legacy_client(),
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.section_name())
    }
}

/// Platform family, only relevant for executable names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[rstest]
    fn test_form_order() {
        let names: Vec<String> = DatabaseType::iter().map(|db| db.to_string()).collect();
        assert_eq!(names, ["MSSQL", "MySQL", "Oracle", "PostgreSQL", "SQLite"]);
    }

    #[rstest]
    #[case("MSSQL", Some(DatabaseType::MSSQL))]
    #[case("PostgreSQL", Some(DatabaseType::PostgreSQL))]
    #[case("postgresql", None)]
    #[case("Sybase", None)]
    fn test_from_str_is_case_sensitive(#[case] input: &str, #[case] expected: Option<DatabaseType>) {
        assert_eq!(DatabaseType::from_str(input).ok(), expected);
    }

    #[rstest]
    #[case(DatabaseType::MSSQL, ClientGeneration::Modern, "MSSQL")]
    #[case(DatabaseType::MSSQL, ClientGeneration::Legacy, "MSSQL-2")]
    #[case(DatabaseType::SQLite, ClientGeneration::Legacy, "SQLite-2")]
    fn test_section_name(
        #[case] database: DatabaseType,
        #[case] generation: ClientGeneration,
        #[case] expected: &str,
    ) {
        assert_eq!(ClientKind::new(database, generation).section_name(), expected);
    }

    #[rstest]
    #[case(DatabaseType::MSSQL, Platform::Windows, "mssql-cli.bat")]
    #[case(DatabaseType::MSSQL, Platform::Unix, "mssql-cli")]
    #[case(DatabaseType::Oracle, Platform::Windows, "sql.exe")]
    #[case(DatabaseType::Oracle, Platform::Unix, "sql")]
    #[case(DatabaseType::MySQL, Platform::Windows, "mycli")]
    #[case(DatabaseType::PostgreSQL, Platform::Windows, "pgcli")]
    fn test_modern_client_per_platform(
        #[case] database: DatabaseType,
        #[case] platform: Platform,
        #[case] expected: &str,
    ) {
        let kind = ClientKind::new(database, ClientGeneration::Modern);
        assert_eq!(kind.default_executable(platform), expected);
    }

    #[rstest]
    fn test_legacy_client_ignores_platform() {
        let kind = ClientKind::new(DatabaseType::Oracle, ClientGeneration::Legacy);
        assert_eq!(kind.default_executable(Platform::Windows), "sqlplus");
        assert_eq!(kind.default_executable(Platform::Unix), "sqlplus");
    }

    #[rstest]
    fn test_sqlite_has_no_network_defaults() {
        assert!(DatabaseType::SQLite.is_file_based());
        assert_eq!(DatabaseType::SQLite.default_port(), None);
        assert_eq!(DatabaseType::SQLite.default_user(), None);
        assert_eq!(DatabaseType::PostgreSQL.default_port(), Some(5432));
    }
}
