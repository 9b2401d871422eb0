//! Turning raw form input into a validated connection request
use crate::database::{ClientGeneration, ClientKind, DatabaseType};
use crate::dsn::DsnEntry;
use std::fmt;
use thiserror::Error;

const DEFAULT_HOST: &str = "localhost";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Database type is mandatory!")]
    MissingDatabaseType,

    #[error("User is mandatory for {0} connections without a DSN!")]
    MissingUser(DatabaseType),

    #[error("Invalid port '{0}': expected a number between 1 and 65535")]
    InvalidPort(String),
}

/// Field values exactly as the user left them in the form
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    pub database: Option<DatabaseType>,
    pub legacy: bool,
    pub dsn: Option<DsnEntry>,
    pub host: String,
    pub port: String,
    pub database_name: String,
    pub user: String,
    pub password: String,
}

/// A validated request for one launch attempt, with defaults applied
#[derive(Clone, PartialEq)]
pub struct ConnectionRequest {
    pub kind: ClientKind,
    pub host: String,
    /// `None` for file-based databases
    pub port: Option<u16>,
    pub database_name: String,
    pub user: String,
    pub password: String,
    /// Raw value of the selected DSN, which supersedes the fields above
    pub dsn: Option<String>,
}

impl ConnectionRequest {
    /// Validate form input.
    ///
    /// The user is required for network databases unless a DSN is selected; the
    /// form pre-fills the type's default user, so only a cleared field fails.
    /// Port and user are not checked when a DSN is selected since neither is used.
    pub fn from_input(input: &FormInput) -> Result<Self, ValidationError> {
        let database = input.database.ok_or(ValidationError::MissingDatabaseType)?;
        let kind = ClientKind::new(database, ClientGeneration::from_legacy_flag(input.legacy));
        let uses_fields = input.dsn.is_none();

        let user = input.user.trim();
        if uses_fields && !database.is_file_based() && user.is_empty() {
            return Err(ValidationError::MissingUser(database));
        }

        let port = match input.port.trim() {
            "" => database.default_port(),
            _ if !uses_fields || database.is_file_based() => database.default_port(),
            raw => match raw.parse::<u16>() {
                Ok(port) if port != 0 => Some(port),
                _ => return Err(ValidationError::InvalidPort(raw.to_string())),
            },
        };

        let host = match input.host.trim() {
            "" => DEFAULT_HOST.to_string(),
            host => host.to_string(),
        };

        Ok(Self {
            kind,
            host,
            port,
            database_name: input.database_name.trim().to_string(),
            user: user.to_string(),
            password: input.password.clone(),
            dsn: input.dsn.as_ref().map(|dsn| dsn.value.clone()),
        })
    }

    pub fn database(&self) -> DatabaseType {
        self.kind.database
    }

    pub fn generation(&self) -> ClientGeneration {
        self.kind.generation
    }
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("user", &self.user)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "[REDACTED]" },
            )
            .field("dsn", &self.dsn.as_ref().map(|_| "[DSN]"))
            .finish()
    }
}
