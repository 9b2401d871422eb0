//! The connection form
use crate::config::AppConfig;
use crate::database::DatabaseType;
use crate::dsn::DsnEntry;
use crate::error::AppError;
use crate::request::FormInput;
use inquire::{Confirm, InquireError, Password, PasswordDisplayMode, Select, Text};
use strum::IntoEnumIterator;
use tracing::debug;

const NO_DSN: &str = "(enter connection details)";

/// Source of form input for each launch attempt
pub trait Form {
    /// Collect one filled form. `Ok(None)` means the user chose to quit.
    fn collect(&mut self, config: &AppConfig) -> Result<Option<FormInput>, AppError>;
}

/// Interactive form on the terminal
#[derive(Debug, Default)]
pub struct InquireForm;

impl InquireForm {
    fn select_dsn(dsns: &[DsnEntry]) -> Result<Option<DsnEntry>, InquireError> {
        if dsns.is_empty() {
            return Ok(None);
        }

        let mut options = vec![NO_DSN.to_string()];
        options.extend(dsns.iter().map(DsnEntry::label));
        let selected = Select::new("DSN:", options)
            .with_help_message("Pick a saved connection or enter the details by hand")
            .raw_prompt()?;

        // Index 0 is the manual entry
        Ok(selected
            .index
            .checked_sub(1)
            .and_then(|index| dsns.get(index))
            .cloned())
    }

    fn select_database(dsn: Option<&DsnEntry>) -> Result<DatabaseType, InquireError> {
        if let Some(database) = dsn.and_then(DsnEntry::database_type) {
            println!("Database type: {database}");
            return Ok(database);
        }
        Select::new("Database type:", DatabaseType::iter().collect()).prompt()
    }

    fn ask_legacy(database: DatabaseType) -> Result<bool, InquireError> {
        Confirm::new(&format!(
            "Use the legacy client ({})?",
            database.legacy_client()
        ))
        .with_default(false)
        .prompt()
    }

    fn fill(config: &AppConfig) -> Result<FormInput, InquireError> {
        let dsn = Self::select_dsn(&config.dsns())?;
        let database = Self::select_database(dsn.as_ref())?;
        let legacy = Self::ask_legacy(database)?;

        let mut input = FormInput {
            database: Some(database),
            legacy,
            ..Default::default()
        };

        if dsn.is_some() {
            debug!("[InquireForm::fill] DSN selected, connection fields skipped");
            input.dsn = dsn;
            return Ok(input);
        }

        if database.is_file_based() {
            input.database_name = Text::new("Database file:")
                .with_help_message("Leave empty for a transient in-memory database")
                .prompt()?;
            return Ok(input);
        }

        input.host = Text::new("Host:").with_default("localhost").prompt()?;
        let default_port = database
            .default_port()
            .map(|port| port.to_string())
            .unwrap_or_default();
        input.port = Text::new("Port:").with_default(&default_port).prompt()?;
        input.database_name = Text::new("Database:").prompt()?;
        input.user = Text::new("User:")
            .with_default(database.default_user().unwrap_or_default())
            .prompt()?;
        input.password = Password::new("Password:")
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()?;
        Ok(input)
    }

    fn confirm_quit() -> Result<bool, InquireError> {
        Confirm::new("Quit sqlshell?").with_default(true).prompt()
    }
}

impl Form for InquireForm {
    fn collect(&mut self, config: &AppConfig) -> Result<Option<FormInput>, AppError> {
        loop {
            match Self::fill(config) {
                Ok(input) => return Ok(Some(input)),
                Err(InquireError::OperationCanceled) => match Self::confirm_quit() {
                    Ok(true) | Err(InquireError::OperationInterrupted) => return Ok(None),
                    Ok(false) | Err(InquireError::OperationCanceled) => continue,
                    Err(e) => return Err(e.into()),
                },
                Err(InquireError::OperationInterrupted) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
