use crate::config::ConfigError;
use crate::launcher::LaunchError;
use crate::request::ValidationError;
use crate::tunnel::TunnelError;
use inquire::InquireError;
use thiserror::Error;

/// Anything that can end one launch attempt
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Form error: {0}")]
    Form(#[from] InquireError),

    #[error("Failed to serialize command: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Message shown to the user, with a hint where one helps
    pub fn user_message(&self) -> String {
        match self {
            AppError::Tunnel(TunnelError::AuthError(_)) => format!(
                "{self}\nThe proxy only accepts key authentication; load your key with ssh-add or set identity_file in tunnel.ini."
            ),
            AppError::Tunnel(TunnelError::TimeoutError(_) | TunnelError::ConnectionError(_)) => {
                format!("{self}\nCheck proxy_host and proxy_port in tunnel.ini.")
            }
            _ => self.to_string(),
        }
    }

    /// Whether the terminal is unusable, in which case retrying the form is pointless
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Form(InquireError::NotTTY | InquireError::IO(_))
        )
    }
}
