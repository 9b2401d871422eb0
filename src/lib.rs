pub mod app;
pub mod cli;
pub mod config;
pub mod database;
pub mod dsn;
pub mod error;
pub mod form;
pub mod launcher;
pub mod logging;
pub mod password_sanitizer;
pub mod request;
pub mod resolver;
pub mod tunnel;

use crate::app::{App, RunOptions};
use crate::cli::Args;
use crate::config::{AppConfig, CONFIG_FILE_NAME, TUNNEL_CONFIG_FILE_NAME, resolve_config_path};
use crate::error::AppError;
use crate::form::InquireForm;
use crate::launcher::ProcessLauncher;
use crate::tunnel::{SshForwarder, TunnelResolver};
use clap::CommandFactory;
use std::io;
use tracing::debug;

pub use crate::database::DatabaseType;

/// Run sqlshell with parsed command-line arguments
pub async fn run_with_args(args: Args) -> Result<(), AppError> {
    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        clap_complete::generate(
            clap_complete::Shell::from(shell),
            &mut cmd,
            "sqlshell",
            &mut io::stdout(),
        );
        return Ok(());
    }

    let logging = logging::init(args.verbose);
    debug!("sqlshell {} started with {:?}", env!("CARGO_PKG_VERSION"), args);
    if let Some(path) = logging.log_file() {
        debug!("Logging to {}", path.display());
    }

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_FILE_NAME);
    let tunnel_path = resolve_config_path(args.tunnel_config.as_deref(), TUNNEL_CONFIG_FILE_NAME);
    debug!(
        "Configuration: {}, tunnels: {}",
        config_path.display(),
        tunnel_path.display()
    );

    let config = AppConfig::load(&config_path)?;
    let tunnels = TunnelResolver::load(&tunnel_path, Box::new(SshForwarder::default()))?;

    let options = RunOptions {
        dry_run: args.dry_run,
        json: args.json,
    };
    let mut app = App::new(config, tunnels, InquireForm, ProcessLauncher, options);
    app.run().await
}
