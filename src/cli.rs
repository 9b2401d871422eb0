use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// sqlshell - launch interactive SQL clients from a connection form
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "sqlshell")]
#[command(version, long_about = None)]
#[command(
    about = "Pick a database, fill in the form, and drop into mssql-cli, mycli, SQLcl, pgcli, litecli or their legacy counterparts"
)]
pub struct Args {
    /// Path to sqlshell.ini (defaults to the file next to the executable, then ~/.config/sqlshell)
    #[arg(long, value_name = "FILE", env = "SQLSHELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to tunnel.ini (same lookup as --config)
    #[arg(long, value_name = "FILE", env = "SQLSHELL_TUNNEL_CONFIG")]
    pub tunnel_config: Option<PathBuf>,

    /// Print the client command line (passwords redacted) instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// With --dry-run, print the command as JSON
    #[arg(long, requires = "dry_run")]
    pub json: bool,

    /// Generate shell completions
    #[arg(long, value_enum)]
    pub completions: Option<Shell>,

    /// Increase console logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Supported shells for completion generation
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl From<Shell> for clap_complete::Shell {
    fn from(shell: Shell) -> Self {
        match shell {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}
