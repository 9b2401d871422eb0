//! The form/launch loop
use crate::config::{AppConfig, ConfigError};
use crate::error::AppError;
use crate::form::Form;
use crate::launcher::{LaunchOutcome, LaunchSpec, Launcher};
use crate::password_sanitizer::sanitize_arguments;
use crate::request::{ConnectionRequest, FormInput};
use crate::resolver;
use crate::tunnel::TunnelResolver;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use nu_ansi_term::Color;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Flags that change what an attempt does
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub json: bool,
}

/// Result of one successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Launched(LaunchOutcome),
    /// Rendered command line, passwords redacted
    DryRun(String),
}

pub struct App<F, L> {
    config: AppConfig,
    tunnels: TunnelResolver,
    form: F,
    launcher: L,
    options: RunOptions,
}

impl<F: Form, L: Launcher> App<F, L> {
    pub fn new(
        config: AppConfig,
        tunnels: TunnelResolver,
        form: F,
        launcher: L,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            tunnels,
            form,
            launcher,
            options,
        }
    }

    /// Re-read both configuration files so edits apply to the next attempt
    pub fn reload_config(&mut self) -> Result<(), ConfigError> {
        self.config.reload()?;
        self.tunnels.reload()
    }

    /// Show the form until the user quits. Failed attempts are reported and the
    /// form comes back; only an unusable terminal ends the loop with an error.
    pub async fn run(&mut self) -> Result<(), AppError> {
        loop {
            if let Err(e) = self.reload_config() {
                display_error(&e.into());
            }

            let input = match self.form.collect(&self.config) {
                Ok(Some(input)) => input,
                Ok(None) => {
                    debug!("[App::run] Form closed, exiting");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    display_error(&e);
                    continue;
                }
            };

            let request = match ConnectionRequest::from_input(&input) {
                Ok(request) => request,
                Err(e) => {
                    display_error(&e.into());
                    continue;
                }
            };

            if !self.options.dry_run {
                clear_screen();
            }
            match self.attempt(&request).await {
                Ok(AttemptOutcome::DryRun(rendered)) => println!("{rendered}"),
                Ok(AttemptOutcome::Launched(LaunchOutcome::Interrupted)) => {
                    debug!("[App::run] Client interrupted by the user");
                }
                Ok(AttemptOutcome::Launched(LaunchOutcome::Exited(code))) => {
                    debug!("[App::run] Client exited with {code:?}");
                }
                Err(e) => display_error(&e),
            }
            if !self.options.dry_run {
                pause();
                clear_screen();
            }
        }
    }

    /// Validate raw form input and run one attempt
    pub async fn submit(&self, input: &FormInput) -> Result<AttemptOutcome, AppError> {
        let request = ConnectionRequest::from_input(input)?;
        self.attempt(&request).await
    }

    /// Resolve, open the tunnel, launch, and close the tunnel again.
    /// The tunnel is released whatever the launch result.
    pub async fn attempt(&self, request: &ConnectionRequest) -> Result<AttemptOutcome, AppError> {
        debug!("[App::attempt] {request:?}");
        let section = self.config.client_section(request.kind);
        let resolved = resolver::resolve(request, &section);

        if !self.options.dry_run {
            if let Some(help) = &section.help {
                println!("{help}");
            }
        }

        let environment = self.config.environment();
        let tunnel = self
            .tunnels
            .acquire(
                resolved.remote_host.as_deref(),
                resolved.remote_port,
                &environment,
            )
            .await?;
        let spec = resolved
            .bind(tunnel.endpoint())
            .with_base_env(environment);
        debug!(
            "[App::attempt] Starting {} {}",
            spec.executable,
            sanitize_arguments(request.database(), &spec.args()).join(" ")
        );

        let result = if self.options.dry_run {
            self.render(request, &spec).map(AttemptOutcome::DryRun)
        } else {
            self.launcher
                .launch(&spec)
                .await
                .map(AttemptOutcome::Launched)
                .map_err(AppError::from)
        };

        if let Err(e) = tunnel.release().await {
            warn!("Failed to close tunnel: {e}");
        }
        result
    }

    fn render(&self, request: &ConnectionRequest, spec: &LaunchSpec) -> Result<String, AppError> {
        let redacted = LaunchSpec {
            options: sanitize_arguments(request.database(), &spec.options),
            arguments: sanitize_arguments(request.database(), &spec.arguments),
            ..spec.clone()
        };

        if self.options.json {
            return Ok(serde_json::to_string_pretty(&redacted)?);
        }

        let mut line: Vec<String> = redacted
            .env
            .iter()
            .map(|(key, value)| format!("{key}={}", shell_quote(value)))
            .collect();
        line.push(shell_quote(&redacted.executable));
        line.extend(redacted.args().iter().map(|arg| shell_quote(arg)));
        Ok(line.join(" "))
    }
}

/// Quote a word for display when it would not survive a POSIX shell as-is
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,%+[]~".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn display_error(error: &AppError) {
    eprintln!("{}", Color::Red.bold().paint(error.user_message()));
}

fn clear_screen() {
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, Clear(ClearType::All), MoveTo(0, 0)) {
        debug!("[clear_screen] {e}");
    }
}

fn pause() {
    print!("Press Enter to continue...");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
}
