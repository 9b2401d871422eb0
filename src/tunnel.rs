//! SSH tunnels to database servers behind a jump host
//!
//! Hosts listed as sections of `tunnel.ini` are reached through a local port
//! forwarded by `ssh -L`; every other host is used directly. Either way the
//! caller gets a [`Tunnel`] whose endpoint is the address the client connects to.
//!
//! ```ini
//! [db.internal]
//! proxy_host = bastion.example.com
//! proxy_port = 22
//! proxy_user = deploy
//! remote_host = localhost
//! ```
use crate::config::{ConfigError, IniStore, SectionView};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

const DEFAULT_PROXY_PORT: u16 = 22;
const DEFAULT_REMOTE_HOST: &str = "localhost";
const LOCAL_HOST: &str = "localhost";

const SSH_CONNECT_TIMEOUT_SECS: u64 = 10;
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS + 5);
const READY_CHECK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Error, Debug, Clone)]
pub enum TunnelError {
    #[error("SSH authentication error: {0}")]
    AuthError(String),

    #[error("Failed to bind to local port: {0}")]
    BindError(String),

    #[error("SSH connection error: {0}")]
    ConnectionError(String),

    #[error("SSH tunnel establishment timeout: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("SSH tunnel configuration error: {0}")]
    ConfigError(String),

    #[error("SSH command execution error: {0}")]
    SshCommandError(String),
}

impl From<io::Error> for TunnelError {
    fn from(err: io::Error) -> Self {
        TunnelError::IoError(err.to_string())
    }
}

/// Address the database client connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl TunnelEndpoint {
    /// Endpoint mirroring the remote address, used when no tunnel is needed
    pub fn pass_through(host: Option<&str>, port: Option<u16>) -> Self {
        Self {
            host: host.map(str::to_string),
            port,
        }
    }

    fn forwarded(local_port: u16) -> Self {
        Self {
            host: Some(LOCAL_HOST.to_string()),
            port: Some(local_port),
        }
    }
}

/// Jump host settings for one remote host, from its `tunnel.ini` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub proxy_user: String,
    /// Host the proxy forwards to, as seen from the proxy
    pub remote_host: String,
    /// Local port to listen on; 0 picks a free port
    pub local_port: u16,
    pub identity_file: Option<PathBuf>,
}

impl TunnelSettings {
    pub fn from_section(
        section: &SectionView<'_>,
        default_user: Option<&str>,
    ) -> Result<Self, TunnelError> {
        let proxy_host = section
            .get("proxy_host")
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                TunnelError::ConfigError(format!(
                    "proxy_host is required in section [{}]",
                    section.name()
                ))
            })?
            .to_string();

        let port = |key: &str, default: u16| -> Result<u16, TunnelError> {
            match section.get(key) {
                None | Some("") => Ok(default),
                Some(raw) => raw.parse().map_err(|_| {
                    TunnelError::ConfigError(format!(
                        "invalid {key} '{raw}' in section [{}]",
                        section.name()
                    ))
                }),
            }
        };

        let proxy_user = match section.get("proxy_user").filter(|u| !u.is_empty()) {
            Some(user) => user.to_string(),
            None => default_user.map(str::to_string).ok_or_else(|| {
                TunnelError::ConfigError(format!(
                    "proxy_user is not set in section [{}] and the current user is unknown",
                    section.name()
                ))
            })?,
        };

        Ok(Self {
            proxy_host,
            proxy_port: port("proxy_port", DEFAULT_PROXY_PORT)?,
            proxy_user,
            remote_host: section
                .get("remote_host")
                .filter(|host| !host.is_empty())
                .unwrap_or(DEFAULT_REMOTE_HOST)
                .to_string(),
            local_port: port("local_port", 0)?,
            identity_file: section
                .get("identity_file")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        })
    }
}

/// Name of the user running this process
pub fn current_os_user() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|user| !user.is_empty()))
}

/// An open forwarding session
#[async_trait]
pub trait ForwardSession: Send {
    fn local_port(&self) -> u16;

    /// Shut the forwarding down
    async fn close(&mut self) -> Result<(), TunnelError>;
}

/// Something able to forward a local port to a remote one through a jump host
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Open a forwarding session. `env` holds the configured `[Environment]`
    /// variables, layered on the inherited environment of any helper process.
    async fn open(
        &self,
        settings: &TunnelSettings,
        remote_port: u16,
        env: &[(String, String)],
    ) -> Result<Box<dyn ForwardSession>, TunnelError>;
}

/// A tunnel scope. Real forwarding stops on [`Tunnel::release`], or on drop if the
/// tunnel is never released explicitly.
pub struct Tunnel {
    endpoint: TunnelEndpoint,
    session: Option<Box<dyn ForwardSession>>,
}

impl Tunnel {
    fn pass_through(endpoint: TunnelEndpoint) -> Self {
        Self {
            endpoint,
            session: None,
        }
    }

    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    /// Whether connections go through a forwarded port
    pub fn is_forwarded(&self) -> bool {
        self.session.is_some()
    }

    pub async fn release(mut self) -> Result<(), TunnelError> {
        match self.session.take() {
            Some(mut session) => session.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("endpoint", &self.endpoint)
            .field("forwarded", &self.is_forwarded())
            .finish()
    }
}

/// Decides, per remote host, between a real tunnel and a direct connection
pub struct TunnelResolver {
    path: Option<PathBuf>,
    store: IniStore,
    forwarder: Box<dyn Forwarder>,
}

impl TunnelResolver {
    pub fn new(store: IniStore, forwarder: Box<dyn Forwarder>) -> Self {
        Self {
            path: None,
            store,
            forwarder,
        }
    }

    pub fn load(path: &Path, forwarder: Box<dyn Forwarder>) -> Result<Self, ConfigError> {
        Ok(Self {
            path: Some(path.to_path_buf()),
            store: IniStore::load(path)?,
            forwarder,
        })
    }

    /// Re-read the tunnel configuration file
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            self.store = IniStore::load(path)?;
        }
        Ok(())
    }

    /// Jump host settings for a remote host, `None` when it is reached directly
    pub fn settings_for(&self, remote_host: &str) -> Option<Result<TunnelSettings, TunnelError>> {
        let section = self.store.section(remote_host)?;
        Some(TunnelSettings::from_section(
            &section,
            current_os_user().as_deref(),
        ))
    }

    pub async fn acquire(
        &self,
        remote_host: Option<&str>,
        remote_port: Option<u16>,
        env: &[(String, String)],
    ) -> Result<Tunnel, TunnelError> {
        let Some(host) = remote_host.filter(|host| !host.is_empty()) else {
            return Ok(Tunnel::pass_through(TunnelEndpoint::pass_through(
                remote_host,
                remote_port,
            )));
        };

        let Some(settings) = self.settings_for(host) else {
            debug!("No tunnel configured for {host}, connecting directly");
            return Ok(Tunnel::pass_through(TunnelEndpoint::pass_through(
                Some(host),
                remote_port,
            )));
        };
        let settings = settings?;
        let remote_port = remote_port.ok_or_else(|| {
            TunnelError::ConfigError(format!("a port is required to tunnel to {host}"))
        })?;

        let session = self.forwarder.open(&settings, remote_port, env).await?;
        let endpoint = TunnelEndpoint::forwarded(session.local_port());
        info!(
            "SSH tunnel ready: {}:{} -> {}:{} via {}@{}",
            LOCAL_HOST,
            session.local_port(),
            settings.remote_host,
            remote_port,
            settings.proxy_user,
            settings.proxy_host
        );

        Ok(Tunnel {
            endpoint,
            session: Some(session),
        })
    }
}

const SSH_PROGRAM: &str = "ssh";

/// Forwards ports with the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshForwarder {
    program: PathBuf,
}

impl Default for SshForwarder {
    fn default() -> Self {
        Self {
            program: PathBuf::from(SSH_PROGRAM),
        }
    }
}

impl SshForwarder {
    /// Forwarder running another ssh-compatible executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Find the local port to use for the tunnel
    async fn find_available_port(requested: u16) -> Result<u16, TunnelError> {
        let listener = TcpListener::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            requested,
        ))
        .await
        .map_err(|e| {
            TunnelError::BindError(if requested == 0 {
                format!("No free local port: {e}")
            } else {
                format!("Specified local port {requested} is not available: {e}")
            })
        })?;
        Ok(listener.local_addr()?.port())
    }
}

fn ssh_args(settings: &TunnelSettings, local_port: u16, remote_port: u16) -> Vec<String> {
    let mut args = vec![
        format!("-L{}:{}:{}", local_port, settings.remote_host, remote_port),
        "-N".to_string(),
    ];
    for option in [
        "ExitOnForwardFailure=yes".to_string(),
        "BatchMode=yes".to_string(),
        format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}"),
        "ServerAliveInterval=10".to_string(),
        "ServerAliveCountMax=2".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "PasswordAuthentication=no".to_string(),
        "LogLevel=ERROR".to_string(),
    ] {
        args.push("-o".to_string());
        args.push(option);
    }
    if let Some(key_path) = &settings.identity_file {
        args.push("-i".to_string());
        args.push(key_path.to_string_lossy().to_string());
    }
    args.push("-p".to_string());
    args.push(settings.proxy_port.to_string());
    args.push(format!("{}@{}", settings.proxy_user, settings.proxy_host));
    args
}

/// Map a failed ssh run to an error from what it printed
fn classify_ssh_failure(status: &str, stderr: &str) -> TunnelError {
    let stderr = stderr.trim();
    let message = format!("ssh exited with {status}: {stderr}");
    if stderr.contains("Permission denied") || stderr.contains("Too many authentication failures")
    {
        TunnelError::AuthError(message)
    } else if stderr.contains("cannot listen to port") || stderr.contains("Address already in use")
    {
        TunnelError::BindError(message)
    } else {
        TunnelError::ConnectionError(message)
    }
}

#[async_trait]
impl Forwarder for SshForwarder {
    async fn open(
        &self,
        settings: &TunnelSettings,
        remote_port: u16,
        env: &[(String, String)],
    ) -> Result<Box<dyn ForwardSession>, TunnelError> {
        let local_port = Self::find_available_port(settings.local_port).await?;
        let args = ssh_args(settings, local_port, remote_port);

        info!(
            "Initiating SSH tunnel to {}:{} via {}@{}...",
            settings.remote_host, remote_port, settings.proxy_user, settings.proxy_host
        );
        debug!(
            "Executing SSH command: {} {}",
            self.program.display(),
            args.join(" ")
        );

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Terminal Ctrl-C is meant for the client and must not end the tunnel under it
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            TunnelError::SshCommandError(format!("Failed to spawn ssh command: {e}"))
        })?;
        debug!(
            "SSH process {:?} spawned. Waiting for tunnel setup...",
            child.id()
        );

        // Held from here on so every early return stops the ssh process
        let mut session = SshSession {
            child: Some(child),
            local_port,
        };
        session.wait_until_ready().await?;
        Ok(Box::new(session))
    }
}

struct SshSession {
    child: Option<Child>,
    local_port: u16,
}

impl SshSession {
    async fn wait_until_ready(&mut self) -> Result<(), TunnelError> {
        let start_time = Instant::now();
        let local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.local_port);

        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    let mut stderr_output = String::new();
                    if let Some(mut stderr) = child.stderr.take() {
                        let _ = stderr.read_to_string(&mut stderr_output).await;
                    }
                    self.child = None;
                    return Err(classify_ssh_failure(&status.to_string(), &stderr_output));
                }
            }

            if start_time.elapsed() >= ESTABLISH_TIMEOUT {
                let _ = self.close().await;
                return Err(TunnelError::TimeoutError(format!(
                    "Failed to establish SSH tunnel on {local_addr} within {ESTABLISH_TIMEOUT:?}"
                )));
            }

            match timeout(READY_CHECK_INTERVAL, tokio::net::TcpStream::connect(local_addr)).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    debug!("TCP check successful, SSH tunnel listening on {local_addr}");
                    return Ok(());
                }
                Ok(Err(e)) => debug!("TCP check to {local_addr} failed: {e}"),
                Err(_) => debug!("TCP check to {local_addr} timed out"),
            }
            tokio::time::sleep(READY_CHECK_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ForwardSession for SshSession {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        let Some(mut child) = self.child.take() else {
            debug!("No active SSH tunnel process to stop.");
            return Ok(());
        };

        debug!("Stopping SSH tunnel process (PID: {:?})...", child.id());
        child.kill().await.map_err(|e| {
            TunnelError::SshCommandError(format!("Failed to kill SSH tunnel process: {e}"))
        })?;
        match timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => debug!("SSH tunnel process exited with status: {status}"),
            Ok(Err(e)) => warn!("Error waiting for SSH tunnel process to exit: {e}"),
            Err(_) => warn!("Timeout waiting for SSH tunnel process to exit after kill."),
        }
        info!("SSH tunnel closed");
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(
                "SSH session dropped. Killing tunnel process (PID: {:?}).",
                child.id()
            );
            if let Err(e) = child.start_kill() {
                warn!("Error attempting to kill SSH tunnel process in drop: {e}");
            } else {
                info!("SSH tunnel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Forwarder listening on a real local port without any SSH involved
    #[derive(Default, Clone)]
    struct MockForwarder {
        active: Arc<AtomicUsize>,
        opened: Arc<AtomicUsize>,
    }

    struct MockSession {
        listener: Option<TcpListener>,
        local_port: u16,
        active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Forwarder for MockForwarder {
        async fn open(
            &self,
            settings: &TunnelSettings,
            _remote_port: u16,
            _env: &[(String, String)],
        ) -> Result<Box<dyn ForwardSession>, TunnelError> {
            if settings.proxy_host == "unreachable" {
                return Err(TunnelError::ConnectionError(
                    "ssh: connect to host unreachable port 22: Connection refused".to_string(),
                ));
            }
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, settings.local_port)).await?;
            let local_port = listener.local_addr()?.port();
            self.active.fetch_add(1, Ordering::SeqCst);
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                listener: Some(listener),
                local_port,
                active: self.active.clone(),
            }))
        }
    }

    #[async_trait]
    impl ForwardSession for MockSession {
        fn local_port(&self) -> u16 {
            self.local_port
        }

        async fn close(&mut self) -> Result<(), TunnelError> {
            if self.listener.take().is_some() {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    impl Drop for MockSession {
        fn drop(&mut self) {
            if self.listener.take().is_some() {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    #[fixture]
    fn tunnel_store() -> IniStore {
        IniStore::parse(
            r#"
[db.internal]
proxy_host = bastion.example.com
proxy_user = deploy

[legacy.internal]
proxy_host = old-bastion
proxy_port = 2222
remote_host = 10.0.0.12
identity_file = ~/.ssh/legacy_ed25519

[down.internal]
proxy_host = unreachable
proxy_user = deploy

[broken.internal]
proxy_port = 22
"#,
        )
    }

    fn resolver(store: IniStore, forwarder: &MockForwarder) -> TunnelResolver {
        TunnelResolver::new(store, Box::new(forwarder.clone()))
    }

    #[rstest]
    #[tokio::test]
    async fn test_pass_through_without_host(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let tunnel = tunnels.acquire(None, None, &[]).await.unwrap();
        assert_eq!(tunnel.endpoint(), &TunnelEndpoint::pass_through(None, None));
        assert!(!tunnel.is_forwarded());
        tunnel.release().await.unwrap();
        assert_eq!(forwarder.opened.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_pass_through_for_unconfigured_host(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let tunnel = tunnels.acquire(Some("sqlite-path"), None, &[]).await.unwrap();
        assert_eq!(tunnel.endpoint().host.as_deref(), Some("sqlite-path"));
        assert_eq!(tunnel.endpoint().port, None);
        tunnel.release().await.unwrap();

        let tunnel = tunnels.acquire(Some("DB.INTERNAL"), Some(5432), &[]).await.unwrap();
        assert_eq!(
            tunnel.endpoint(),
            &TunnelEndpoint::pass_through(Some("DB.INTERNAL"), Some(5432))
        );
        assert_eq!(forwarder.opened.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_forwarded_tunnel_and_release(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let tunnel = tunnels.acquire(Some("db.internal"), Some(5432), &[]).await.unwrap();
        assert!(tunnel.is_forwarded());
        assert_eq!(tunnel.endpoint().host.as_deref(), Some("localhost"));
        assert_ne!(tunnel.endpoint().port, Some(5432));
        assert_eq!(forwarder.active.load(Ordering::SeqCst), 1);

        tunnel.release().await.unwrap();
        assert_eq!(forwarder.active.load(Ordering::SeqCst), 0);

        let again = tunnels.acquire(Some("db.internal"), Some(5432), &[]).await.unwrap();
        assert!(again.is_forwarded());
        again.release().await.unwrap();
        assert_eq!(forwarder.opened.load(Ordering::SeqCst), 2);
        assert_eq!(forwarder.active.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_dropped_tunnel_stops_forwarding(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let tunnel = tunnels.acquire(Some("db.internal"), Some(5432), &[]).await.unwrap();
        assert_eq!(forwarder.active.load(Ordering::SeqCst), 1);
        drop(tunnel);
        assert_eq!(forwarder.active.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_unreachable_proxy_is_an_error(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let result = tunnels.acquire(Some("down.internal"), Some(3306), &[]).await;
        assert!(matches!(result, Err(TunnelError::ConnectionError(_))));
        assert_eq!(forwarder.active.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_configured_host_needs_port(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let result = tunnels.acquire(Some("db.internal"), None, &[]).await;
        assert!(matches!(result, Err(TunnelError::ConfigError(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_proxy_host(tunnel_store: IniStore) {
        let forwarder = MockForwarder::default();
        let tunnels = resolver(tunnel_store, &forwarder);

        let result = tunnels.acquire(Some("broken.internal"), Some(1433), &[]).await;
        match result {
            Err(TunnelError::ConfigError(message)) => assert!(message.contains("proxy_host")),
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[rstest]
    fn test_settings_defaults(tunnel_store: IniStore) {
        let section = tunnel_store.section("db.internal").unwrap();
        let settings = TunnelSettings::from_section(&section, Some("ignored")).unwrap();
        assert_eq!(
            settings,
            TunnelSettings {
                proxy_host: "bastion.example.com".to_string(),
                proxy_port: 22,
                proxy_user: "deploy".to_string(),
                remote_host: "localhost".to_string(),
                local_port: 0,
                identity_file: None,
            }
        );
    }

    #[rstest]
    fn test_settings_proxy_user_defaults_to_current_user(tunnel_store: IniStore) {
        let section = tunnel_store.section("legacy.internal").unwrap();
        let settings = TunnelSettings::from_section(&section, Some("alice")).unwrap();
        assert_eq!(settings.proxy_user, "alice");
        assert_eq!(settings.proxy_port, 2222);
        assert_eq!(settings.remote_host, "10.0.0.12");

        let result = TunnelSettings::from_section(&section, None);
        assert!(matches!(result, Err(TunnelError::ConfigError(_))));
    }

    #[rstest]
    fn test_settings_invalid_port() {
        let store = IniStore::parse("[h]\nproxy_host = b\nproxy_user = u\nproxy_port = ssh\n");
        let section = store.section("h").unwrap();
        assert!(matches!(
            TunnelSettings::from_section(&section, None),
            Err(TunnelError::ConfigError(_))
        ));
    }

    #[rstest]
    fn test_ssh_args(tunnel_store: IniStore) {
        let section = tunnel_store.section("legacy.internal").unwrap();
        let settings = TunnelSettings::from_section(&section, Some("alice")).unwrap();
        let args = ssh_args(&settings, 40000, 1521);

        assert_eq!(args[0], "-L40000:10.0.0.12:1521");
        assert_eq!(args[1], "-N");
        assert!(args.contains(&"ExitOnForwardFailure=yes".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "~/.ssh/legacy_ed25519"]));
        assert_eq!(args[args.len() - 3..], ["-p", "2222", "alice@old-bastion"]);
    }

    #[rstest]
    #[case("Permission denied (publickey).", "auth")]
    #[case("bind [127.0.0.1]:40000: Address already in use", "bind")]
    #[case("ssh: Could not resolve hostname nowhere", "connection")]
    fn test_classify_ssh_failure(#[case] stderr: &str, #[case] expected: &str) {
        let error = classify_ssh_failure("exit status: 255", stderr);
        let kind = match error {
            TunnelError::AuthError(_) => "auth",
            TunnelError::BindError(_) => "bind",
            TunnelError::ConnectionError(_) => "connection",
            _ => "other",
        };
        assert_eq!(kind, expected);
        assert!(error.to_string().contains(stderr));
    }

    #[rstest]
    #[tokio::test]
    async fn test_find_available_port_dynamic() {
        let port = SshForwarder::find_available_port(0).await.unwrap();
        assert_ne!(port, 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_find_available_port_specific_taken() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = listener.local_addr().unwrap().port();
        let result = SshForwarder::find_available_port(taken_port).await;
        assert!(matches!(result, Err(TunnelError::BindError(_))));
        drop(listener);
    }

    #[rstest]
    #[tokio::test]
    #[ignore]
    async fn test_ssh_forwarder_against_local_sshd() {
        let settings = TunnelSettings {
            proxy_host: "localhost".to_string(),
            proxy_port: 2222,
            proxy_user: "testuser".to_string(),
            remote_host: "localhost".to_string(),
            local_port: 0,
            identity_file: None,
        };

        match SshForwarder::default().open(&settings, 5432, &[]).await {
            Ok(mut session) => {
                assert_ne!(session.local_port(), 0);
                session.close().await.unwrap();
            }
            Err(e) => assert!(matches!(
                e,
                TunnelError::ConnectionError(_)
                    | TunnelError::AuthError(_)
                    | TunnelError::SshCommandError(_)
                    | TunnelError::TimeoutError(_)
            )),
        }
    }

    /// Stand-in for `ssh`, written as a shell script
    #[cfg(unix)]
    fn fake_ssh(dir: &TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Fake ssh that records its pid and listens on the `-L` port until killed
    const LISTENING_SSH: &str = r#"
echo $$ > "${0%/*}/pid"
for arg in "$@"; do
  case "$arg" in -L*) forward="${arg#-L}"; port="${forward%%:*}" ;; esac
done
exec python3 -c '
import socket, sys
s = socket.socket()
s.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)
s.bind(("127.0.0.1", int(sys.argv[1])))
s.listen(8)
while True:
    s.accept()[0].close()
' "$port"
"#;

    /// Fake ssh whose failure depends on a variable from the `[Environment]` section
    const ENV_CHECKING_SSH: &str = r#"
if [ "$SQLSHELL_TUNNEL_TEST" = "from-environment" ]; then
  echo "ssh: connect to host bastion port 22: Connection refused" >&2
else
  echo "deploy@bastion: Permission denied (publickey)." >&2
fi
exit 255
"#;

    fn fake_settings() -> TunnelSettings {
        TunnelSettings {
            proxy_host: "bastion".to_string(),
            proxy_port: 22,
            proxy_user: "deploy".to_string(),
            remote_host: "localhost".to_string(),
            local_port: 0,
            identity_file: None,
        }
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    #[cfg(unix)]
    fn process_group_of(pid: u32) -> Option<String> {
        let output = std::process::Command::new("ps")
            .args(["-o", "pgid=", "-p", &pid.to_string()])
            .output()
            .ok()?;
        let group = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!group.is_empty()).then_some(group)
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn test_ssh_exiting_early_is_reported() {
        let dir = TempDir::new().unwrap();
        let program = fake_ssh(
            &dir,
            "echo 'deploy@bastion: Permission denied (publickey).' >&2\nexit 255",
        );

        let result = SshForwarder::with_program(program)
            .open(&fake_settings(), 5432, &[])
            .await;
        match result {
            Err(TunnelError::AuthError(message)) => {
                assert!(message.contains("Permission denied (publickey)"));
                assert!(message.contains("255"));
            }
            Err(other) => panic!("expected an authentication error, got {other:?}"),
            Ok(_) => panic!("expected the tunnel to fail"),
        }
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn test_environment_section_reaches_ssh() {
        let dir = TempDir::new().unwrap();
        let program = fake_ssh(&dir, ENV_CHECKING_SSH);
        let tunnels = TunnelResolver::new(
            IniStore::parse("[db.internal]\nproxy_host = bastion\nproxy_user = deploy\n"),
            Box::new(SshForwarder::with_program(program)),
        );

        let env = vec![(
            "SQLSHELL_TUNNEL_TEST".to_string(),
            "from-environment".to_string(),
        )];
        let with_env = tunnels.acquire(Some("db.internal"), Some(5432), &env).await;
        assert!(matches!(with_env, Err(TunnelError::ConnectionError(_))));

        let without_env = tunnels.acquire(Some("db.internal"), Some(5432), &[]).await;
        assert!(matches!(without_env, Err(TunnelError::AuthError(_))));
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn test_ssh_runs_outside_the_terminal_process_group() {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let program = fake_ssh(&dir, LISTENING_SSH);

        let mut session = SshForwarder::with_program(program)
            .open(&fake_settings(), 5432, &[])
            .await
            .unwrap();
        let local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), session.local_port());
        assert!(tokio::net::TcpStream::connect(local_addr).await.is_ok());

        // A terminal Ctrl-C goes to our process group; ssh must lead its own
        let ssh_pid = std::fs::read_to_string(dir.path().join("pid")).unwrap();
        let ssh_pid: u32 = ssh_pid.trim().parse().unwrap();
        assert_eq!(process_group_of(ssh_pid), Some(ssh_pid.to_string()));
        assert_ne!(
            process_group_of(ssh_pid),
            process_group_of(std::process::id())
        );

        session.close().await.unwrap();
        assert!(tokio::net::TcpStream::connect(local_addr).await.is_err());
    }
}
