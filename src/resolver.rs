//! Connection resolution: from a validated request and the client's configuration
//! section to the executable, options, connection arguments and environment
//! of the client to launch.
//!
//! Connection arguments may refer to the server through `{host}`/`{port}`
//! placeholders. They stay unresolved until the tunnel endpoint is known, and
//! [`ResolvedInvocation::bind`] consumes the invocation so they are bound once.
use crate::config::ClientSection;
use crate::database::{ClientGeneration, ClientKind, DatabaseType, Platform};
use crate::dsn;
use crate::launcher::LaunchSpec;
use crate::request::ConnectionRequest;
use crate::tunnel::TunnelEndpoint;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fmt;

/// Characters left as-is in the user-info part of a connection URI
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Host,
    Port,
}

/// A connection argument that may contain host/port placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgTemplate {
    segments: Vec<Segment>,
}

impl ArgTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Text(text.into()));
        self
    }

    pub fn host(mut self) -> Self {
        self.segments.push(Segment::Host);
        self
    }

    pub fn port(mut self) -> Self {
        self.segments.push(Segment::Port);
        self
    }

    fn render(&self, host: &str, port: &str) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.as_str(),
                Segment::Host => host,
                Segment::Port => port,
            })
            .collect()
    }
}

impl From<&str> for ArgTemplate {
    fn from(text: &str) -> Self {
        ArgTemplate::new().text(text)
    }
}

impl From<String> for ArgTemplate {
    fn from(text: String) -> Self {
        ArgTemplate::new().text(text)
    }
}

/// Renders placeholders as `{host}` and `{port}`
impl fmt::Display for ArgTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render("{host}", "{port}"))
    }
}

/// Everything needed to launch a client, except the final server address
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    pub kind: ClientKind,
    pub executable: String,
    pub options: Vec<String>,
    pub arguments: Vec<ArgTemplate>,
    pub env: BTreeMap<String, String>,
    /// Server to tunnel to; `None` for SQLite and DSN connections
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
}

impl ResolvedInvocation {
    /// Connection arguments with placeholders shown as `{host}`/`{port}`
    pub fn argument_strings(&self) -> Vec<String> {
        self.arguments.iter().map(ToString::to_string).collect()
    }

    /// Substitute the tunnel endpoint into the connection arguments
    pub fn bind(self, endpoint: &TunnelEndpoint) -> LaunchSpec {
        let host = endpoint.host.as_deref().unwrap_or_default();
        let port = endpoint.port.map(|p| p.to_string()).unwrap_or_default();

        LaunchSpec {
            executable: self.executable,
            options: self.options,
            arguments: self
                .arguments
                .iter()
                .map(|arg| arg.render(host, &port))
                .collect(),
            env: self.env,
        }
    }
}

#[derive(Default)]
struct ClientParts {
    options: Vec<String>,
    arguments: Vec<ArgTemplate>,
    env: BTreeMap<String, String>,
}

/// Resolve a request for the platform this binary runs on
pub fn resolve(request: &ConnectionRequest, section: &ClientSection) -> ResolvedInvocation {
    resolve_for(Platform::current(), request, section)
}

pub fn resolve_for(
    platform: Platform,
    request: &ConnectionRequest,
    section: &ClientSection,
) -> ResolvedInvocation {
    let kind = request.kind;
    let mut parts = match kind.database {
        DatabaseType::MSSQL => mssql(request, section),
        DatabaseType::MySQL => mysql(request, section),
        DatabaseType::Oracle => oracle(request, section),
        DatabaseType::PostgreSQL => postgresql(request, section),
        DatabaseType::SQLite => sqlite(request, section),
    };

    let mut remote_host = Some(request.host.clone());
    let mut remote_port = request.port;
    if kind.database.is_file_based() {
        remote_host = None;
        remote_port = None;
    }

    // DSNs take precedence over the entered connection fields and are never tunneled
    if let Some(dsn_value) = &request.dsn {
        parts.arguments = dsn::split(dsn_value, kind.database)
            .into_iter()
            .map(ArgTemplate::from)
            .collect();
        remote_host = None;
        remote_port = None;
    }

    let executable = section
        .shell
        .clone()
        .unwrap_or_else(|| kind.default_executable(platform).to_string());

    ResolvedInvocation {
        kind,
        executable,
        options: parts.options,
        arguments: parts.arguments,
        env: parts.env,
        remote_host,
        remote_port,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn mssql(request: &ConnectionRequest, section: &ClientSection) -> ClientParts {
    let localdb = request.dsn.as_deref().is_some_and(dsn::is_localdb)
        || dsn::is_localdb(&request.host);

    // -N encrypts the connection, -C trusts the server certificate
    let mut options = if localdb {
        strings(&["-C"])
    } else {
        strings(&["-N", "-C"])
    };
    let mut env = BTreeMap::new();
    match request.generation() {
        ClientGeneration::Modern => {
            options.extend(strings(&["--mssqlclirc", &section.startup_file]))
        }
        ClientGeneration::Legacy => {
            env.insert("SQLCMDINI".to_string(), section.startup_file.clone());
        }
    }

    // Named pipes have no TCP port
    let server = if localdb {
        ArgTemplate::new().host()
    } else {
        ArgTemplate::new().host().text(",").port()
    };

    ClientParts {
        options,
        arguments: vec![
            "-U".into(),
            request.user.as_str().into(),
            "-P".into(),
            request.password.as_str().into(),
            "-S".into(),
            server,
            "-d".into(),
            request.database_name.as_str().into(),
        ],
        env,
    }
}

fn mysql(request: &ConnectionRequest, section: &ClientSection) -> ClientParts {
    let mut arguments: Vec<ArgTemplate> = vec![
        "-u".into(),
        request.user.as_str().into(),
        "-h".into(),
        ArgTemplate::new().host(),
        "-P".into(),
        ArgTemplate::new().port(),
        "-D".into(),
        request.database_name.as_str().into(),
    ];
    if !request.password.is_empty() {
        arguments.push(format!("-p{}", request.password).into());
    }

    let startup_file = section.startup_file.as_str();
    let options = match request.generation() {
        ClientGeneration::Modern if startup_file.is_empty() => Vec::new(),
        ClientGeneration::Modern => strings(&["--myclirc", startup_file]),
        // --defaults-file is only honored as the very first option
        ClientGeneration::Legacy if startup_file.is_empty() => strings(&["--protocol=TCP"]),
        ClientGeneration::Legacy => vec![
            format!("--defaults-file={startup_file}"),
            "--protocol=TCP".to_string(),
        ],
    };

    ClientParts {
        options,
        arguments,
        env: BTreeMap::new(),
    }
}

fn oracle(request: &ConnectionRequest, section: &ClientSection) -> ClientParts {
    let mut connect = ArgTemplate::new()
        .text(format!("{}/{}@//", request.user, request.password))
        .host()
        .text(":")
        .port();
    // SQLcl rejects a connect string ending in '/'
    if !request.database_name.is_empty() {
        connect = connect.text(format!("/{}", request.database_name));
    }

    let mut arguments = vec![connect];
    if request.user.eq_ignore_ascii_case("sys") {
        arguments.push("as".into());
        arguments.push("sysdba".into());
    }

    let (option, sqlpath) = match request.generation() {
        ClientGeneration::Modern => ("-logon", section.startup_file.clone()),
        ClientGeneration::Legacy => ("-l", String::new()),
    };

    ClientParts {
        options: strings(&[option]),
        arguments,
        env: BTreeMap::from([("SQLPATH".to_string(), sqlpath)]),
    }
}

fn postgresql(request: &ConnectionRequest, section: &ClientSection) -> ClientParts {
    let uri = ArgTemplate::new()
        .text(format!(
            "postgres://{}:{}@",
            utf8_percent_encode(&request.user, USERINFO),
            utf8_percent_encode(&request.password, USERINFO)
        ))
        .host()
        .text(":")
        .port()
        .text(format!("/{}", request.database_name));

    let mut parts = ClientParts {
        arguments: vec![uri],
        ..Default::default()
    };
    match request.generation() {
        ClientGeneration::Modern => {
            parts.options = strings(&["--pgclirc", &section.startup_file]);
            if let Some(prompt) = &section.prompt {
                parts.options.extend(strings(&["--prompt", prompt]));
            }
        }
        ClientGeneration::Legacy => {
            parts
                .env
                .insert("PSQLRC".to_string(), section.startup_file.clone());
        }
    }
    parts
}

fn sqlite(request: &ConnectionRequest, section: &ClientSection) -> ClientParts {
    // Forward slashes keep litecli's prompt readable on Windows
    let path = request.database_name.replace('\\', "/");

    let options = match request.generation() {
        ClientGeneration::Modern => {
            let mut options = strings(&["--liteclirc", &section.startup_file]);
            if let Some(prompt) = &section.prompt {
                options.extend(strings(&["--prompt", prompt]));
            }
            options
        }
        ClientGeneration::Legacy => strings(&["-init", &section.startup_file]),
    };

    ClientParts {
        options,
        arguments: vec![path.into()],
        env: BTreeMap::new(),
    }
}
