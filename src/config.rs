//! Configuration files
//!
//! Both `sqlshell.ini` and `tunnel.ini` are plain INI files: `[section]` headers,
//! `key = value` entries split on the first `=`, full-line `#`/`;` comments and
//! indented continuation lines. Section names and keys are case-sensitive, since
//! DSN names such as `MSSQL: prod` are used verbatim as keys. A `[DEFAULT]`
//! section supplies fallback values to every other section.
use crate::database::ClientKind;
use crate::dsn::DsnEntry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "sqlshell.ini";
pub const TUNNEL_CONFIG_FILE_NAME: &str = "tunnel.ini";

const DEFAULT_SECTION: &str = "DEFAULT";
const DSN_SECTION: &str = "DSN";
const ENVIRONMENT_SECTION: &str = "Environment";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }
}

/// Parsed INI file, keeping sections and entries in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniStore {
    sections: Vec<Section>,
}

/// Read-only view of one section, falling back to `[DEFAULT]` on lookups
#[derive(Debug, Clone, Copy)]
pub struct SectionView<'a> {
    section: &'a Section,
    defaults: Option<&'a Section>,
}

impl<'a> SectionView<'a> {
    pub fn name(&self) -> &'a str {
        &self.section.name
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.section
            .get(key)
            .or_else(|| self.defaults.and_then(|d| d.get(key)))
    }

    /// Entries defined in the section itself, in file order
    pub fn entries(self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.section
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl IniStore {
    /// Load a store from disk. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                debug!("[IniStore::load] Reading {}", path.display());
                Ok(Self::parse(&content))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("[IniStore::load] {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut store = IniStore::default();
        let mut current: Option<usize> = None;
        let mut last_key: Option<String> = None;

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();

            if line.is_empty() {
                last_key = None;
                continue;
            }
            if line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            // Indented lines continue the previous value
            if raw_line.starts_with([' ', '\t']) {
                if let (Some(section), Some(key)) = (current, last_key.as_deref()) {
                    let section = &mut store.sections[section];
                    let value = match section.get(key) {
                        Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
                        _ => line.to_string(),
                    };
                    section.set(key, value);
                    continue;
                }
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                current = Some(store.section_index_or_insert(name));
                last_key = None;
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!("[IniStore::parse] Ignoring line {}: no '=' delimiter", index + 1);
                continue;
            };
            let Some(section) = current else {
                warn!(
                    "[IniStore::parse] Ignoring line {}: entry outside of any section",
                    index + 1
                );
                continue;
            };

            let key = key.trim();
            store.sections[section].set(key, value.trim().to_string());
            last_key = Some(key.to_string());
        }

        debug!("[IniStore::parse] Parsed {} sections", store.sections.len());
        store
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        }
    }

    fn raw_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Look up a section by its exact name. `DEFAULT` is never returned itself.
    pub fn section(&self, name: &str) -> Option<SectionView<'_>> {
        if name == DEFAULT_SECTION {
            return None;
        }
        self.raw_section(name).map(|section| SectionView {
            section,
            defaults: self.raw_section(DEFAULT_SECTION),
        })
    }
}

/// Options for one client, from the `[<Type>]` or `[<Type>-2]` section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSection {
    /// Executable overriding the built-in client
    pub shell: Option<String>,
    pub prompt: Option<String>,
    /// Client startup/rc file; empty when not configured
    pub startup_file: String,
    /// Text printed before the client starts
    pub help: Option<String>,
}

impl ClientSection {
    pub fn from_section(section: &SectionView<'_>) -> Self {
        let non_empty = |key: &str| {
            section
                .get(key)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            shell: non_empty("shell"),
            prompt: section
                .get("prompt")
                .map(strip_quotes)
                .filter(|prompt| !prompt.is_empty())
                .map(str::to_string),
            startup_file: section.get("startup_file").unwrap_or_default().to_string(),
            help: non_empty("help"),
        }
    }
}

/// Prompts are quoted in the file so they can keep trailing blanks (`prompt = "pg> "`)
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Application configuration loaded from `sqlshell.ini`
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    path: Option<PathBuf>,
    store: IniStore,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            path: Some(path.to_path_buf()),
            store: IniStore::load(path)?,
        })
    }

    pub fn from_store(store: IniStore) -> Self {
        Self { path: None, store }
    }

    /// Re-read the file this configuration was loaded from
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            self.store = IniStore::load(path)?;
        }
        Ok(())
    }

    /// Client options for a database type and generation; a missing section means defaults
    pub fn client_section(&self, kind: ClientKind) -> ClientSection {
        self.store
            .section(&kind.section_name())
            .map(|section| ClientSection::from_section(&section))
            .unwrap_or_default()
    }

    /// Configured DSNs in file order, numbered from 1
    pub fn dsns(&self) -> Vec<DsnEntry> {
        self.store
            .section(DSN_SECTION)
            .map(|section| {
                section
                    .entries()
                    .enumerate()
                    .map(|(index, (name, value))| DsnEntry::new(index + 1, name, value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up a DSN by its 1-based position
    pub fn dsn(&self, position: usize) -> Option<DsnEntry> {
        self.dsns().into_iter().find(|dsn| dsn.position == position)
    }

    /// Variables from the `[Environment]` section, in file order
    pub fn environment(&self) -> Vec<(String, String)> {
        self.store
            .section(ENVIRONMENT_SECTION)
            .map(|section| {
                section
                    .entries()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Get the configuration directory path (`~/.config/sqlshell`)
pub fn get_config_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("sqlshell"))
}

/// Pick the file to read for `file_name`. An explicit path always wins, then a file
/// next to the executable, then the configuration directory.
pub fn resolve_config_path(explicit: Option<&Path>, file_name: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let beside_executable = std::env::current_exe()
        .ok()
        .map(|exe| exe.with_file_name(file_name));
    if let Some(path) = beside_executable.as_ref().filter(|p| p.exists()) {
        return path.clone();
    }

    match get_config_directory() {
        Some(dir) => dir.join(file_name),
        None => beside_executable.unwrap_or_else(|| PathBuf::from(file_name)),
    }
}
