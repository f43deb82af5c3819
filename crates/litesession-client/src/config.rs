//! Engine configuration
//!
//! An [`EngineConfig`] is a database location plus a map of option names to string
//! values. Nothing is validated until [`Engine::open`](crate::Engine::open), where
//! unknown options and malformed values are rejected with [`Error::Config`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Rows per result chunk when `chunk_size` is not configured
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

const MAX_CHUNK_SIZE: usize = 65_536;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options recognized by [`EngineConfig`], with a short description of each
pub const RECOGNIZED_OPTIONS: &[(&str, &str)] = &[
    ("access_mode", "automatic, read_write or read_only"),
    ("busy_timeout", "milliseconds to wait on a locked database"),
    ("cache_size", "page cache size (negative values are KiB)"),
    ("chunk_size", "rows per result chunk and appender batch"),
    ("foreign_keys", "enforce foreign key constraints"),
    ("journal_mode", "delete, truncate, persist, memory, wal or off"),
    ("synchronous", "off, normal, full or extra"),
    ("temp_store", "default, file or memory"),
    ("threads", "auxiliary worker threads for sorting"),
];

/// How connections open the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Automatic,
    ReadWrite,
    ReadOnly,
}

/// Location and options for opening an [`Engine`](crate::Engine)
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    path: Option<PathBuf>,
    options: BTreeMap<String, String>,
}

impl EngineConfig {
    /// Private in-memory database
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Database stored in a file
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            options: BTreeMap::new(),
        }
    }

    /// Set an option; names are case-insensitive
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options
            .insert(name.into().trim().to_ascii_lowercase(), value.into());
        self
    }

    /// Build a config from `(name, value)` pairs
    pub fn with_options<I, K, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in options {
            self = self.set(name, value);
        }
        self
    }

    /// Split a `name=value` assignment, as given on the command line
    pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            Error::Config(format!("expected NAME=VALUE, got '{}'", assignment))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config(format!(
                "missing option name in '{}'",
                assignment
            )));
        }
        Ok((name.to_string(), value.trim().to_string()))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Validate every option and produce the settings the engine applies
    pub(crate) fn resolve(&self) -> Result<ResolvedConfig> {
        let mut resolved = ResolvedConfig::default();

        for (name, value) in &self.options {
            let value = value.trim();
            match name.as_str() {
                "access_mode" => {
                    resolved.access_mode = match value.to_ascii_lowercase().as_str() {
                        "automatic" => AccessMode::Automatic,
                        "read_write" => AccessMode::ReadWrite,
                        "read_only" => AccessMode::ReadOnly,
                        _ => return Err(invalid(name, value)),
                    };
                }
                "busy_timeout" => {
                    let ms: u64 = value.parse().map_err(|_| invalid(name, value))?;
                    resolved.busy_timeout = Duration::from_millis(ms);
                }
                "cache_size" => {
                    let pages: i64 = value.parse().map_err(|_| invalid(name, value))?;
                    resolved.pragmas.push(("cache_size", pages.to_string()));
                }
                "chunk_size" => {
                    let rows: usize = value.parse().map_err(|_| invalid(name, value))?;
                    if rows == 0 || rows > MAX_CHUNK_SIZE {
                        return Err(Error::Config(format!(
                            "chunk_size must be between 1 and {}, got {}",
                            MAX_CHUNK_SIZE, rows
                        )));
                    }
                    resolved.chunk_size = rows;
                }
                "foreign_keys" => {
                    let on = parse_bool(value).ok_or_else(|| invalid(name, value))?;
                    resolved
                        .pragmas
                        .push(("foreign_keys", if on { "ON" } else { "OFF" }.to_string()));
                }
                "journal_mode" => {
                    let mode = one_of(
                        name,
                        value,
                        &["delete", "truncate", "persist", "memory", "wal", "off"],
                    )?;
                    resolved.journal_mode = Some(mode);
                }
                "synchronous" => {
                    let mode = one_of(name, value, &["off", "normal", "full", "extra"])?;
                    resolved.pragmas.push(("synchronous", mode));
                }
                "temp_store" => {
                    let mode = one_of(name, value, &["default", "file", "memory"])?;
                    resolved.pragmas.push(("temp_store", mode));
                }
                "threads" => {
                    let n: u32 = value.parse().map_err(|_| invalid(name, value))?;
                    resolved.pragmas.push(("threads", n.to_string()));
                }
                other => {
                    return Err(Error::Config(format!("unrecognized option '{}'", other)));
                }
            }
        }

        if resolved.access_mode == AccessMode::ReadOnly && self.path.is_none() {
            return Err(Error::Config(
                "access_mode=read_only requires a database file".to_string(),
            ));
        }

        Ok(resolved)
    }
}

/// Validated settings applied to every connection of an engine
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub access_mode: AccessMode,
    pub busy_timeout: Duration,
    pub chunk_size: usize,
    pub journal_mode: Option<String>,
    /// Per-connection pragmas, already validated
    pub pragmas: Vec<(&'static str, String)>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::Automatic,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            journal_mode: None,
            pragmas: Vec::new(),
        }
    }
}

fn invalid(name: &str, value: &str) -> Error {
    Error::Config(format!("invalid value '{}' for option '{}'", value, name))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Some(true),
        "false" | "off" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn one_of(name: &str, value: &str, allowed: &[&str]) -> Result<String> {
    let lowered = value.to_ascii_lowercase();
    if allowed.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(Error::Config(format!(
            "invalid value '{}' for option '{}' (expected one of: {})",
            value,
            name,
            allowed.join(", ")
        )))
    }
}
