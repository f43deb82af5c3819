//! Engine handle
//!
//! An [`Engine`] owns one database instance. In-memory engines live in a private,
//! process-wide named memory database so that every [`Session`] opened on the engine
//! sees the same data; an anchor connection keeps it alive until [`Engine::close`].

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, instrument};

use crate::config::{AccessMode, EngineConfig, ResolvedConfig};
use crate::error::{EngineStatus, Error, Result};
use crate::session::Session;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
enum Location {
    Memory { uri: String },
    File(PathBuf),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Memory { .. } => f.write_str(":memory:"),
            Location::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Handle to one open database instance
///
/// The engine can be shared between threads; each thread opens its own
/// [`Session`] with [`Engine::connect`].
pub struct Engine {
    location: Location,
    config: ResolvedConfig,
    anchor: Mutex<Connection>,
    next_session: AtomicU64,
    open_sessions: AtomicUsize,
}

impl Engine {
    /// Open a database
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use litesession_client::{Engine, EngineConfig};
    /// # fn main() -> litesession_client::Result<()> {
    /// let engine = Engine::open(EngineConfig::in_memory().set("threads", "2"))?;
    /// let session = engine.connect()?;
    /// session.disconnect()?;
    /// engine.close()?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(config), fields(path = ?config.path()))]
    pub fn open(config: EngineConfig) -> Result<Self> {
        let resolved = config.resolve()?;

        let location = match config.path() {
            Some(path) => Location::File(path.to_path_buf()),
            None => Location::Memory {
                uri: format!(
                    "file:/litesession-{}-{}?vfs=memdb",
                    std::process::id(),
                    NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed)
                ),
            },
        };

        let anchor = open_connection(&location, &resolved)?;
        if let Some(mode) = &resolved.journal_mode {
            if resolved.access_mode != AccessMode::ReadOnly {
                anchor
                    .execute_batch(&format!("PRAGMA journal_mode = {}", mode))
                    .map_err(|e| {
                        Error::Config(format!(
                            "failed to apply journal_mode: {}",
                            EngineStatus::from(e)
                        ))
                    })?;
            }
        }

        info!("Opened database {}", location);
        Ok(Self {
            location,
            config: resolved,
            anchor: Mutex::new(anchor),
            next_session: AtomicU64::new(1),
            open_sessions: AtomicUsize::new(0),
        })
    }

    /// Open a new session on this engine
    pub fn connect(&self) -> Result<Session<'_>> {
        Session::connect(self)
    }

    /// Number of sessions currently connected
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    /// `:memory:` or the database file path
    pub fn location(&self) -> String {
        self.location.to_string()
    }

    /// Rows per result chunk
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Engine library version
    pub fn version() -> &'static str {
        rusqlite::version()
    }

    /// Close the database
    ///
    /// Sessions borrow the engine, so none can be alive at this point.
    pub fn close(self) -> Result<()> {
        let Engine {
            location, anchor, ..
        } = self;
        anchor.into_inner().close().map_err(|(_, e)| {
            Error::Connection(format!(
                "failed to close {}: {}",
                location,
                EngineStatus::from(e)
            ))
        })?;
        info!("Closed database {}", location);
        Ok(())
    }

    pub(crate) fn open_session_connection(&self) -> Result<Connection> {
        open_connection(&self.location, &self.config)
    }

    pub(crate) fn register_session(&self) -> u64 {
        self.open_sessions.fetch_add(1, Ordering::AcqRel);
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn release_session(&self) {
        self.open_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("location", &self.location.to_string())
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

fn open_connection(location: &Location, config: &ResolvedConfig) -> Result<Connection> {
    let (target, flags) = match location {
        Location::Memory { uri } => (
            PathBuf::from(uri),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ),
        Location::File(path) => {
            let mode = match config.access_mode {
                AccessMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
                AccessMode::Automatic | AccessMode::ReadWrite => {
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                }
            };
            (path.clone(), mode | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        }
    };

    let conn = Connection::open_with_flags(&target, flags).map_err(|e| {
        Error::Connection(format!(
            "failed to open {}: {}",
            location,
            EngineStatus::from(e)
        ))
    })?;

    conn.busy_timeout(config.busy_timeout).map_err(|e| {
        Error::Config(format!(
            "failed to apply busy_timeout: {}",
            EngineStatus::from(e)
        ))
    })?;
    for (name, value) in &config.pragmas {
        conn.execute_batch(&format!("PRAGMA {} = {}", name, value))
            .map_err(|e| {
                Error::Config(format!("failed to apply {}: {}", name, EngineStatus::from(e)))
            })?;
    }

    debug!("Opened connection to {}", location);
    Ok(conn)
}
