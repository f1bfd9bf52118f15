//! # Status Store
//!
//! Durable record of setup progress for one code identity.
//!
//! A record is in one of three states:
//!
//! - **not started**: nothing recorded;
//! - **in progress**: a progress log exists but no completion marker;
//! - **done**: the completion marker exists.
//!
//! The progress log is append-only and line oriented. The completion marker is
//! empty and creating it twice is not an error. [`FileStatusStore`] keeps both
//! on disk (`<scratch>/<identity>` and `<scratch>/<identity>_done`) so a
//! completed setup is reused by later processes that share the scratch
//! directory and identity. [`MemoryStatusStore`] keeps them in memory.

use crate::error::StoreError;
use std::{
    fmt::Debug,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Identity used when the host does not supply a code hash.
pub const DEFAULT_IDENTITY: &str = "_setup";

/// Suffix of the completion marker next to the progress log.
pub const DONE_SUFFIX: &str = "_done";

/// Observable state of a setup record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStatus {
    NotStarted,
    /// Full progress text recorded so far.
    InProgress(String),
    Done,
}

/// Persisted setup state for one identity.
pub trait StatusStore: Send + Sync + Debug {
    fn current_status(&self) -> Result<SetupStatus, StoreError>;

    /// Appends one line of progress text. A trailing newline is added if missing.
    fn append_progress(&self, text: &str) -> Result<(), StoreError>;

    /// Creates the completion marker. Idempotent.
    fn mark_done(&self) -> Result<(), StoreError>;
}

fn as_line(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

/// Encodes a code identity as a single file name component.
///
/// ASCII letters, digits and `-` are kept. Every other byte becomes `_XX`
/// (uppercase hex), so distinct identities never share a file and no encoded
/// name can end in [`DONE_SUFFIX`]. An empty identity, or [`DEFAULT_IDENTITY`]
/// itself, maps to `DEFAULT_IDENTITY`; no encoded name can spell it.
pub fn identity_file_name(identity: &str) -> String {
    if identity.is_empty() || identity == DEFAULT_IDENTITY {
        return DEFAULT_IDENTITY.to_string();
    }
    let mut name = String::with_capacity(identity.len());
    for byte in identity.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{byte:02X}"));
        }
    }
    name
}

/// File-backed store in a scratch directory.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    log_path: PathBuf,
    done_path: PathBuf,
}

impl FileStatusStore {
    pub fn new(scratch_dir: &Path, identity: &str) -> Self {
        let name = identity_file_name(identity);
        Self {
            log_path: scratch_dir.join(&name),
            done_path: scratch_dir.join(format!("{name}{DONE_SUFFIX}")),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn done_path(&self) -> &Path {
        &self.done_path
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl StatusStore for FileStatusStore {
    fn current_status(&self) -> Result<SetupStatus, StoreError> {
        if self.done_path.exists() {
            return Ok(SetupStatus::Done);
        }
        match std::fs::read_to_string(&self.log_path) {
            Ok(text) => Ok(SetupStatus::InProgress(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SetupStatus::NotStarted),
            Err(e) => Err(Self::io_error(&self.log_path, e)),
        }
    }

    fn append_progress(&self, text: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| Self::io_error(&self.log_path, e))?;
        file.write_all(as_line(text).as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Self::io_error(&self.log_path, e))
    }

    fn mark_done(&self) -> Result<(), StoreError> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.done_path)
            .map(drop)
            .map_err(|e| Self::io_error(&self.done_path, e))
    }
}

#[derive(Debug, Default)]
struct MemoryRecord {
    log: Option<String>,
    done: bool,
}

/// In-memory store, for embedding and tests. Not durable across processes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    record: Arc<Mutex<MemoryRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn current_status(&self) -> Result<SetupStatus, StoreError> {
        let record = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(match (&record.log, record.done) {
            (_, true) => SetupStatus::Done,
            (Some(log), false) => SetupStatus::InProgress(log.clone()),
            (None, false) => SetupStatus::NotStarted,
        })
    }

    fn append_progress(&self, text: &str) -> Result<(), StoreError> {
        let mut record = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        record.log.get_or_insert_with(String::new).push_str(&as_line(text));
        Ok(())
    }

    fn mark_done(&self) -> Result<(), StoreError> {
        let mut record = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        record.done = true;
        Ok(())
    }
}

/// Append-only progress sink handed to a handler's `setup`.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    store: Arc<dyn StatusStore>,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Appends one line of free-form progress text.
    pub fn append(&self, text: impl AsRef<str>) -> Result<(), StoreError> {
        self.store.append_progress(text.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = FileStatusStore::new(dir.path(), "abc123");

        assert_eq!(store.current_status().unwrap(), SetupStatus::NotStarted);

        store.append_progress("Setup started.").unwrap();
        store.append_progress("downloading model\n").unwrap();
        assert_eq!(
            store.current_status().unwrap(),
            SetupStatus::InProgress("Setup started.\ndownloading model\n".to_string())
        );

        store.mark_done().unwrap();
        assert_eq!(store.current_status().unwrap(), SetupStatus::Done);
        assert_eq!(std::fs::read(store.done_path()).unwrap().len(), 0);
    }

    #[test]
    fn test_mark_done_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileStatusStore::new(dir.path(), "abc123");

        store.mark_done().unwrap();
        store.mark_done().unwrap();
        assert_eq!(store.current_status().unwrap(), SetupStatus::Done);
    }

    #[test]
    fn test_record_survives_new_store_instance() {
        let dir = TempDir::new().unwrap();
        FileStatusStore::new(dir.path(), "rev-7")
            .mark_done()
            .unwrap();

        let reopened = FileStatusStore::new(dir.path(), "rev-7");
        assert_eq!(reopened.current_status().unwrap(), SetupStatus::Done);

        let other = FileStatusStore::new(dir.path(), "rev-8");
        assert_eq!(other.current_status().unwrap(), SetupStatus::NotStarted);
    }

    #[test]
    fn test_identity_file_name() {
        assert_eq!(identity_file_name("abc123"), "abc123");
        assert_eq!(identity_file_name("../etc/passwd"), "_2E_2E_2Fetc_2Fpasswd");
        assert_eq!(identity_file_name(""), DEFAULT_IDENTITY);
        assert_eq!(identity_file_name(DEFAULT_IDENTITY), DEFAULT_IDENTITY);
        assert_eq!(identity_file_name(".."), "_2E_2E");
    }

    #[test]
    fn test_distinct_identities_get_distinct_records() {
        let identities = ["a/b", "a_b", "a_2Fb", "x", "x_done", "setup", "_setup_"];
        let names: std::collections::HashSet<String> =
            identities.iter().map(|id| identity_file_name(id)).collect();
        assert_eq!(names.len(), identities.len());

        let dir = TempDir::new().unwrap();
        FileStatusStore::new(dir.path(), "a/b").mark_done().unwrap();
        assert_eq!(
            FileStatusStore::new(dir.path(), "a_b").current_status().unwrap(),
            SetupStatus::NotStarted
        );

        // A marker must never be mistaken for another identity's log.
        FileStatusStore::new(dir.path(), "x").mark_done().unwrap();
        assert_eq!(
            FileStatusStore::new(dir.path(), "x_done").current_status().unwrap(),
            SetupStatus::NotStarted
        );
    }

    #[test]
    fn test_memory_store_and_writer() {
        let store = Arc::new(MemoryStatusStore::new());
        let writer = StatusWriter::new(store.clone());

        writer.append("setup level 1").unwrap();
        writer.append("setup level 2").unwrap();
        assert_eq!(
            store.current_status().unwrap(),
            SetupStatus::InProgress("setup level 1\nsetup level 2\n".to_string())
        );

        store.mark_done().unwrap();
        assert_eq!(store.current_status().unwrap(), SetupStatus::Done);
    }
}
