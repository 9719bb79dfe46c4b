//! Reloadable passcode-to-identity mapping.
//!
//! Credentials live in a plain text file, one `passcode = identity`
//! mapping per line. Blank lines and lines starting with `#` or `!` are
//! comments. Keys and values are trimmed; when a passcode appears twice
//! the later line wins.
//!
//! The store re-reads the file on demand and swaps the in-memory
//! snapshot wholesale. A failed reload leaves the previous snapshot
//! authoritative, so a transient file problem degrades to serving
//! slightly stale credentials rather than locking everyone out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Errors from loading the credential file.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The file could not be read.
    #[error("failed to read credential file {path}: {source}")]
    Io {
        /// Path of the credential file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A non-comment line has no `=` separator.
    #[error("credential file {path} line {line}: expected `passcode = identity`")]
    MalformedLine {
        /// Path of the credential file.
        path: PathBuf,
        /// 1-based line number of the offending line.
        line: usize,
    },
}

/// In-memory credential snapshot, reloadable from a file.
pub struct CredentialStore {
    path: PathBuf,
    mapping: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    /// Opens the store and performs the initial load.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. The
    /// process must not start serving without a usable credential set,
    /// so callers treat this as fatal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let mapping = load_mapping(&path)?;
        tracing::info!(path = %path.display(), entries = mapping.len(), "loaded credentials");
        Ok(Self {
            path,
            mapping: RwLock::new(mapping),
        })
    }

    /// Re-reads the credential file and replaces the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. The
    /// previous snapshot stays in place in that case.
    pub fn reload(&self) -> Result<(), CredentialError> {
        let fresh = load_mapping(&self.path)?;
        let mut mapping = self
            .mapping
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *mapping = fresh;
        Ok(())
    }

    /// Looks up the identity for a passcode.
    #[must_use]
    pub fn lookup(&self, passcode: &str) -> Option<String> {
        let mapping = self
            .mapping
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mapping.get(passcode).cloned()
    }

    /// Returns the number of mappings in the current snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        let mapping = self
            .mapping
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mapping.len()
    }

    /// Returns `true` if the current snapshot has no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the backing credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

fn load_mapping(path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    let text = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_mapping(&text, path)
}

fn parse_mapping(text: &str, path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    let mut mapping = HashMap::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((passcode, identity)) = line.split_once('=') else {
            return Err(CredentialError::MalformedLine {
                path: path.to_path_buf(),
                line: index + 1,
            });
        };
        mapping.insert(passcode.trim().to_owned(), identity.trim().to_owned());
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_credentials(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("passcodes");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_open_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice\n5678=Bob\n");

        let store = CredentialStore::open(path).unwrap();
        assert_eq!(store.lookup("1234").as_deref(), Some("Alice"));
        assert_eq!(store.lookup("5678").as_deref(), Some("Bob"));
        assert_eq!(store.lookup("0000"), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(
            &dir,
            "# front door passcodes\n\n! legacy entries below\n1234 = Alice\n",
        );

        let store = CredentialStore::open(path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup("1234").as_deref(), Some("Alice"));
    }

    #[test]
    fn test_values_may_contain_equals() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice = the first\n");

        let store = CredentialStore::open(path).unwrap();
        assert_eq!(store.lookup("1234").as_deref(), Some("Alice = the first"));
    }

    #[test]
    fn test_duplicate_passcode_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice\n1234 = Mallory\n");

        let store = CredentialStore::open(path).unwrap();
        assert_eq!(store.lookup("1234").as_deref(), Some("Mallory"));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice\nnot a mapping\n");

        let result = CredentialStore::open(path);
        let Err(CredentialError::MalformedLine { line, .. }) = result else {
            panic!("expected malformed line error");
        };
        assert_eq!(line, 2);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = CredentialStore::open(dir.path().join("absent"));
        assert!(matches!(result, Err(CredentialError::Io { .. })));
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice\n");
        let store = CredentialStore::open(&path).unwrap();
        assert_eq!(store.lookup("9999"), None);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "9999 = Carol").unwrap();

        store.reload().unwrap();
        assert_eq!(store.lookup("9999").as_deref(), Some("Carol"));
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice\n");
        let store = CredentialStore::open(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.lookup("1234").as_deref(), Some("Alice"));
    }

    #[test]
    fn test_reload_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(&dir, "1234 = Alice\n5678 = Bob\n");
        let store = CredentialStore::open(&path).unwrap();

        std::fs::write(&path, "5678 = Bob\n").unwrap();
        store.reload().unwrap();

        assert_eq!(store.lookup("1234"), None);
        assert_eq!(store.len(), 1);
    }
}
