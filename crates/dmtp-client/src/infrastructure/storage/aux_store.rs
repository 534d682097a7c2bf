//! Flat-file property persistence.
//!
//! The file holds one `name=value` line per changed savable property, as
//! produced by [`PropertyStore::savable_lines`](dmtp_core::PropertyStore::savable_lines).
//! Blank lines and lines starting with `#` are ignored on read, so the file
//! can be annotated by hand.
//!
//! Writes go to a sibling `.tmp` file first and are renamed into place, so a
//! crash mid-write leaves the previous contents intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dmtp_core::props::{AuxStore, AuxStoreError};
use tracing::debug;

/// [`AuxStore`] backed by a text file.
#[derive(Debug, Clone)]
pub struct FileAuxStore {
    path: PathBuf,
}

impl FileAuxStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl AuxStore for FileAuxStore {
    fn write_data(&mut self, lines: &[String]) -> Result<(), AuxStoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut content = lines.join("\n");
        content.push('\n');
        let tmp = self.temp_path();
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = lines.len(), "properties written");
        Ok(())
    }

    fn read_data(&mut self) -> Result<Option<Vec<String>>, AuxStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let lines = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Ok(Some(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmtp_core::props::keys::{PROP_COMM_SPEAK_FIRST, PROP_STATE_ACCOUNT_ID};
    use dmtp_core::PropertyStore;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("dmtp-aux-{}-{name}", std::process::id()))
            .join("props.conf")
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let mut store = FileAuxStore::new(scratch("missing"));
        assert!(store.read_data().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read_skips_comments() {
        // Arrange
        let path = scratch("comments");
        let mut store = FileAuxStore::new(&path);
        store
            .write_data(&["sta.account=acme".to_string(), "com.first=0".to_string()])
            .unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.insert_str(0, "# edited by hand\n\n");
        std::fs::write(&path, text).unwrap();

        // Act
        let lines = store.read_data().unwrap().expect("file exists");

        // Assert
        assert_eq!(lines, vec!["sta.account=acme", "com.first=0"]);
        assert!(!store.temp_path().exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_properties_survive_a_restart() {
        // Arrange
        let path = scratch("restart");
        let mut store = FileAuxStore::new(&path);
        let mut before = PropertyStore::new();
        before.set_string(PROP_STATE_ACCOUNT_ID, "acme").unwrap();
        before.set_bool(PROP_COMM_SPEAK_FIRST, false).unwrap();

        // Act
        before.save_to_store(&mut store).unwrap();
        let mut after = PropertyStore::new();
        after.load_from_store(&mut store).unwrap();

        // Assert
        assert_eq!(after.get_string(PROP_STATE_ACCOUNT_ID), "acme");
        assert!(!after.get_bool(PROP_COMM_SPEAK_FIRST, true));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
