//! External fact discovery
//!
//! Files in the external fact directories are handed to the first reader
//! that claims them. A reader reporting [`FactError::External`] only loses
//! its own file; the scan carries on with the rest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, instrument, warn};

use crate::collection::Collection;
use crate::error::FactError;

/// A reader turning one kind of file into facts
pub trait ExternalReader {
    /// Check whether this reader understands the file
    fn can_resolve(&self, path: &Path) -> bool;

    /// Parse the file and add its facts to the collection
    ///
    /// # Errors
    /// Returns `FactError::External` if the file cannot be parsed.
    fn resolve(&self, path: &Path, facts: &mut Collection) -> Result<(), FactError>;
}

/// Directories searched when none are given explicitly
#[must_use]
pub fn default_directories() -> Vec<PathBuf> {
    let mut directories = vec![PathBuf::from("/etc/hostfacts/facts.d")];
    if let Some(home) = std::env::var_os("HOME") {
        directories.push(PathBuf::from(home).join(".hostfacts/facts.d"));
    }
    directories
}

impl Collection {
    /// Scan directories for external facts
    ///
    /// With no `directories` the default locations are searched and missing
    /// ones are only mentioned at debug level.
    ///
    /// # Errors
    /// Returns any reader failure other than `FactError::External`.
    #[instrument(skip(self, readers))]
    pub fn add_external_facts(
        &mut self,
        directories: &[PathBuf],
        readers: &[&dyn ExternalReader],
    ) -> Result<(), FactError> {
        let explicit = !directories.is_empty();
        let search = if explicit {
            directories.to_vec()
        } else {
            default_directories()
        };

        let mut files: BTreeMap<PathBuf, &dyn ExternalReader> = BTreeMap::new();
        for dir in &search {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if explicit {
                        warn!(directory = %dir.display(), error = %e, "skipping external facts");
                    } else {
                        debug!(directory = %dir.display(), error = %e, "skipping external facts");
                    }
                    continue;
                }
            };

            debug!(directory = %dir.display(), "searching for external facts");

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(reader) = readers.iter().find(|r| r.can_resolve(&path)) {
                    files.entry(path).or_insert(*reader);
                }
            }
        }

        if files.is_empty() {
            debug!("no external facts were found");
            return Ok(());
        }

        for (path, reader) in files {
            match reader.resolve(&path, self) {
                Ok(()) => debug!(path = %path.display(), "resolved external facts"),
                Err(e) if e.is_external() => {
                    error!(path = %path.display(), error = %e, "error while processing external facts");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
