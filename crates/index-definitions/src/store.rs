//! Durable definition store.
//!
//! One pretty-printed JSON file per definition under the definitions
//! directory (`{id}.index`, `{id}.transform`), plus the `indexes.txt` and
//! `transformers.txt` listings for humans. Writes go through a temp file and
//! a rename. Every operation is a no-op when the registry runs in memory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::RegistryConfig;
use crate::definition::{Definition, DefinitionKind};
use crate::error::{DefinitionError, Result};

/// Why a persisted definition was not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unreadable(String),
    Malformed(String),
    Compile(String),
}

impl SkipReason {
    pub fn message(&self) -> &str {
        match self {
            Self::Unreadable(message) | Self::Malformed(message) | Self::Compile(message) => {
                message
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDefinition {
    pub kind: DefinitionKind,
    pub path: PathBuf,
    /// Known only when the file name or contents could be read.
    pub id: Option<u32>,
    pub name: Option<String>,
    pub reason: SkipReason,
}

/// Result of scanning the definitions directory for one kind.
#[derive(Debug)]
pub struct Listing<D> {
    /// Parsed definitions, ascending by id.
    pub definitions: Vec<D>,
    pub skipped: Vec<SkippedDefinition>,
}

impl<D> Default for Listing<D> {
    fn default() -> Self {
        Self {
            definitions: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct DefinitionStore {
    directory: PathBuf,
    durable: bool,
    /// Serializes file writes so a temp file is never shared by two writers.
    write_lane: Mutex<()>,
}

impl DefinitionStore {
    /// Opens the store, creating the definitions directory when durable.
    pub fn open(config: &RegistryConfig) -> Result<Self> {
        let directory = config.definitions_path();
        let durable = !config.run_in_memory;
        if durable {
            fs::create_dir_all(&directory)
                .map_err(|error| DefinitionError::persistence(&directory, error))?;
        }
        Ok(Self {
            directory,
            durable,
            write_lane: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn definition_path(&self, kind: DefinitionKind, id: u32) -> PathBuf {
        self.directory
            .join(format!("{id}.{}", kind.file_extension()))
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Reads every persisted definition of kind `D`.
    ///
    /// Entries that cannot be read or parsed are reported in
    /// [`Listing::skipped`]; they never abort the scan.
    pub fn list_definitions<D: Definition>(&self) -> Result<Listing<D>> {
        if !self.durable {
            return Ok(Listing::default());
        }

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Listing::default()),
            Err(error) => return Err(DefinitionError::persistence(&self.directory, error)),
        };

        let extension = D::KIND.file_extension();
        let mut paths: Vec<(Option<u32>, PathBuf)> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == extension))
            .map(|path| (file_id(&path), path))
            .collect();
        paths.sort_by_key(|(id, _)| id.unwrap_or(u32::MAX));

        let parsed: Vec<std::result::Result<D, SkippedDefinition>> = paths
            .into_par_iter()
            .map(|(id, path)| read_definition::<D>(id, path))
            .collect();

        let mut listing = Listing::default();
        for entry in parsed {
            match entry {
                Ok(definition) => listing.definitions.push(definition),
                Err(skipped) => {
                    log::warn!(
                        "Could not read {} definition from {}: {}",
                        skipped.kind,
                        skipped.path.display(),
                        skipped.reason.message()
                    );
                    listing.skipped.push(skipped);
                }
            }
        }
        listing.definitions.sort_by_key(|definition| definition.id());

        log::debug!(
            "Listed {} {} definitions from {} ({} skipped)",
            listing.definitions.len(),
            D::KIND,
            self.directory.display(),
            listing.skipped.len()
        );
        Ok(listing)
    }

    // -----------------------------------------------------------------------
    // Write
    // -----------------------------------------------------------------------

    /// Atomically overwrites the file of `definition`.
    pub fn write<D: Definition>(&self, definition: &D) -> Result<()> {
        if !self.durable {
            return Ok(());
        }
        let path = self.definition_path(D::KIND, definition.id());
        let contents = serde_json::to_string_pretty(definition)
            .map_err(|error| DefinitionError::Serialization(error.to_string()))?;

        let _lane = self.write_lane.lock();
        write_atomic(&path, contents.as_bytes())?;
        log::debug!(
            "Wrote {} '{}' to {}",
            D::KIND,
            definition.name(),
            path.display()
        );
        Ok(())
    }

    /// Deletes the file of definition `id`; a missing file is not an error.
    pub fn delete(&self, kind: DefinitionKind, id: u32) -> Result<()> {
        if !self.durable {
            return Ok(());
        }
        let path = self.definition_path(kind, id);
        let _lane = self.write_lane.lock();
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Deleted {kind} definition {}", path.display());
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(DefinitionError::persistence(path, error)),
        }
    }

    /// Rewrites the `{id} - {name}` listing for `kind` wholesale.
    pub fn write_name_index(&self, kind: DefinitionKind, entries: &[(u32, String)]) -> Result<()> {
        if !self.durable {
            return Ok(());
        }
        let path = self.directory.join(kind.listing_file());
        let contents: String = entries
            .iter()
            .map(|(id, name)| format!("{id} - {name}\n"))
            .collect();

        let _lane = self.write_lane.lock();
        write_atomic(&path, contents.as_bytes())?;
        log::debug!("Rewrote {} ({} entries)", path.display(), entries.len());
        Ok(())
    }
}

fn file_id(path: &Path) -> Option<u32> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn read_definition<D: Definition>(
    id: Option<u32>,
    path: PathBuf,
) -> std::result::Result<D, SkippedDefinition> {
    let skipped = |path: PathBuf, name: Option<String>, reason: SkipReason| SkippedDefinition {
        kind: D::KIND,
        path,
        id,
        name,
        reason,
    };

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) => return Err(skipped(path, None, SkipReason::Unreadable(error.to_string()))),
    };
    let mut definition: D = match serde_json::from_str(&contents) {
        Ok(definition) => definition,
        Err(error) => return Err(skipped(path, None, SkipReason::Malformed(error.to_string()))),
    };

    if definition.name().trim().is_empty() {
        return Err(skipped(
            path,
            None,
            SkipReason::Malformed("definition has no name".to_string()),
        ));
    }
    // The file name is authoritative for files written without an id.
    if definition.id() == 0 {
        if let Some(id) = id {
            definition.set_id(id);
        }
    }
    Ok(definition)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, contents).map_err(|error| DefinitionError::persistence(&tmp_path, error))?;
    fs::rename(&tmp_path, path).map_err(|error| DefinitionError::persistence(path, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{IndexDefinition, TransformerDefinition};
    use tempfile::tempdir;

    fn index(id: u32, name: &str) -> IndexDefinition {
        let mut definition =
            IndexDefinition::new(name, "from doc in docs select new { doc.Name }");
        definition.id = id;
        definition
    }

    #[test]
    fn in_memory_store_touches_nothing() {
        let dir = tempdir().expect("tempdir");
        let config = RegistryConfig {
            run_in_memory: true,
            ..RegistryConfig::durable(dir.path())
        };
        let store = DefinitionStore::open(&config).expect("open");

        store.write(&index(1, "a")).expect("write");
        store.delete(DefinitionKind::Index, 1).expect("delete");
        store
            .write_name_index(DefinitionKind::Index, &[(1, "a".into())])
            .expect("listing");

        assert!(!store.directory().exists());
        let listing = store.list_definitions::<IndexDefinition>().expect("list");
        assert!(listing.definitions.is_empty());
    }

    #[test]
    fn lists_definitions_in_id_order() {
        let dir = tempdir().expect("tempdir");
        let store = DefinitionStore::open(&RegistryConfig::durable(dir.path())).expect("open");
        for (id, name) in [(10, "ten"), (2, "two"), (7, "seven")] {
            store.write(&index(id, name)).expect("write");
        }
        let mut transformer = TransformerDefinition::new("t", "from r in results select r");
        transformer.id = 3;
        store.write(&transformer).expect("write transformer");

        let listing = store.list_definitions::<IndexDefinition>().expect("list");
        let ids: Vec<u32> = listing.definitions.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 7, 10]);
        assert!(listing.skipped.is_empty());

        let transformers = store
            .list_definitions::<TransformerDefinition>()
            .expect("list transformers");
        assert_eq!(transformers.definitions.len(), 1);
    }

    #[test]
    fn written_files_are_pretty_json_without_temp_leftovers() {
        let dir = tempdir().expect("tempdir");
        let store = DefinitionStore::open(&RegistryConfig::durable(dir.path())).expect("open");
        store.write(&index(4, "Users/ByName")).expect("write");

        let path = store.definition_path(DefinitionKind::Index, 4);
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("\n  \"name\": \"Users/ByName\""));
        let leftovers = fs::read_dir(store.directory())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let store = DefinitionStore::open(&RegistryConfig::durable(dir.path())).expect("open");
        store.write(&index(1, "good")).expect("write");
        fs::write(store.definition_path(DefinitionKind::Index, 2), "{ not json").expect("corrupt");

        let listing = store.list_definitions::<IndexDefinition>().expect("list");
        assert_eq!(listing.definitions.len(), 1);
        assert_eq!(listing.skipped.len(), 1);
        assert_eq!(listing.skipped[0].id, Some(2));
        assert!(matches!(listing.skipped[0].reason, SkipReason::Malformed(_)));
    }

    #[test]
    fn deleting_a_missing_file_is_ok() {
        let dir = tempdir().expect("tempdir");
        let store = DefinitionStore::open(&RegistryConfig::durable(dir.path())).expect("open");
        store.delete(DefinitionKind::Index, 99).expect("delete missing");

        store.write(&index(5, "five")).expect("write");
        store.delete(DefinitionKind::Index, 5).expect("delete");
        assert!(!store.definition_path(DefinitionKind::Index, 5).exists());
    }

    #[test]
    fn name_index_is_rewritten_wholesale() {
        let dir = tempdir().expect("tempdir");
        let store = DefinitionStore::open(&RegistryConfig::durable(dir.path())).expect("open");
        store
            .write_name_index(
                DefinitionKind::Index,
                &[(1, "Users/ByName".into()), (3, "Orders".into())],
            )
            .expect("listing");
        store
            .write_name_index(DefinitionKind::Index, &[(3, "Orders".into())])
            .expect("listing");

        let contents =
            fs::read_to_string(store.directory().join("indexes.txt")).expect("read listing");
        assert_eq!(contents, "3 - Orders\n");
    }
}
