//! Startup load of persisted definitions.
//!
//! Files are parsed and compiled in parallel, then installed one by one in
//! ascending id order. When two files carry the same name the later id
//! wins and the earlier definition is removed. A definition that cannot be
//! read, parsed or compiled is skipped and reported; it never stops the
//! rest from loading.

use std::sync::Arc;

use rayon::prelude::*;

use super::catalog::Catalog;
use super::DefinitionRegistry;
use crate::definition::{Definition, DefinitionKey, DefinitionKind};
use crate::error::Result;
use crate::store::{SkipReason, SkippedDefinition};

/// An older definition dropped because a later file used the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedDuplicate {
    pub kind: DefinitionKind,
    pub name: String,
    pub removed_id: u32,
    pub replacement_id: u32,
}

/// Outcome of loading the definitions directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded_indexes: usize,
    pub loaded_transformers: usize,
    pub replaced_duplicates: Vec<ReplacedDuplicate>,
    pub skipped: Vec<SkippedDefinition>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.replaced_duplicates.is_empty()
    }
}

impl DefinitionRegistry {
    pub(super) fn load_from_store(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        report.loaded_indexes = self.load_kind(&self.indexes, &mut report, |id| {
            // The earlier index also owns indexing state in storage.
            if let Err(error) = self.delete_index_state(id) {
                log::warn!("Could not clean up indexing state of duplicate index {id}: {error}");
            }
            self.remove_index(id).map(|_| ())
        })?;
        report.loaded_transformers = self.load_kind(&self.transformers, &mut report, |id| {
            self.remove_transformer(id).map(|_| ())
        })?;

        Ok(report)
    }

    fn load_kind<D: Definition>(
        &self,
        catalog: &Catalog<D>,
        report: &mut LoadReport,
        remove_duplicate: impl Fn(u32) -> Result<()>,
    ) -> Result<usize> {
        let listing = self.store.list_definitions::<D>()?;
        for skipped in &listing.skipped {
            if let Some(id) = skipped.id {
                self.reserve_ids_through(id);
            }
        }
        report.skipped.extend(listing.skipped);

        let compiler = self.compiler.as_ref();
        let compiled: Vec<(D, Result<D::Artifact>)> = listing
            .definitions
            .into_par_iter()
            .map(|mut definition| {
                definition.prepare();
                let artifact = definition.compile_with(compiler);
                (definition, artifact)
            })
            .collect();

        let mut loaded: usize = 0;
        for (mut definition, artifact) in compiled {
            let id = definition.id();
            self.reserve_ids_through(id);

            if let Some(existing) = catalog.resolve(DefinitionKey::Name(definition.name())) {
                if existing != id {
                    log::warn!(
                        "{} '{}' ({existing}) is replaced by a later definition with the same name ({id})",
                        D::KIND,
                        definition.name()
                    );
                    if let Err(error) = remove_duplicate(existing) {
                        log::warn!("Could not fully remove {} {existing}: {error}", D::KIND);
                    }
                    loaded = loaded.saturating_sub(1);
                    report.replaced_duplicates.push(ReplacedDuplicate {
                        kind: D::KIND,
                        name: definition.name().to_string(),
                        removed_id: existing,
                        replacement_id: id,
                    });
                }
            }

            let installed = artifact.and_then(|artifact| {
                definition.fill_fields_from(&artifact);
                catalog.install(definition.clone(), Arc::new(artifact))
            });
            match installed {
                Ok(()) => loaded += 1,
                Err(error) => {
                    log::warn!(
                        "Skipping {} '{}' ({id}): {error}",
                        D::KIND,
                        definition.name()
                    );
                    report.skipped.push(SkippedDefinition {
                        kind: D::KIND,
                        path: self.store.definition_path(D::KIND, id),
                        id: Some(id),
                        name: Some(definition.name().to_string()),
                        reason: SkipReason::Compile(error.to_string()),
                    });
                }
            }
        }

        Ok(loaded)
    }
}
