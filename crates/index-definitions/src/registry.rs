//! Definition registry.
//!
//! Owns the live index and transformer definitions with their compiled
//! generators, keeps the durable store in line with them and coordinates
//! structural changes with indexing through the [`IndexingGate`].
//!
//! Within one administrative call the artifact is always installed before
//! the definition is persisted, and both happen under the kind's catalog
//! lane. A persistence failure is reported after the in-memory change was
//! applied.

mod catalog;
mod load;


use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::compiler::{DefinitionCompiler, TransformerGenerator, ViewGenerator};
use crate::config::RegistryConfig;
use crate::definition::{
    classify_change, Definition, DefinitionKey, IndexCreationOption, IndexDefinition,
    TransformerDefinition,
};
use crate::error::{DefinitionError, Result};
use crate::gate::IndexingGate;
use crate::storage::TransactionalStorage;
use crate::store::DefinitionStore;

use catalog::Catalog;
pub use load::{LoadReport, ReplacedDuplicate};

/// What `put_index` / `put_transformer` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub id: u32,
    pub name: String,
    pub action: IndexCreationOption,
}

pub struct DefinitionRegistry {
    config: RegistryConfig,
    store: DefinitionStore,
    compiler: Arc<dyn DefinitionCompiler>,
    storage: Arc<dyn TransactionalStorage>,
    indexes: Catalog<IndexDefinition>,
    transformers: Catalog<TransformerDefinition>,
    gate: IndexingGate,
    /// Shared by indexes and transformers.
    next_id: AtomicU32,
    load_report: LoadReport,
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("config", &self.config)
            .field("indexes", &self.indexes.len())
            .field("transformers", &self.transformers.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl DefinitionRegistry {
    /// Opens the registry and loads every persisted definition.
    ///
    /// Entries that fail to load are skipped and listed in [`Self::load_report`].
    pub fn open(
        config: RegistryConfig,
        compiler: Arc<dyn DefinitionCompiler>,
        storage: Arc<dyn TransactionalStorage>,
    ) -> Result<Self> {
        let store = DefinitionStore::open(&config)?;
        let gate = IndexingGate::new(config.administration_timeout());
        let mut registry = Self {
            config,
            store,
            compiler,
            storage,
            indexes: Catalog::new(),
            transformers: Catalog::new(),
            gate,
            next_id: AtomicU32::new(1),
            load_report: LoadReport::default(),
        };

        let report = registry.load_from_store()?;
        registry.indexes.clear_session();
        registry.transformers.clear_session();
        registry.rewrite_listing(&registry.indexes);
        registry.rewrite_listing(&registry.transformers);
        log::info!(
            "Loaded {} index(es) and {} transformer(s) from {} ({} skipped)",
            report.loaded_indexes,
            report.loaded_transformers,
            registry.definitions_path().display(),
            report.skipped.len()
        );
        registry.load_report = report;
        Ok(registry)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn gate(&self) -> &IndexingGate {
        &self.gate
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn definitions_path(&self) -> &Path {
        self.store.directory()
    }

    /// Next id from the counter shared by indexes and transformers.
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn reserve_ids_through(&self, id: u32) {
        self.next_id
            .fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    /// Compiles, installs and persists an index. Returns its name.
    pub fn create_and_persist_index(&self, definition: IndexDefinition) -> Result<String> {
        self.create_and_persist(&self.indexes, definition)
    }

    /// Returns the definition, filling its field list from the generator when empty.
    pub fn get_index_definition<'k>(
        &self,
        key: impl Into<DefinitionKey<'k>>,
    ) -> Option<IndexDefinition> {
        self.indexes.fill_from_artifact(key.into())
    }

    pub fn get_view_generator<'k>(
        &self,
        key: impl Into<DefinitionKey<'k>>,
    ) -> Option<Arc<ViewGenerator>> {
        self.indexes.artifact(key.into())
    }

    /// Upserts an index definition in memory.
    ///
    /// A definition for an id that has no generator yet is compiled first.
    pub fn add_index(&self, definition: IndexDefinition) -> Result<()> {
        self.add(&self.indexes, definition)
    }

    /// Removes an index from memory and disk. Its indexing state is not touched.
    pub fn remove_index(&self, id: u32) -> Result<bool> {
        self.remove(&self.indexes, id)
    }

    /// Classifies `definition` against the index stored under its name.
    ///
    /// Analyzer aliases are resolved first and the stored id is copied onto
    /// the candidate.
    pub fn classify_index_change(&self, definition: &mut IndexDefinition) -> IndexCreationOption {
        self.classify(&self.indexes, definition)
    }

    /// Replaces the stored definition and persists it, keeping the generator.
    pub fn update_index_without_recompile(&self, definition: IndexDefinition) -> Result<()> {
        self.update_without_recompile(&self.indexes, definition)
    }

    pub fn contains_index(&self, name: &str) -> bool {
        self.indexes.contains_name(name)
    }

    pub fn is_new_this_session(&self, definition: &IndexDefinition) -> bool {
        self.indexes.is_new(definition.id)
    }

    /// Marks an index as created during this process lifetime.
    pub fn register_new_index_in_this_session<'k>(&self, key: impl Into<DefinitionKey<'k>>) -> bool {
        self.indexes
            .resolve(key.into())
            .is_some_and(|id| self.indexes.mark_new(id))
    }

    /// Creates or updates an index according to its change classification.
    ///
    /// Structural changes take the gate's administration role and fail with
    /// [`DefinitionError::GateTimeout`] when indexing does not yield in time.
    pub fn put_index(&self, mut definition: IndexDefinition) -> Result<PutOutcome> {
        validate_name(&definition.name)?;
        let action = self.classify_index_change(&mut definition);
        match action {
            IndexCreationOption::Noop => Ok(outcome(&definition, action)),
            IndexCreationOption::UpdateWithoutRecompile => {
                self.update_index_without_recompile(definition.clone())?;
                Ok(outcome(&definition, action))
            }
            IndexCreationOption::Update | IndexCreationOption::Create => {
                let _admin = self.gate.administer()?;
                // Another administrator may have won the race for this name.
                let action = self.classify_index_change(&mut definition);
                match action {
                    IndexCreationOption::Noop => return Ok(outcome(&definition, action)),
                    IndexCreationOption::UpdateWithoutRecompile => {
                        self.update_index_without_recompile(definition.clone())?;
                        return Ok(outcome(&definition, action));
                    }
                    IndexCreationOption::Create => definition.id = self.allocate_id(),
                    IndexCreationOption::Update => {}
                }
                let created = action == IndexCreationOption::Create;
                let result = self.create_and_persist_index(definition.clone());
                if created && self.indexes.resolve(DefinitionKey::Id(definition.id)).is_some() {
                    self.indexes.mark_new(definition.id);
                }
                result?;
                Ok(outcome(&definition, action))
            }
        }
    }

    /// Deletes an index: storage cleanup in one batch, then registry removal.
    ///
    /// Returns `false` when no index has that name.
    pub fn delete_index(&self, name: &str) -> Result<bool> {
        let _admin = self.gate.administer()?;
        let Some(id) = self.indexes.resolve(DefinitionKey::Name(name)) else {
            return Ok(false);
        };
        self.delete_index_state(id)?;
        self.remove_index(id)
    }

    fn delete_index_state(&self, id: u32) -> Result<()> {
        self.storage.batch(&mut |accessor| {
            accessor.prepare_index_for_deletion(id)?;
            accessor.delete_index(id)
        })
    }

    /// Renames the index `old_name` to take over `new_name`.
    ///
    /// Used to promote a side-by-side index. The promoted definition loses
    /// its side-by-side flag and is recompiled and persisted under the new
    /// name. An index currently holding `new_name` is dropped from the
    /// registry in the same step; cleaning its indexing state is up to the
    /// caller. When compiling or installing fails nothing changes.
    ///
    /// Returns `false` when `old_name` does not exist.
    pub fn replace_index(&self, old_name: &str, new_name: &str) -> Result<bool> {
        validate_name(new_name)?;
        let _admin = self.gate.administer()?;
        let _lane = self.indexes.lane();
        let Some(mut definition) = self.indexes.get(DefinitionKey::Name(old_name)) else {
            return Ok(false);
        };
        let displaced = self.indexes.resolve(DefinitionKey::Name(new_name));

        definition.name = new_name.to_string();
        definition.is_side_by_side_index = false;
        definition.fields.clear();
        let artifact = definition.compile_with(self.compiler.as_ref())?;
        definition.fill_fields_from(&artifact);

        let removed = self
            .indexes
            .install_displacing(definition.clone(), Arc::new(artifact), displaced)?;
        self.rewrite_listing(&self.indexes);
        if let Some(removed) = removed {
            log::debug!(
                "Index '{}' ({}) replaced by {}",
                removed.name,
                removed.id,
                definition.id
            );
            self.store.delete(IndexDefinition::KIND, removed.id)?;
        }
        self.store.write(&definition)?;
        Ok(true)
    }

    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes.definitions()
    }

    /// Index names, sorted case-insensitively.
    pub fn index_names(&self) -> Vec<String> {
        self.indexes.names_sorted()
    }

    /// Index ids, ascending.
    pub fn indexes(&self) -> Vec<u32> {
        self.indexes.ids_sorted()
    }

    pub fn indexes_count(&self) -> usize {
        self.indexes.len()
    }

    // -----------------------------------------------------------------------
    // Transformers
    // -----------------------------------------------------------------------

    pub fn create_and_persist_transformer(&self, definition: TransformerDefinition) -> Result<String> {
        self.create_and_persist(&self.transformers, definition)
    }

    pub fn get_transformer_definition<'k>(
        &self,
        key: impl Into<DefinitionKey<'k>>,
    ) -> Option<TransformerDefinition> {
        self.transformers.get(key.into())
    }

    pub fn get_transformer<'k>(
        &self,
        key: impl Into<DefinitionKey<'k>>,
    ) -> Option<Arc<TransformerGenerator>> {
        self.transformers.artifact(key.into())
    }

    pub fn add_transformer(&self, definition: TransformerDefinition) -> Result<()> {
        self.add(&self.transformers, definition)
    }

    pub fn remove_transformer(&self, id: u32) -> Result<bool> {
        self.remove(&self.transformers, id)
    }

    pub fn classify_transformer_change(
        &self,
        definition: &mut TransformerDefinition,
    ) -> IndexCreationOption {
        self.classify(&self.transformers, definition)
    }

    pub fn update_transformer_without_recompile(
        &self,
        definition: TransformerDefinition,
    ) -> Result<()> {
        self.update_without_recompile(&self.transformers, definition)
    }

    pub fn contains_transformer(&self, name: &str) -> bool {
        self.transformers.contains_name(name)
    }

    /// Transformers mirror `put_index` without the gate: indexing never reads them.
    pub fn put_transformer(&self, mut definition: TransformerDefinition) -> Result<PutOutcome> {
        validate_name(&definition.name)?;
        let action = self.classify_transformer_change(&mut definition);
        match action {
            IndexCreationOption::Noop => {}
            IndexCreationOption::UpdateWithoutRecompile => {
                self.update_transformer_without_recompile(definition.clone())?;
            }
            IndexCreationOption::Create => {
                definition.id = self.allocate_id();
                self.create_and_persist_transformer(definition.clone())?;
            }
            IndexCreationOption::Update => {
                self.create_and_persist_transformer(definition.clone())?;
            }
        }
        Ok(PutOutcome {
            id: definition.id,
            name: definition.name,
            action,
        })
    }

    pub fn delete_transformer(&self, name: &str) -> Result<bool> {
        match self.transformers.resolve(DefinitionKey::Name(name)) {
            Some(id) => self.remove_transformer(id),
            None => Ok(false),
        }
    }

    pub fn transformer_definitions(&self) -> Vec<TransformerDefinition> {
        self.transformers.definitions()
    }

    pub fn transformer_names(&self) -> Vec<String> {
        self.transformers.names_sorted()
    }

    pub fn transformers(&self) -> Vec<u32> {
        self.transformers.ids_sorted()
    }

    pub fn transformers_count(&self) -> usize {
        self.transformers.len()
    }

    // -----------------------------------------------------------------------
    // Shared by both kinds
    // -----------------------------------------------------------------------

    fn create_and_persist<D: Definition>(&self, catalog: &Catalog<D>, mut definition: D) -> Result<String> {
        let _lane = catalog.lane();
        if definition.id() == 0 {
            definition.set_id(self.allocate_id());
        } else {
            self.reserve_ids_through(definition.id());
        }
        definition.prepare();

        let artifact = definition.compile_with(self.compiler.as_ref())?;
        definition.fill_fields_from(&artifact);
        catalog.install(definition.clone(), Arc::new(artifact))?;
        self.rewrite_listing(catalog);

        self.store.write(&definition)?;
        Ok(definition.name().to_string())
    }

    fn add<D: Definition>(&self, catalog: &Catalog<D>, mut definition: D) -> Result<()> {
        let _lane = catalog.lane();
        if catalog.artifact(DefinitionKey::Id(definition.id())).is_some() {
            catalog.replace_definition(definition)?;
        } else {
            if definition.id() == 0 {
                definition.set_id(self.allocate_id());
            } else {
                self.reserve_ids_through(definition.id());
            }
            definition.prepare();
            let artifact = definition.compile_with(self.compiler.as_ref())?;
            definition.fill_fields_from(&artifact);
            catalog.install(definition, Arc::new(artifact))?;
        }
        self.rewrite_listing(catalog);
        Ok(())
    }

    fn remove<D: Definition>(&self, catalog: &Catalog<D>, id: u32) -> Result<bool> {
        let _lane = catalog.lane();
        let Some(removed) = catalog.remove(id) else {
            return Ok(false);
        };
        log::debug!("Removed {} '{}' ({id})", D::KIND, removed.name());
        self.rewrite_listing(catalog);
        self.store.delete(D::KIND, id)?;
        Ok(true)
    }

    fn classify<D: Definition>(&self, catalog: &Catalog<D>, definition: &mut D) -> IndexCreationOption {
        definition.prepare();
        let current = catalog.get(DefinitionKey::Name(definition.name()));
        classify_change(current.as_ref(), definition)
    }

    fn update_without_recompile<D: Definition>(&self, catalog: &Catalog<D>, definition: D) -> Result<()> {
        let _lane = catalog.lane();
        catalog.replace_definition(definition.clone())?;
        self.rewrite_listing(catalog);
        self.store.write(&definition)
    }

    /// Best effort: the listing is for humans only.
    fn rewrite_listing<D: Definition>(&self, catalog: &Catalog<D>) {
        if let Err(error) = self.store.write_name_index(D::KIND, &catalog.name_listing()) {
            log::warn!("Could not rewrite the {} listing: {error}", D::KIND);
        }
    }
}

fn outcome(definition: &IndexDefinition, action: IndexCreationOption) -> PutOutcome {
    PutOutcome {
        id: definition.id,
        name: definition.name.clone(),
        action,
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DefinitionError::InvalidInput(
            "definition name must not be empty".to_string(),
        ));
    }
    Ok(())
}
