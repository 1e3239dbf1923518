//! Dual-keyed store of live definitions and their compiled artifacts.
//!
//! Definitions, artifacts and the folded-name map live behind one lock, so
//! every mutation updates them together and the id <-> name mapping stays a
//! bijection. Compilation always happens before a catalog method is called.
//!
//! Sequences that mutate the catalog and then persist hold the catalog's
//! lane for the whole sequence, so files are written in the same order the
//! maps changed.

use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::compiler::Artifact;
use crate::definition::{fold_name, Definition, DefinitionKey};
use crate::error::{DefinitionError, Result};

struct CatalogState<D: Definition> {
    definitions: FnvHashMap<u32, D>,
    artifacts: FnvHashMap<u32, Arc<D::Artifact>>,
    names: FnvHashMap<String, u32>,
    new_this_session: FnvHashSet<u32>,
}

impl<D: Definition> Default for CatalogState<D> {
    fn default() -> Self {
        Self {
            definitions: FnvHashMap::default(),
            artifacts: FnvHashMap::default(),
            names: FnvHashMap::default(),
            new_this_session: FnvHashSet::default(),
        }
    }
}

impl<D: Definition> CatalogState<D> {
    fn resolve(&self, key: DefinitionKey<'_>) -> Option<u32> {
        match key {
            DefinitionKey::Id(id) => self.definitions.contains_key(&id).then_some(id),
            DefinitionKey::Name(name) => self.names.get(&fold_name(name)).copied(),
        }
    }

    fn ensure_replaceable(&self, id: u32) -> Result<()> {
        match self.definitions.get(&id) {
            Some(existing) if existing.is_compiled() => Err(DefinitionError::InvariantViolation(
                format!(
                    "{} '{}' ({id}) is compiled and cannot be replaced",
                    D::KIND,
                    existing.name()
                ),
            )),
            _ => Ok(()),
        }
    }

    fn ensure_name_free(&self, name: &str, id: u32) -> Result<()> {
        match self.names.get(&fold_name(name)) {
            Some(&holder) if holder != id => Err(DefinitionError::InvariantViolation(format!(
                "{} name '{name}' is already used by id {holder}",
                D::KIND
            ))),
            _ => Ok(()),
        }
    }

    fn remove_entry(&mut self, id: u32) -> Option<D> {
        self.release_names(id);
        self.artifacts.remove(&id);
        self.new_this_session.remove(&id);
        self.definitions.remove(&id)
    }

    /// Drops name entries still pointing at `id`.
    fn release_names(&mut self, id: u32) {
        let mut stale = Vec::with_capacity(2);
        if let Some(artifact) = self.artifacts.get(&id) {
            stale.push(fold_name(artifact.name()));
        }
        if let Some(definition) = self.definitions.get(&id) {
            stale.push(fold_name(definition.name()));
        }
        for key in stale {
            if self.names.get(&key) == Some(&id) {
                self.names.remove(&key);
            }
        }
    }
}

pub(crate) struct Catalog<D: Definition> {
    state: RwLock<CatalogState<D>>,
    lane: Mutex<()>,
}

impl<D: Definition> Default for Catalog<D> {
    fn default() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            lane: Mutex::new(()),
        }
    }
}

impl<D: Definition> Catalog<D> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serializes mutate-then-persist sequences. Not reentrant.
    pub(crate) fn lane(&self) -> MutexGuard<'_, ()> {
        self.lane.lock()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Installs a definition with its freshly compiled artifact.
    ///
    /// Replaces any previous definition and artifact under the same id. Fails
    /// without changing anything when the current definition is compiled or
    /// the name belongs to another id.
    pub(crate) fn install(&self, definition: D, artifact: Arc<D::Artifact>) -> Result<()> {
        let id = definition.id();
        let mut state = self.state.write();
        state.ensure_replaceable(id)?;
        state.ensure_name_free(definition.name(), id)?;

        state.release_names(id);
        state.names.insert(fold_name(definition.name()), id);
        state.artifacts.insert(id, artifact);
        state.definitions.insert(id, definition);
        Ok(())
    }

    /// Swaps the stored definition of an installed id, keeping its artifact.
    pub(crate) fn replace_definition(&self, definition: D) -> Result<()> {
        let id = definition.id();
        let mut state = self.state.write();
        if !state.artifacts.contains_key(&id) {
            return Err(DefinitionError::NotFound(format!(
                "{} with id {id} ('{}')",
                D::KIND,
                definition.name()
            )));
        }
        state.ensure_replaceable(id)?;
        state.ensure_name_free(definition.name(), id)?;

        let previous = state
            .definitions
            .get(&id)
            .map(|existing| fold_name(existing.name()));
        if let Some(previous) = previous {
            if state.names.get(&previous) == Some(&id) {
                state.names.remove(&previous);
            }
        }
        state.names.insert(fold_name(definition.name()), id);
        state.definitions.insert(id, definition);
        Ok(())
    }

    /// Installs a renamed definition and drops `displaced`, the id holding
    /// the new name, in the same step.
    ///
    /// Both entries are checked before anything changes: neither may be
    /// compiled and the new name must be free or held by `displaced`.
    /// Returns the displaced definition.
    pub(crate) fn install_displacing(
        &self,
        definition: D,
        artifact: Arc<D::Artifact>,
        displaced: Option<u32>,
    ) -> Result<Option<D>> {
        let id = definition.id();
        let displaced = displaced.filter(|&holder| holder != id);
        let mut state = self.state.write();
        state.ensure_replaceable(id)?;
        if let Some(holder) = displaced {
            state.ensure_replaceable(holder)?;
        }
        match state.names.get(&fold_name(definition.name())) {
            Some(&holder) if holder != id && Some(holder) != displaced => {
                return Err(DefinitionError::InvariantViolation(format!(
                    "{} name '{}' is already used by id {holder}",
                    D::KIND,
                    definition.name()
                )));
            }
            _ => {}
        }

        let removed = displaced.and_then(|holder| state.remove_entry(holder));
        state.release_names(id);
        state.names.insert(fold_name(definition.name()), id);
        state.artifacts.insert(id, artifact);
        state.definitions.insert(id, definition);
        Ok(removed)
    }

    /// Removes `id` from every map at once.
    pub(crate) fn remove(&self, id: u32) -> Option<D> {
        self.state.write().remove_entry(id)
    }

    /// Copies derived data from the artifact into the stored definition.
    ///
    /// Returns the (possibly updated) definition.
    pub(crate) fn fill_from_artifact(&self, key: DefinitionKey<'_>) -> Option<D> {
        {
            let state = self.state.read();
            let id = state.resolve(key)?;
            let definition = state.definitions.get(&id)?;
            let mut probe = definition.clone();
            let Some(artifact) = state.artifacts.get(&id) else {
                return Some(probe);
            };
            if !probe.fill_fields_from(artifact) {
                return Some(probe);
            }
        }

        let mut state = self.state.write();
        let id = state.resolve(key)?;
        let artifact = state.artifacts.get(&id).cloned();
        let definition = state.definitions.get_mut(&id)?;
        if let Some(artifact) = artifact {
            definition.fill_fields_from(&artifact);
        }
        Some(definition.clone())
    }

    pub(crate) fn mark_new(&self, id: u32) -> bool {
        let mut state = self.state.write();
        state.definitions.contains_key(&id) && state.new_this_session.insert(id)
    }

    pub(crate) fn clear_session(&self) {
        self.state.write().new_this_session.clear();
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub(crate) fn resolve(&self, key: DefinitionKey<'_>) -> Option<u32> {
        self.state.read().resolve(key)
    }

    pub(crate) fn get(&self, key: DefinitionKey<'_>) -> Option<D> {
        let state = self.state.read();
        let id = state.resolve(key)?;
        state.definitions.get(&id).cloned()
    }

    pub(crate) fn artifact(&self, key: DefinitionKey<'_>) -> Option<Arc<D::Artifact>> {
        let state = self.state.read();
        let id = state.resolve(key)?;
        state.artifacts.get(&id).cloned()
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.state.read().names.contains_key(&fold_name(name))
    }

    pub(crate) fn is_new(&self, id: u32) -> bool {
        self.state.read().new_this_session.contains(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().artifacts.len()
    }

    pub(crate) fn ids_sorted(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.state.read().artifacts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .read()
            .definitions
            .values()
            .map(|definition| definition.name().to_string())
            .collect();
        names.sort_by_key(|name| fold_name(name));
        names
    }

    /// All definitions, ascending by id.
    pub(crate) fn definitions(&self) -> Vec<D> {
        let mut definitions: Vec<D> = self.state.read().definitions.values().cloned().collect();
        definitions.sort_by_key(|definition| definition.id());
        definitions
    }

    /// `(id, name)` pairs for the diagnostic listing, ascending by id.
    pub(crate) fn name_listing(&self) -> Vec<(u32, String)> {
        let mut listing: Vec<(u32, String)> = self
            .state
            .read()
            .definitions
            .iter()
            .map(|(id, definition)| (*id, definition.name().to_string()))
            .collect();
        listing.sort_unstable_by_key(|(id, _)| *id);
        listing
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.state.read();
        assert_eq!(state.definitions.len(), state.artifacts.len());
        assert_eq!(state.definitions.len(), state.names.len());
        for (id, definition) in &state.definitions {
            assert_eq!(state.names.get(&fold_name(definition.name())), Some(id));
            assert!(state.artifacts.contains_key(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{DefinitionCompiler, ExpressionCompiler, ViewGenerator};
    use crate::definition::IndexDefinition;

    fn compiled(id: u32, name: &str) -> (IndexDefinition, Arc<ViewGenerator>) {
        let mut definition =
            IndexDefinition::new(name, "from doc in docs select new { doc.Name }");
        definition.id = id;
        let artifact = ExpressionCompiler::default()
            .compile_index(&definition)
            .expect("compile");
        (definition, Arc::new(artifact))
    }

    #[test]
    fn install_is_reachable_by_id_and_folded_name() {
        let catalog = Catalog::new();
        let (definition, artifact) = compiled(1, "Users/ByName");
        catalog.install(definition, artifact).expect("install");

        assert_eq!(catalog.resolve(DefinitionKey::Name("users/byname")), Some(1));
        assert!(catalog.artifact(DefinitionKey::Id(1)).is_some());
        assert!(catalog.contains_name("USERS/BYNAME"));
        catalog.assert_consistent();
    }

    #[test]
    fn name_held_by_another_id_is_rejected() {
        let catalog = Catalog::new();
        let (first, artifact) = compiled(1, "Users");
        catalog.install(first, artifact).expect("install");

        let (second, artifact) = compiled(2, "users");
        let err = catalog.install(second, artifact).expect_err("conflict");
        assert!(matches!(err, DefinitionError::InvariantViolation(_)));
        assert_eq!(catalog.len(), 1);
        catalog.assert_consistent();
    }

    #[test]
    fn reinstall_under_new_name_drops_old_name() {
        let catalog = Catalog::new();
        let (definition, artifact) = compiled(1, "Old");
        catalog.install(definition, artifact).expect("install");

        let (renamed, artifact) = compiled(1, "New");
        catalog.install(renamed, artifact).expect("reinstall");

        assert!(!catalog.contains_name("Old"));
        assert_eq!(catalog.resolve(DefinitionKey::Name("new")), Some(1));
        catalog.assert_consistent();
    }

    #[test]
    fn compiled_definitions_cannot_be_replaced() {
        let catalog = Catalog::new();
        let (mut definition, artifact) = compiled(1, "Native");
        definition.is_compiled = true;
        catalog
            .install(definition.clone(), artifact.clone())
            .expect("install");

        definition.max_index_outputs_per_document = Some(4);
        assert!(matches!(
            catalog.replace_definition(definition.clone()),
            Err(DefinitionError::InvariantViolation(_))
        ));
        assert!(matches!(
            catalog.install(definition, artifact),
            Err(DefinitionError::InvariantViolation(_))
        ));
    }

    #[test]
    fn replace_definition_requires_installed_id() {
        let catalog: Catalog<IndexDefinition> = Catalog::new();
        let (definition, _) = compiled(7, "Ghost");
        assert!(matches!(
            catalog.replace_definition(definition),
            Err(DefinitionError::NotFound(_))
        ));
    }

    #[test]
    fn remove_clears_every_map() {
        let catalog = Catalog::new();
        let (definition, artifact) = compiled(3, "Orders");
        catalog.install(definition, artifact).expect("install");
        assert!(catalog.mark_new(3));

        let removed = catalog.remove(3).expect("removed");
        assert_eq!(removed.name, "Orders");
        assert!(catalog.get(DefinitionKey::Id(3)).is_none());
        assert!(catalog.artifact(DefinitionKey::Id(3)).is_none());
        assert!(!catalog.contains_name("Orders"));
        assert!(!catalog.is_new(3));
        catalog.assert_consistent();
    }

    #[test]
    fn fields_are_filled_from_artifact_once() {
        let catalog = Catalog::new();
        let (definition, artifact) = compiled(1, "Users");
        catalog.install(definition, artifact).expect("install");

        let filled = catalog
            .fill_from_artifact(DefinitionKey::Name("users"))
            .expect("definition");
        assert_eq!(filled.fields, vec!["Name", "__document_id"]);
        let stored = catalog.get(DefinitionKey::Id(1)).expect("stored");
        assert_eq!(stored.fields, filled.fields);
    }

    #[test]
    fn displacing_install_swaps_the_name_holder() {
        let catalog = Catalog::new();
        let (live, artifact) = compiled(1, "Users");
        catalog.install(live, artifact).expect("install live");
        let (side, artifact) = compiled(2, "Temp/Users");
        catalog.install(side, artifact).expect("install side");

        let (promoted, artifact) = compiled(2, "users");
        let removed = catalog
            .install_displacing(promoted, artifact, Some(1))
            .expect("promote")
            .expect("displaced");
        assert_eq!(removed.id, 1);
        assert_eq!(catalog.resolve(DefinitionKey::Name("Users")), Some(2));
        assert!(!catalog.contains_name("Temp/Users"));
        assert!(catalog.get(DefinitionKey::Id(1)).is_none());
        catalog.assert_consistent();
    }

    #[test]
    fn rejected_displacing_install_changes_nothing() {
        let catalog = Catalog::new();
        let (live, artifact) = compiled(1, "Users");
        catalog.install(live, artifact).expect("install live");
        let (mut side, artifact) = compiled(2, "Temp/Users");
        side.is_compiled = true;
        catalog.install(side, artifact).expect("install side");

        let (promoted, artifact) = compiled(2, "Users");
        let err = catalog
            .install_displacing(promoted, artifact, Some(1))
            .expect_err("compiled");
        assert!(matches!(err, DefinitionError::InvariantViolation(_)));

        // The name belongs to id 1, which was not named as displaced.
        let (plain, plain_artifact) = compiled(3, "Other");
        catalog.install(plain, plain_artifact).expect("install other");
        let (renamed, renamed_artifact) = compiled(3, "Users");
        assert!(catalog
            .install_displacing(renamed, renamed_artifact, None)
            .is_err());

        assert_eq!(catalog.resolve(DefinitionKey::Name("Users")), Some(1));
        assert_eq!(catalog.resolve(DefinitionKey::Name("Temp/Users")), Some(2));
        assert_eq!(catalog.resolve(DefinitionKey::Name("Other")), Some(3));
        catalog.assert_consistent();
    }
}
