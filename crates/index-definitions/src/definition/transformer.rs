//! Result transformer definitions.

use serde::{Deserialize, Serialize};

use super::{fold_name, same_text, CompareOptions, Definition, DefinitionKind};
use crate::compiler::{DefinitionCompiler, TransformerGenerator};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformerLockMode {
    #[default]
    Unlock,
    LockedIgnore,
}

/// A projection applied to query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerDefinition {
    pub id: u32,
    pub name: String,
    pub transform_results: String,
    pub lock_mode: TransformerLockMode,
    pub temporary: bool,
}

impl TransformerDefinition {
    pub fn new(name: impl Into<String>, transform_results: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform_results: transform_results.into(),
            ..Self::default()
        }
    }
}

impl Definition for TransformerDefinition {
    type Artifact = TransformerGenerator;
    const KIND: DefinitionKind = DefinitionKind::Transformer;

    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn equivalent(&self, other: &Self, options: CompareOptions) -> bool {
        self.id == other.id
            && fold_name(&self.name) == fold_name(&other.name)
            && self.temporary == other.temporary
            && same_text(&self.transform_results, &other.transform_results, options)
    }

    fn compile_with(&self, compiler: &dyn DefinitionCompiler) -> Result<TransformerGenerator> {
        compiler.compile_transformer(self)
    }
}
