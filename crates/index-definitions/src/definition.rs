//! Definition model shared by indexes and transformers.
//!
//! - `index` - index definitions and per-field options
//! - `transformer` - result transformer definitions
//! - `change` - classification of an incoming definition against the stored one
//! - `serde_ext` - converters for legacy persisted shapes

mod change;
mod index;
mod serde_ext;
mod transformer;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::compiler::{Artifact, DefinitionCompiler};
use crate::error::Result;
use crate::expression::same_tokens;

pub use change::{classify_change, IndexCreationOption};
pub use index::{
    FieldIndexing, FieldStorage, FieldTermVector, IndexDefinition, IndexLockMode, SortOptions,
};
pub use transformer::{TransformerDefinition, TransformerLockMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Index,
    Transformer,
}

impl DefinitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Transformer => "transformer",
        }
    }

    /// Extension of the per-definition file (`{id}.index`, `{id}.transform`).
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Transformer => "transform",
        }
    }

    /// Human-readable `{id} - {name}` listing, rewritten on every mutation.
    pub fn listing_file(self) -> &'static str {
        match self {
            Self::Index => "indexes.txt",
            Self::Transformer => "transformers.txt",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup key: definitions are reachable by id or by (case-insensitive) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKey<'a> {
    Id(u32),
    Name(&'a str),
}

impl From<u32> for DefinitionKey<'_> {
    fn from(id: u32) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for DefinitionKey<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for DefinitionKey<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name.as_str())
    }
}

impl fmt::Display for DefinitionKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Which differences the structural comparison tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareOptions {
    pub ignore_formatting: bool,
    pub ignore_output_limit: bool,
}

impl CompareOptions {
    pub const EXACT: Self = Self {
        ignore_formatting: false,
        ignore_output_limit: false,
    };

    pub const RELAXED: Self = Self {
        ignore_formatting: true,
        ignore_output_limit: true,
    };
}

/// Common surface of index and transformer definitions.
pub trait Definition:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Artifact: Artifact;
    const KIND: DefinitionKind;

    fn id(&self) -> u32;
    fn set_id(&mut self, id: u32);
    fn name(&self) -> &str;

    /// Supplied by the host application; never replaced once registered.
    fn is_compiled(&self) -> bool {
        false
    }

    /// Test definitions are always recompiled.
    fn is_test(&self) -> bool {
        false
    }

    /// Structural equality ignoring volatile fields.
    fn equivalent(&self, other: &Self, options: CompareOptions) -> bool;

    /// Copies derived data from the compiled artifact. Returns whether anything changed.
    fn fill_fields_from(&mut self, _artifact: &Self::Artifact) -> bool {
        false
    }

    /// Normalizes the definition in place before it is classified or compiled.
    fn prepare(&mut self) {}

    fn compile_with(&self, compiler: &dyn DefinitionCompiler) -> Result<Self::Artifact>;
}

/// Compares expression source, optionally ignoring whitespace between tokens.
pub(crate) fn same_text(left: &str, right: &str, options: CompareOptions) -> bool {
    if left == right {
        return true;
    }
    options.ignore_formatting && same_tokens(left, right)
}

/// Case-insensitive name key used by every name lookup.
pub(crate) fn fold_name(name: &str) -> String {
    name.to_lowercase()
}
