//! Index and transformer definition registry.
//!
//! This crate provides:
//! - Definition model with change classification
//! - A sandboxed query language compiled into map/reduce generators
//! - Durable one-file-per-definition storage
//! - A registry keyed by id and case-insensitive name
//! - An indexing gate coordinating indexing passes with administration

pub mod analyzers;
pub mod compiler;
pub mod config;
pub mod definition;
pub mod error;
pub mod expression;
pub mod extension;
pub mod gate;
pub mod registry;
pub mod storage;
pub mod store;

// Re-export main types
pub use compiler::{
    Artifact, DefinitionCompiler, Document, ExpressionCompiler, TransformerGenerator,
    ViewGenerator,
};
pub use config::RegistryConfig;
pub use definition::{
    Definition, DefinitionKey, DefinitionKind, IndexCreationOption, IndexDefinition,
    TransformerDefinition,
};
pub use error::{DefinitionError, Result};
pub use extension::{CompilationExtension, ExpressionFunction, ExtensionSet};
pub use gate::{AdministrationGuard, IndexingGate, IndexingGuard};
pub use registry::{DefinitionRegistry, LoadReport, PutOutcome};
pub use storage::{InMemoryStorage, TransactionalStorage};
pub use store::{DefinitionStore, SkipReason, SkippedDefinition};
