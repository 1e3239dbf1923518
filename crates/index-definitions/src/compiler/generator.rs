//! Compiled artifacts.
//!
//! Generators are immutable once built. Recompiling a definition produces a
//! new generator that replaces the old one; nothing is patched in place.

use std::fmt;

use serde_json::Value;

use crate::expression::{execute, QueryPlan, Source};

/// Field added to every map output of a map-only index.
pub const DOCUMENT_ID_FIELD: &str = "__document_id";

/// Executable form of a definition.
pub trait Artifact: Send + Sync + fmt::Debug + 'static {
    /// Name of the definition at compile time.
    fn name(&self) -> &str;

    fn fields(&self) -> &[String];

    /// Canonical text of the compiled expressions.
    fn compiled_text(&self) -> &str;
}

/// A document fed to the map functions.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub collection: Option<String>,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, collection: Option<&str>, data: Value) -> Self {
        Self {
            id: id.into(),
            collection: collection.map(str::to_string),
            data,
        }
    }

    fn belongs_to(&self, source: &Source) -> bool {
        match source {
            Source::Documents { collection: None } => true,
            Source::Documents {
                collection: Some(wanted),
            } => self
                .collection
                .as_deref()
                .is_some_and(|collection| collection.eq_ignore_ascii_case(wanted)),
            Source::Results => false,
        }
    }
}

/// Compiled index: map plans, an optional reduce plan and the produced fields.
#[derive(Debug)]
pub struct ViewGenerator {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) maps: Vec<QueryPlan>,
    pub(crate) reduce: Option<QueryPlan>,
    pub(crate) fields: Vec<String>,
    pub(crate) compiled_text: String,
}

impl ViewGenerator {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_map_reduce(&self) -> bool {
        self.reduce.is_some()
    }

    /// Runs every map over the documents it applies to.
    ///
    /// Map-only outputs carry the source document id in `__document_id`.
    pub fn map(&self, documents: &[Document]) -> Vec<Value> {
        let mut outputs = Vec::new();
        for plan in &self.maps {
            for document in documents.iter().filter(|doc| doc.belongs_to(&plan.source)) {
                for mut output in execute(plan, std::slice::from_ref(&document.data)) {
                    if self.reduce.is_none() {
                        if let Value::Object(object) = &mut output {
                            object.insert(
                                DOCUMENT_ID_FIELD.to_string(),
                                Value::String(document.id.clone()),
                            );
                        }
                    }
                    outputs.push(output);
                }
            }
        }
        outputs
    }

    /// Reduces map outputs. Map-only indexes pass their input through.
    pub fn reduce(&self, results: &[Value]) -> Vec<Value> {
        match &self.reduce {
            Some(plan) => execute(plan, results),
            None => results.to_vec(),
        }
    }
}

impl Artifact for ViewGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn compiled_text(&self) -> &str {
        &self.compiled_text
    }
}

/// Compiled result transformer.
#[derive(Debug)]
pub struct TransformerGenerator {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) plan: QueryPlan,
    pub(crate) fields: Vec<String>,
    pub(crate) compiled_text: String,
}

impl TransformerGenerator {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn transform(&self, results: &[Value]) -> Vec<Value> {
        execute(&self.plan, results)
    }
}

impl Artifact for TransformerGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn compiled_text(&self) -> &str {
        &self.compiled_text
    }
}
