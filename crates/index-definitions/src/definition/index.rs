//! Index definitions and their per-field options.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::serde_ext::{one_or_many, NameOrCode};
use super::{fold_name, same_text, CompareOptions, Definition, DefinitionKind};
use crate::analyzers::resolve_analyzers;
use crate::compiler::{Artifact, DefinitionCompiler, ViewGenerator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldStorage {
    Yes,
    #[default]
    No,
    Compress,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldIndexing {
    No,
    Analyzed,
    NotAnalyzed,
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldTermVector {
    #[default]
    No,
    Yes,
    WithPositions,
    WithOffsets,
    WithPositionsAndOffsets,
}

/// How a field is sorted. Persisted by name; legacy files stored the numeric code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOptions {
    #[default]
    None,
    String,
    Int,
    Float,
    Long,
    Double,
    Short,
    Custom,
    Byte,
    StringVal,
}

impl SortOptions {
    const ALL: [SortOptions; 10] = [
        Self::None,
        Self::String,
        Self::Int,
        Self::Float,
        Self::Long,
        Self::Double,
        Self::Short,
        Self::Custom,
        Self::Byte,
        Self::StringVal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::String => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Long => "Long",
            Self::Double => "Double",
            Self::Short => "Short",
            Self::Custom => "Custom",
            Self::Byte => "Byte",
            Self::StringVal => "StringVal",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.as_str().eq_ignore_ascii_case(name))
    }

    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            3 => Some(Self::String),
            4 => Some(Self::Int),
            5 => Some(Self::Float),
            6 => Some(Self::Long),
            7 => Some(Self::Double),
            8 => Some(Self::Short),
            9 => Some(Self::Custom),
            10 => Some(Self::Byte),
            11 => Some(Self::StringVal),
            _ => None,
        }
    }
}

impl Serialize for SortOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NameOrCode {
            expecting: "sort option",
            from_name: Self::from_name,
            from_code: Self::from_code,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexLockMode {
    #[default]
    Unlock,
    LockedIgnore,
    LockedError,
    SideBySide,
}

/// A user-authored index: one or more map expressions, an optional reduce,
/// and per-field options consumed by the search engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexDefinition {
    pub id: u32,
    pub name: String,
    #[serde(alias = "map", deserialize_with = "one_or_many")]
    pub maps: Vec<String>,
    pub reduce: Option<String>,
    /// Output fields. Filled from the compiled artifact when empty.
    pub fields: Vec<String>,
    pub stores: BTreeMap<String, FieldStorage>,
    pub indexes: BTreeMap<String, FieldIndexing>,
    pub sort_options: BTreeMap<String, SortOptions>,
    pub analyzers: BTreeMap<String, String>,
    pub suggestions: BTreeSet<String>,
    pub term_vectors: BTreeMap<String, FieldTermVector>,
    pub max_index_outputs_per_document: Option<u32>,
    pub lock_mode: IndexLockMode,
    pub is_compiled: bool,
    pub is_test_index: bool,
    pub is_side_by_side_index: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, map: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maps: vec![map.into()],
            ..Self::default()
        }
    }

    pub fn with_reduce(mut self, reduce: impl Into<String>) -> Self {
        self.reduce = Some(reduce.into());
        self
    }

    pub fn is_map_reduce(&self) -> bool {
        self.reduce
            .as_deref()
            .is_some_and(|reduce| !reduce.trim().is_empty())
    }

    fn maps_equivalent(&self, other: &Self, options: CompareOptions) -> bool {
        if self.maps.len() != other.maps.len() {
            return false;
        }
        // Map order carries no meaning; match each map against an unused counterpart.
        let mut unmatched: Vec<&String> = other.maps.iter().collect();
        for map in &self.maps {
            let Some(position) = unmatched
                .iter()
                .position(|candidate| same_text(map, candidate, options))
            else {
                return false;
            };
            unmatched.swap_remove(position);
        }
        true
    }
}

impl Definition for IndexDefinition {
    type Artifact = ViewGenerator;
    const KIND: DefinitionKind = DefinitionKind::Index;

    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_compiled(&self) -> bool {
        self.is_compiled
    }

    fn is_test(&self) -> bool {
        self.is_test_index
    }

    fn equivalent(&self, other: &Self, options: CompareOptions) -> bool {
        let reduce_equal = match (&self.reduce, &other.reduce) {
            (None, None) => true,
            (Some(left), Some(right)) => same_text(left, right, options),
            _ => false,
        };

        self.id == other.id
            && fold_name(&self.name) == fold_name(&other.name)
            && self.maps_equivalent(other, options)
            && reduce_equal
            && self.stores == other.stores
            && self.indexes == other.indexes
            && self.sort_options == other.sort_options
            && self.analyzers == other.analyzers
            && self.suggestions == other.suggestions
            && self.term_vectors == other.term_vectors
            && (options.ignore_output_limit
                || self.max_index_outputs_per_document == other.max_index_outputs_per_document)
    }

    fn fill_fields_from(&mut self, artifact: &ViewGenerator) -> bool {
        if !self.fields.is_empty() {
            return false;
        }
        self.fields = artifact.fields().to_vec();
        true
    }

    fn prepare(&mut self) {
        resolve_analyzers(self);
    }

    fn compile_with(&self, compiler: &dyn DefinitionCompiler) -> crate::Result<ViewGenerator> {
        compiler.compile_index(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_single_map_is_accepted() {
        let json = r#"{ "id": 3, "name": "Users/ByName", "map": "from doc in docs select new { doc.Name }" }"#;
        let definition: IndexDefinition = serde_json::from_str(json).expect("parse");
        assert_eq!(definition.maps.len(), 1);
        assert_eq!(definition.id, 3);
        assert!(!definition.is_map_reduce());
    }

    #[test]
    fn sort_options_accept_names_and_legacy_codes() {
        let json = r#"{ "name": "a", "sort_options": { "Age": 4, "Name": "string" } }"#;
        let definition: IndexDefinition = serde_json::from_str(json).expect("parse");
        assert_eq!(definition.sort_options["Age"], SortOptions::Int);
        assert_eq!(definition.sort_options["Name"], SortOptions::String);

        let written = serde_json::to_value(&definition).expect("serialize");
        assert_eq!(written["sort_options"]["Age"], "Int");
    }

    #[test]
    fn unknown_sort_option_is_rejected() {
        let json = r#"{ "name": "a", "sort_options": { "Age": 2 } }"#;
        assert!(serde_json::from_str::<IndexDefinition>(json).is_err());
    }

    #[test]
    fn map_order_does_not_matter() {
        let mut left = IndexDefinition::new("multi", "from doc in docs.A select new { doc.X }");
        left.maps.push("from doc in docs.B select new { doc.X }".to_string());
        let mut right = left.clone();
        right.maps.reverse();

        assert!(left.equivalent(&right, CompareOptions::EXACT));
    }

    #[test]
    fn whitespace_only_changes_are_formatting() {
        let left = IndexDefinition::new("a", "from doc in docs select new { doc.Name }");
        let right = IndexDefinition::new("a", "from doc\n  in docs\n  select new {doc.Name}");

        assert!(!left.equivalent(&right, CompareOptions::EXACT));
        assert!(left.equivalent(&right, CompareOptions::RELAXED));
    }

    #[test]
    fn volatile_fields_are_ignored() {
        let left = IndexDefinition::new("a", "from doc in docs select new { doc.Name }");
        let mut right = left.clone();
        right.fields = vec!["Name".to_string()];
        right.lock_mode = IndexLockMode::LockedIgnore;

        assert!(left.equivalent(&right, CompareOptions::EXACT));
    }

    #[test]
    fn output_limit_is_relaxed_separately() {
        let left = IndexDefinition::new("a", "from doc in docs select new { doc.Name }");
        let mut right = left.clone();
        right.max_index_outputs_per_document = Some(32);

        assert!(!left.equivalent(&right, CompareOptions::EXACT));
        assert!(left.equivalent(&right, CompareOptions::RELAXED));
    }
}
