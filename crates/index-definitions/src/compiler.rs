//! Turns definitions into executable generators.
//!
//! Compiling is pure: it reads the definition and the extension set and
//! returns a generator or a [`DefinitionError::Compile`]. It never touches
//! the registry or the store.

mod generator;

use std::collections::BTreeSet;

use crate::analyzers::is_known_analyzer;
use crate::definition::{DefinitionKind, IndexDefinition, TransformerDefinition};
use crate::error::{DefinitionError, Result};
use crate::expression::{QueryParser, QueryPlan, Source};
use crate::extension::ExtensionSet;

pub use generator::{Artifact, Document, TransformerGenerator, ViewGenerator, DOCUMENT_ID_FIELD};

pub trait DefinitionCompiler: Send + Sync {
    fn compile_index(&self, definition: &IndexDefinition) -> Result<ViewGenerator>;

    fn compile_transformer(&self, definition: &TransformerDefinition)
        -> Result<TransformerGenerator>;
}

/// Compiles definitions written in the built-in query language.
#[derive(Debug, Clone)]
pub struct ExpressionCompiler {
    extensions: ExtensionSet,
}

impl Default for ExpressionCompiler {
    fn default() -> Self {
        Self::new(ExtensionSet::with_builtins())
    }
}

impl ExpressionCompiler {
    pub fn new(extensions: ExtensionSet) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    fn parse(&self, text: &str, label: &str, fail: &dyn Fn(String) -> DefinitionError) -> Result<QueryPlan> {
        QueryParser::parse(text, &self.extensions).map_err(|err| fail(format!("{label}: {err}")))
    }
}

impl DefinitionCompiler for ExpressionCompiler {
    fn compile_index(&self, definition: &IndexDefinition) -> Result<ViewGenerator> {
        let fail = |message: String| {
            DefinitionError::compile(
                DefinitionKind::Index,
                definition.id,
                &definition.name,
                message,
            )
        };

        let sources: Vec<&String> = definition
            .maps
            .iter()
            .filter(|map| !map.trim().is_empty())
            .collect();
        if sources.is_empty() {
            return Err(fail("index must have at least one map".to_string()));
        }

        let mut maps = Vec::with_capacity(sources.len());
        for (position, text) in sources.into_iter().enumerate() {
            let label = format!("map #{position}");
            let plan = self.parse(text, &label, &fail)?;
            if plan.source == Source::Results {
                return Err(fail(format!("{label} must read from docs")));
            }
            if plan.output_fields().is_none() {
                return Err(fail(format!("{label} must select an object (new {{ ... }})")));
            }
            maps.push(plan);
        }

        let reduce = match definition.reduce.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                let plan = self.parse(text, "reduce", &fail)?;
                if plan.source != Source::Results {
                    return Err(fail("reduce must read from results".to_string()));
                }
                let Some(reduce_fields) = plan.output_fields() else {
                    return Err(fail("reduce must select an object (new { ... })".to_string()));
                };
                let expected: BTreeSet<&String> = reduce_fields.iter().collect();
                for (position, map) in maps.iter().enumerate() {
                    let map_fields = map.output_fields().unwrap_or_default();
                    let actual: BTreeSet<&String> = map_fields.iter().collect();
                    if actual != expected {
                        return Err(fail(format!(
                            "map #{position} produces fields {actual:?} but reduce produces {expected:?}"
                        )));
                    }
                }
                Some(plan)
            }
            _ => None,
        };

        for (field, analyzer) in &definition.analyzers {
            if !is_known_analyzer(analyzer, &self.extensions) {
                return Err(fail(format!(
                    "unknown analyzer '{analyzer}' for field '{field}'"
                )));
            }
        }

        let fields = match &reduce {
            Some(plan) => plan.output_fields().unwrap_or_default(),
            None => {
                let mut fields: Vec<String> = Vec::new();
                for name in maps.iter().flat_map(|plan| plan.output_fields().unwrap_or_default()) {
                    if !fields.contains(&name) {
                        fields.push(name);
                    }
                }
                fields.push(DOCUMENT_ID_FIELD.to_string());
                fields
            }
        };

        let mut compiled_text = maps
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\n");
        if let Some(plan) = &reduce {
            compiled_text.push_str("\n\n// reduce\n");
            compiled_text.push_str(&plan.to_string());
        }

        log::info!(
            "Compiled index '{}' ({}):\n{}",
            definition.name,
            definition.id,
            compiled_text
        );

        Ok(ViewGenerator {
            id: definition.id,
            name: definition.name.clone(),
            maps,
            reduce,
            fields,
            compiled_text,
        })
    }

    fn compile_transformer(
        &self,
        definition: &TransformerDefinition,
    ) -> Result<TransformerGenerator> {
        let fail = |message: String| {
            DefinitionError::compile(
                DefinitionKind::Transformer,
                definition.id,
                &definition.name,
                message,
            )
        };

        if definition.transform_results.trim().is_empty() {
            return Err(fail("transformer must have a transform_results expression".to_string()));
        }
        let plan = self.parse(&definition.transform_results, "transform_results", &fail)?;
        if plan.source != Source::Results {
            return Err(fail("transform_results must read from results".to_string()));
        }

        let fields = plan.output_fields().unwrap_or_default();
        let compiled_text = plan.to_string();
        log::info!(
            "Compiled transformer '{}' ({}):\n{}",
            definition.name,
            definition.id,
            compiled_text
        );

        Ok(TransformerGenerator {
            id: definition.id,
            name: definition.name.clone(),
            plan,
            fields,
            compiled_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(definition: &IndexDefinition) -> Result<ViewGenerator> {
        ExpressionCompiler::default().compile_index(definition)
    }

    #[test]
    fn map_only_index_exposes_document_id() {
        let generator = compile(&IndexDefinition::new(
            "Users/ByName",
            "from doc in docs.Users select new { doc.Name }",
        ))
        .expect("compile");

        assert_eq!(generator.fields(), ["Name", DOCUMENT_ID_FIELD]);
        assert!(!generator.is_map_reduce());
        assert!(generator.compiled_text().contains("select new { Name = doc.Name }"));
    }

    #[test]
    fn map_filters_by_collection_case_insensitively() {
        let generator = compile(&IndexDefinition::new(
            "Users/ByName",
            "from doc in docs.Users select new { doc.Name }",
        ))
        .expect("compile");

        let outputs = generator.map(&[
            Document::new("users/1", Some("users"), json!({ "Name": "Ada" })),
            Document::new("orders/1", Some("Orders"), json!({ "Name": "Nope" })),
        ]);
        assert_eq!(
            outputs,
            vec![json!({ "Name": "Ada", "__document_id": "users/1" })]
        );
    }

    #[test]
    fn map_reduce_runs_end_to_end() {
        let definition = IndexDefinition::new(
            "Orders/ByCustomer",
            "from o in docs.Orders select new { o.Customer, Count = 1 }",
        )
        .with_reduce(
            "from r in results group r by r.Customer into g \
             select new { Customer = g.Key, Count = g.Sum(x => x.Count) }",
        );
        let generator = compile(&definition).expect("compile");
        assert_eq!(generator.fields(), ["Customer", "Count"]);

        let mapped = generator.map(&[
            Document::new("orders/1", Some("Orders"), json!({ "Customer": "a" })),
            Document::new("orders/2", Some("Orders"), json!({ "Customer": "b" })),
            Document::new("orders/3", Some("Orders"), json!({ "Customer": "a" })),
        ]);
        assert_eq!(
            generator.reduce(&mapped),
            vec![
                json!({ "Customer": "a", "Count": 2 }),
                json!({ "Customer": "b", "Count": 1 }),
            ]
        );
    }

    #[test]
    fn reduce_fields_must_match_maps() {
        let definition = IndexDefinition::new(
            "Orders/ByCustomer",
            "from o in docs select new { o.Customer }",
        )
        .with_reduce("from r in results group r by r.Customer into g select new { Customer = g.Key, Total = g.Count() }");
        let err = compile(&definition).expect_err("field mismatch");
        assert!(err.to_string().contains("map #0 produces fields"), "{err}");
    }

    #[test]
    fn errors_carry_id_and_name() {
        let mut definition = IndexDefinition::new("Broken", "from doc in docs select new { doc.A + }");
        definition.id = 42;
        match compile(&definition) {
            Err(DefinitionError::Compile { kind, id, name, message }) => {
                assert_eq!(kind, DefinitionKind::Index);
                assert_eq!(id, 42);
                assert_eq!(name, "Broken");
                assert!(message.starts_with("map #0:"), "{message}");
                assert!(message.contains("near byte"), "{message}");
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn maps_must_read_documents_and_select_objects() {
        assert!(compile(&IndexDefinition::new("a", "from r in results select new { r.X }")).is_err());
        assert!(compile(&IndexDefinition::new("a", "from doc in docs select doc.X")).is_err());
        assert!(compile(&IndexDefinition::new("a", "   ")).is_err());
    }

    #[test]
    fn unknown_analyzer_fails_compile() {
        let mut definition = IndexDefinition::new("a", "from doc in docs select new { doc.Name }");
        definition
            .analyzers
            .insert("Name".into(), "NoSuchAnalyzer".into());
        let err = compile(&definition).expect_err("unknown analyzer");
        assert!(err.to_string().contains("unknown analyzer 'NoSuchAnalyzer'"), "{err}");

        definition
            .analyzers
            .insert("Name".into(), "analysis.StandardAnalyzer".into());
        assert!(compile(&definition).is_ok());
    }

    #[test]
    fn transformer_projects_results() {
        let definition =
            TransformerDefinition::new("Names", "from r in results select new { Upper = r.Name.ToUpper() }");
        let generator = ExpressionCompiler::default()
            .compile_transformer(&definition)
            .expect("compile");

        assert_eq!(generator.fields(), ["Upper"]);
        assert_eq!(
            generator.transform(&[json!({ "Name": "ada" })]),
            vec![json!({ "Upper": "ADA" })]
        );
    }

    #[test]
    fn transformer_must_read_results() {
        let definition = TransformerDefinition::new("Names", "from doc in docs select new { doc.Name }");
        assert!(ExpressionCompiler::default()
            .compile_transformer(&definition)
            .is_err());
    }
}
