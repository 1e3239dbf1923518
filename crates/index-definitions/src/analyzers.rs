//! Analyzer alias resolution.
//!
//! Index definitions may name an analyzer by its short alias
//! (`StandardAnalyzer`). Before compiling, aliases without a namespace
//! qualifier are rewritten to the fully qualified built-in type name.

use crate::definition::IndexDefinition;
use crate::extension::ExtensionSet;

pub const ANALYZER_NAMESPACE: &str = "analysis";

/// Analyzer types shipped with the embedded search library.
pub const BUILTIN_ANALYZERS: &[&str] = &[
    "StandardAnalyzer",
    "WhitespaceAnalyzer",
    "SimpleAnalyzer",
    "StopAnalyzer",
    "KeywordAnalyzer",
    "LowerCaseKeywordAnalyzer",
    "LowerCaseWhitespaceAnalyzer",
    "NGramAnalyzer",
];

fn qualify(alias: &str) -> String {
    format!("{ANALYZER_NAMESPACE}.{alias}")
}

/// Rewrites unqualified analyzer aliases in place.
///
/// Names that already carry a namespace, or that are not built-in aliases,
/// are left untouched; compiling reports them later if they are invalid.
pub fn resolve_analyzers(definition: &mut IndexDefinition) {
    for analyzer in definition.analyzers.values_mut() {
        if analyzer.contains('.') {
            continue;
        }
        if BUILTIN_ANALYZERS.contains(&analyzer.as_str()) {
            *analyzer = qualify(analyzer);
        }
    }
}

/// True when `name` is a qualified built-in analyzer or provided by an extension.
pub fn is_known_analyzer(name: &str, extensions: &ExtensionSet) -> bool {
    let builtin = name
        .strip_prefix(ANALYZER_NAMESPACE)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|alias| BUILTIN_ANALYZERS.contains(&alias));
    builtin || extensions.has_analyzer(name)
}
