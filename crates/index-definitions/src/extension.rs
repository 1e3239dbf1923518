//! Pluggable compilation extensions.
//!
//! An extension contributes global functions callable from definition
//! expressions and analyzer types accepted by index definitions. Both are
//! resolved while compiling, never while indexing.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::expression::evaluate::{display_text, number_value};

/// A global function callable as `Name(args...)` from an expression.
pub trait ExpressionFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Must not panic; ill-typed arguments produce `null`.
    fn call(&self, args: &[Value]) -> Value;
}

pub trait CompilationExtension: Send + Sync {
    fn name(&self) -> &str;

    fn functions(&self) -> Vec<Arc<dyn ExpressionFunction>> {
        Vec::new()
    }

    /// Fully qualified analyzer type names this extension provides.
    fn analyzers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Ordered set of extensions available to the compiler.
#[derive(Clone, Default)]
pub struct ExtensionSet {
    extensions: Vec<Arc<dyn CompilationExtension>>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only the built-in helper functions.
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(Builtins));
        set
    }

    pub fn register(&mut self, extension: Arc<dyn CompilationExtension>) {
        self.extensions.push(extension);
    }

    /// Resolves a function by exact name; the earliest registration wins.
    pub fn function(&self, name: &str) -> Option<Arc<dyn ExpressionFunction>> {
        self.extensions.iter().find_map(|extension| {
            extension
                .functions()
                .into_iter()
                .find(|function| function.name() == name)
        })
    }

    pub fn has_analyzer(&self, qualified_name: &str) -> bool {
        self.extensions.iter().any(|extension| {
            extension
                .analyzers()
                .iter()
                .any(|analyzer| analyzer == qualified_name)
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|extension| extension.name().to_string())
            .collect()
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSet")
            .field("extensions", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in helpers
// ---------------------------------------------------------------------------

/// A function backed by a plain `fn` pointer.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    name: &'static str,
    body: fn(&[Value]) -> Value,
}

impl NativeFunction {
    pub const fn new(name: &'static str, body: fn(&[Value]) -> Value) -> Self {
        Self { name, body }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeFunction").field(&self.name).finish()
    }
}

impl ExpressionFunction for NativeFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, args: &[Value]) -> Value {
        (self.body)(args)
    }
}

struct Builtins;

const BUILTIN_FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::new("Abs", builtin_abs),
    NativeFunction::new("Round", builtin_round),
    NativeFunction::new("Floor", builtin_floor),
    NativeFunction::new("Ceiling", builtin_ceiling),
    NativeFunction::new("Len", builtin_len),
    NativeFunction::new("Concat", builtin_concat),
    NativeFunction::new("IsNullOrEmpty", builtin_is_null_or_empty),
    NativeFunction::new("Split", builtin_split),
];

impl CompilationExtension for Builtins {
    fn name(&self) -> &str {
        "builtins"
    }

    fn functions(&self) -> Vec<Arc<dyn ExpressionFunction>> {
        BUILTIN_FUNCTIONS
            .iter()
            .map(|function| Arc::new(*function) as Arc<dyn ExpressionFunction>)
            .collect()
    }
}

fn unary_number(args: &[Value], op: fn(f64) -> f64) -> Value {
    args.first()
        .and_then(Value::as_f64)
        .map(|number| number_value(op(number)))
        .unwrap_or(Value::Null)
}

fn builtin_abs(args: &[Value]) -> Value {
    unary_number(args, f64::abs)
}

fn builtin_round(args: &[Value]) -> Value {
    unary_number(args, f64::round)
}

fn builtin_floor(args: &[Value]) -> Value {
    unary_number(args, f64::floor)
}

fn builtin_ceiling(args: &[Value]) -> Value {
    unary_number(args, f64::ceil)
}

fn builtin_is_null_or_empty(args: &[Value]) -> Value {
    Value::Bool(match args.first() {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    })
}

fn builtin_len(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(text)) => Value::from(text.chars().count()),
        Some(Value::Array(items)) => Value::from(items.len()),
        Some(Value::Object(object)) => Value::from(object.len()),
        _ => Value::Null,
    }
}

fn builtin_concat(args: &[Value]) -> Value {
    Value::String(args.iter().map(display_text).collect())
}

fn builtin_split(args: &[Value]) -> Value {
    let (Some(text), Some(separator)) = (
        args.first().and_then(Value::as_str),
        args.get(1).and_then(Value::as_str),
    ) else {
        return Value::Null;
    };
    if separator.is_empty() {
        return Value::Array(vec![Value::String(text.to_string())]);
    }
    Value::Array(
        text.split(separator)
            .map(|part| Value::String(part.to_string()))
            .collect(),
    )
}
