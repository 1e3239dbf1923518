//! Expression and query plan types (AST nodes).
//!
//! Every node renders back to a canonical source form through `Display`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::extension::ExpressionFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Multiply,
    Divide,
    Remainder,
    Add,
    Subtract,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Coalesce => "??",
        }
    }
}

/// Methods callable on string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMethod {
    ToLower,
    ToUpper,
    Trim,
    Contains,
    StartsWith,
    EndsWith,
}

impl StringMethod {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "ToLower" => Some(Self::ToLower),
            "ToUpper" => Some(Self::ToUpper),
            "Trim" => Some(Self::Trim),
            "Contains" => Some(Self::Contains),
            "StartsWith" => Some(Self::StartsWith),
            "EndsWith" => Some(Self::EndsWith),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ToLower => "ToLower",
            Self::ToUpper => "ToUpper",
            Self::Trim => "Trim",
            Self::Contains => "Contains",
            Self::StartsWith => "StartsWith",
            Self::EndsWith => "EndsWith",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Self::ToLower | Self::ToUpper | Self::Trim => 0,
            Self::Contains | Self::StartsWith | Self::EndsWith => 1,
        }
    }
}

/// Aggregates over groups and arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Average,
    Any,
}

impl AggregateFn {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "Count" => Some(Self::Count),
            "Sum" => Some(Self::Sum),
            "Min" => Some(Self::Min),
            "Max" => Some(Self::Max),
            "Average" => Some(Self::Average),
            "Any" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "Count",
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Average => "Average",
            Self::Any => "Any",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub param: String,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Method {
        target: Box<Expr>,
        method: StringMethod,
        args: Vec<Expr>,
    },
    Aggregate {
        source: Box<Expr>,
        function: AggregateFn,
        selector: Option<Lambda>,
    },
    /// Call into an extension function, resolved while parsing.
    Call {
        function: Arc<dyn ExpressionFunction>,
        args: Vec<Expr>,
    },
    Object(Vec<(String, Expr)>),
}

impl Expr {
    /// Member names when this is a `new { ... }` object.
    pub fn object_fields(&self) -> Option<Vec<String>> {
        match self {
            Self::Object(members) => Some(members.iter().map(|(name, _)| name.clone()).collect()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// `docs` or `docs.<Collection>`.
    Documents { collection: Option<String> },
    /// `results`: map output (reduce) or query results (transformers).
    Results,
}

#[derive(Debug, Clone)]
pub enum Clause {
    From { var: String, source: Expr },
    Let { var: String, value: Expr },
    Where(Expr),
}

#[derive(Debug, Clone)]
pub struct GroupClause {
    pub element: Expr,
    pub key: Expr,
    pub into: String,
}

/// A parsed `from ... select ...` query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub range: String,
    pub source: Source,
    pub clauses: Vec<Clause>,
    pub group: Option<GroupClause>,
    pub select: Expr,
}

impl QueryPlan {
    pub fn output_fields(&self) -> Option<Vec<String>> {
        self.select.object_fields()
    }
}

// ---------------------------------------------------------------------------
// Canonical rendering
// ---------------------------------------------------------------------------

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (position, arg) in args.iter().enumerate() {
        if position > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Var(name) => f.write_str(name),
            Self::Member { target, name } => write!(f, "{target}.{name}"),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Negate => write!(f, "-{operand}"),
            },
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Conditional {
                test,
                then,
                otherwise,
            } => write!(f, "({test} ? {then} : {otherwise})"),
            Self::Method {
                target,
                method,
                args,
            } => {
                write!(f, "{target}.{}(", method.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Aggregate {
                source,
                function,
                selector,
            } => match selector {
                Some(lambda) => write!(
                    f,
                    "{source}.{}({} => {})",
                    function.name(),
                    lambda.param,
                    lambda.body
                ),
                None => write!(f, "{source}.{}()", function.name()),
            },
            Self::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Self::Object(members) => {
                f.write_str("new { ")?;
                for (position, (name, value)) in members.iter().enumerate() {
                    if position > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Documents { collection: None } => f.write_str("docs"),
            Self::Documents {
                collection: Some(collection),
            } => write!(f, "docs.{collection}"),
            Self::Results => f.write_str("results"),
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "from {} in {}", self.range, self.source)?;
        for clause in &self.clauses {
            match clause {
                Clause::From { var, source } => write!(f, "\nfrom {var} in {source}")?,
                Clause::Let { var, value } => write!(f, "\nlet {var} = {value}")?,
                Clause::Where(condition) => write!(f, "\nwhere {condition}")?,
            }
        }
        if let Some(group) = &self.group {
            write!(
                f,
                "\ngroup {} by {} into {}",
                group.element, group.key, group.into
            )?;
        }
        write!(f, "\nselect {}", self.select)
    }
}
