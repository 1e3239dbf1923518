//! Interpreter for parsed query plans.
//!
//! Evaluation never fails: missing members and ill-typed operations produce
//! `null`, the same way dynamic document access behaves in the indexing engine.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use super::ast::{AggregateFn, BinaryOp, Clause, Expr, QueryPlan, StringMethod, UnaryOp};

/// Items sharing one group key.
#[derive(Debug, Clone)]
pub struct Grouping {
    pub key: Value,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
enum Binding<'a> {
    Value(&'a Value),
    Group(&'a Grouping),
}

/// Variables visible to an expression; later entries shadow earlier ones.
#[derive(Debug, Clone, Default)]
struct Scope<'a> {
    frames: Vec<(&'a str, Binding<'a>)>,
}

impl<'a> Scope<'a> {
    fn from_row(row: &'a Row) -> Self {
        Self {
            frames: row
                .iter()
                .map(|(name, value)| (name.as_str(), Binding::Value(value)))
                .collect(),
        }
    }

    fn with(&self, name: &'a str, binding: Binding<'a>) -> Self {
        let mut frames = self.frames.clone();
        frames.push((name, binding));
        Self { frames }
    }

    fn lookup(&self, name: &str) -> Option<Binding<'a>> {
        self.frames
            .iter()
            .rev()
            .find(|(frame, _)| *frame == name)
            .map(|(_, binding)| *binding)
    }
}

type Row = Vec<(String, Value)>;

/// Runs `plan` over `input`, already narrowed to the plan's source.
pub fn execute(plan: &QueryPlan, input: &[Value]) -> Vec<Value> {
    let mut rows: Vec<Row> = input
        .iter()
        .map(|item| vec![(plan.range.clone(), item.clone())])
        .collect();

    for clause in &plan.clauses {
        rows = apply_clause(clause, rows);
    }

    let Some(group) = &plan.group else {
        return rows
            .iter()
            .map(|row| evaluate(&plan.select, &Scope::from_row(row)))
            .collect();
    };

    let mut groups: Vec<Grouping> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in &rows {
        let scope = Scope::from_row(row);
        let key = evaluate(&group.key, &scope);
        let element = evaluate(&group.element, &scope);
        let fingerprint = key.to_string();
        match positions.get(&fingerprint) {
            Some(&position) => groups[position].items.push(element),
            None => {
                positions.insert(fingerprint, groups.len());
                groups.push(Grouping {
                    key,
                    items: vec![element],
                });
            }
        }
    }

    groups
        .iter()
        .map(|grouping| {
            let scope = Scope::default().with(&group.into, Binding::Group(grouping));
            evaluate(&plan.select, &scope)
        })
        .collect()
}

fn apply_clause(clause: &Clause, rows: Vec<Row>) -> Vec<Row> {
    match clause {
        Clause::Where(condition) => rows
            .into_iter()
            .filter(|row| is_truthy(&evaluate(condition, &Scope::from_row(row))))
            .collect(),
        Clause::Let { var, value } => rows
            .into_iter()
            .map(|mut row| {
                let bound = evaluate(value, &Scope::from_row(&row));
                row.push((var.clone(), bound));
                row
            })
            .collect(),
        Clause::From { var, source } => {
            let mut expanded = Vec::new();
            for row in rows {
                let Value::Array(items) = evaluate(source, &Scope::from_row(&row)) else {
                    continue;
                };
                for item in items {
                    let mut next = row.clone();
                    next.push((var.clone(), item));
                    expanded.push(next);
                }
            }
            expanded
        }
    }
}

fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Var(name) => match scope.lookup(name) {
            Some(Binding::Value(value)) => value.clone(),
            Some(Binding::Group(grouping)) => Value::Array(grouping.items.clone()),
            None => Value::Null,
        },
        Expr::Member { target, name } => {
            if let Expr::Var(var) = target.as_ref() {
                if let Some(Binding::Group(grouping)) = scope.lookup(var) {
                    return group_member(grouping, name);
                }
            }
            member(&evaluate(target, scope), name)
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope);
            match op {
                UnaryOp::Not => Value::Bool(!is_truthy(&value)),
                UnaryOp::Negate => value
                    .as_f64()
                    .map(|number| number_value(-number))
                    .unwrap_or(Value::Null),
            }
        }
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, scope),
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => {
            if is_truthy(&evaluate(test, scope)) {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
        Expr::Method {
            target,
            method,
            args,
        } => {
            let target = evaluate(target, scope);
            let args: Vec<Value> = args.iter().map(|arg| evaluate(arg, scope)).collect();
            string_method(*method, &target, &args)
        }
        Expr::Aggregate {
            source,
            function,
            selector,
        } => {
            let items = sequence(source, scope);
            let projected: Vec<Value> = match selector {
                Some(lambda) => items
                    .iter()
                    .map(|item| {
                        let inner = scope.with(&lambda.param, Binding::Value(item));
                        evaluate(&lambda.body, &inner)
                    })
                    .collect(),
                None => items,
            };
            aggregate(*function, projected, selector.is_some())
        }
        Expr::Call { function, args } => {
            let args: Vec<Value> = args.iter().map(|arg| evaluate(arg, scope)).collect();
            function.call(&args)
        }
        Expr::Object(members) => {
            let mut object = Map::new();
            for (name, value) in members {
                object.insert(name.clone(), evaluate(value, scope));
            }
            Value::Object(object)
        }
    }
}

fn evaluate_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope<'_>) -> Value {
    match op {
        BinaryOp::And => {
            return Value::Bool(
                is_truthy(&evaluate(left, scope)) && is_truthy(&evaluate(right, scope)),
            )
        }
        BinaryOp::Or => {
            return Value::Bool(
                is_truthy(&evaluate(left, scope)) || is_truthy(&evaluate(right, scope)),
            )
        }
        BinaryOp::Coalesce => {
            let value = evaluate(left, scope);
            return if value.is_null() {
                evaluate(right, scope)
            } else {
                value
            };
        }
        _ => {}
    }

    let left = evaluate(left, scope);
    let right = evaluate(right, scope);
    match op {
        BinaryOp::Equal => Value::Bool(values_equal(&left, &right)),
        BinaryOp::NotEqual => Value::Bool(!values_equal(&left, &right)),
        BinaryOp::Less => Value::Bool(compare(&left, &right) == Some(Ordering::Less)),
        BinaryOp::LessEqual => Value::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Greater => Value::Bool(compare(&left, &right) == Some(Ordering::Greater)),
        BinaryOp::GreaterEqual => Value::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Value::String(format!("{}{}", display_text(&left), display_text(&right)))
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Value::Null;
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide if b == 0.0 => return Value::Null,
                BinaryOp::Divide => a / b,
                BinaryOp::Remainder if b == 0.0 => return Value::Null,
                BinaryOp::Remainder => a % b,
                _ => return Value::Null,
            };
            number_value(result)
        }
    }
}

fn group_member(grouping: &Grouping, name: &str) -> Value {
    match name {
        "Key" => grouping.key.clone(),
        "Count" | "Length" => Value::from(grouping.items.len()),
        _ => Value::Null,
    }
}

fn member(target: &Value, name: &str) -> Value {
    match target {
        Value::Object(object) => object.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) if name == "Length" || name == "Count" => Value::from(items.len()),
        Value::String(text) if name == "Length" => Value::from(text.chars().count()),
        _ => Value::Null,
    }
}

fn sequence(source: &Expr, scope: &Scope<'_>) -> Vec<Value> {
    match evaluate(source, scope) {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn aggregate(function: AggregateFn, items: Vec<Value>, projected: bool) -> Value {
    match function {
        AggregateFn::Count => Value::from(items.len()),
        AggregateFn::Any if projected => Value::Bool(items.iter().any(is_truthy)),
        AggregateFn::Any => Value::Bool(!items.is_empty()),
        AggregateFn::Sum => number_value(items.iter().filter_map(Value::as_f64).sum()),
        AggregateFn::Average => {
            let numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
        }
        AggregateFn::Min | AggregateFn::Max => {
            let wanted = if function == AggregateFn::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            items
                .into_iter()
                .filter(|item| !item.is_null())
                .reduce(|best, item| {
                    if compare(&item, &best) == Some(wanted) {
                        item
                    } else {
                        best
                    }
                })
                .unwrap_or(Value::Null)
        }
    }
}

fn string_method(method: StringMethod, target: &Value, args: &[Value]) -> Value {
    let Some(text) = target.as_str() else {
        return Value::Null;
    };
    let argument = args.first().and_then(Value::as_str);
    match method {
        StringMethod::ToLower => Value::String(text.to_lowercase()),
        StringMethod::ToUpper => Value::String(text.to_uppercase()),
        StringMethod::Trim => Value::String(text.trim().to_string()),
        StringMethod::Contains => Value::Bool(argument.is_some_and(|arg| text.contains(arg))),
        StringMethod::StartsWith => {
            Value::Bool(argument.is_some_and(|arg| text.starts_with(arg)))
        }
        StringMethod::EndsWith => Value::Bool(argument.is_some_and(|arg| text.ends_with(arg))),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Text used when concatenating; `null` contributes nothing.
pub(crate) fn display_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Integral results stay integers so `1 + 1` serializes as `2`, not `2.0`.
pub(crate) fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        return Value::from(number as i64);
    }
    Number::from_f64(number)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
