//! Query parser.

use serde_json::Value;

use super::ast::{
    AggregateFn, BinaryOp, Clause, Expr, GroupClause, Lambda, QueryPlan, Source, StringMethod,
    UnaryOp,
};
use super::lexer::{tokenize, SpannedToken, Token};
use super::ExpressionError;
use crate::extension::ExtensionSet;

type Result<T> = std::result::Result<T, ExpressionError>;

const DOCUMENTS_SOURCE: &str = "docs";
const RESULTS_SOURCE: &str = "results";

/// Bound on expression nesting, counting parentheses, unary operators and
/// operator chains. Parsing and evaluation both recurse per level.
pub const MAX_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Query parser
// ---------------------------------------------------------------------------

pub struct QueryParser<'e> {
    tokens: Vec<SpannedToken>,
    index: usize,
    end: usize,
    extensions: &'e ExtensionSet,
    /// Range variables, `let` bindings and lambda parameters currently in scope.
    scope: Vec<String>,
    depth: usize,
}

impl<'e> QueryParser<'e> {
    pub fn parse(input: &str, extensions: &'e ExtensionSet) -> Result<QueryPlan> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ExpressionError::new("expression is empty", 0));
        }

        let mut parser = Self {
            tokens,
            index: 0,
            end: input.len(),
            extensions,
            scope: Vec::new(),
            depth: 0,
        };
        let plan = parser.parse_query()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::new(
                format!("unexpected {} after select", token.token.describe()),
                token.position,
            ));
        }
        Ok(plan)
    }

    fn parse_query(&mut self) -> Result<QueryPlan> {
        self.expect(Token::From)?;
        let range = self.expect_ident()?;
        self.expect(Token::In)?;
        let source = self.parse_source()?;
        self.scope.push(range.clone());

        let mut clauses = Vec::new();
        loop {
            if self.consume(&Token::From) {
                let var = self.expect_ident()?;
                self.expect(Token::In)?;
                let source = self.parse_expression()?;
                self.declare(var.clone())?;
                clauses.push(Clause::From { var, source });
            } else if self.consume(&Token::Let) {
                let var = self.expect_ident()?;
                self.expect(Token::Assign)?;
                let value = self.parse_expression()?;
                self.declare(var.clone())?;
                clauses.push(Clause::Let { var, value });
            } else if self.consume(&Token::Where) {
                clauses.push(Clause::Where(self.parse_expression()?));
            } else {
                break;
            }
        }

        let group = if self.consume(&Token::Group) {
            let element = self.parse_expression()?;
            self.expect(Token::By)?;
            let key = self.parse_expression()?;
            self.expect(Token::Into)?;
            let into = self.expect_ident()?;
            // Only the group variable survives past `into`.
            self.scope.clear();
            self.scope.push(into.clone());
            Some(GroupClause { element, key, into })
        } else {
            None
        };

        self.expect(Token::Select)?;
        let select = self.parse_expression()?;

        Ok(QueryPlan {
            range,
            source,
            clauses,
            group,
            select,
        })
    }

    fn parse_source(&mut self) -> Result<Source> {
        let position = self.position();
        let name = self.expect_ident()?;
        match name.as_str() {
            DOCUMENTS_SOURCE => {
                let collection = if self.consume(&Token::Dot) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                Ok(Source::Documents { collection })
            }
            RESULTS_SOURCE => Ok(Source::Results),
            _ => Err(ExpressionError::new(
                format!("unknown source '{name}', expected 'docs' or 'results'"),
                position,
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions, lowest precedence first
    // -----------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_coalesce()?;
        if !self.consume(&Token::Question) {
            return Ok(test);
        }
        let then = self.parse_expression()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_coalesce(&mut self) -> Result<Expr> {
        let left = self.parse_or()?;
        if !self.consume(&Token::Coalesce) {
            return Ok(left);
        }
        let right = self.nested(Self::parse_coalesce)?;
        Ok(binary(BinaryOp::Coalesce, left, right))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut left = self.parse_and()?;
        while self.consume(&Token::OrOr) {
            self.descend()?;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut left = self.parse_equality()?;
        while self.consume(&Token::AndAnd) {
            self.descend()?;
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::EqEq) => BinaryOp::Equal,
                Some(Token::NotEq) => BinaryOp::NotEqual,
                _ => break,
            };
            self.index += 1;
            self.descend()?;
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Lt) => BinaryOp::Less,
                Some(Token::LtEq) => BinaryOp::LessEqual,
                Some(Token::Gt) => BinaryOp::Greater,
                Some(Token::GtEq) => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.index += 1;
            self.descend()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.index += 1;
            self.descend()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                Some(Token::Percent) => BinaryOp::Remainder,
                _ => break,
            };
            self.index += 1;
            self.descend()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth = mark;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek_token() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            _ => return self.parse_postfix(),
        };
        self.index += 1;
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mark = self.depth;
        let mut expr = self.parse_primary()?;
        while self.consume(&Token::Dot) {
            self.descend()?;
            let position = self.position();
            let name = self.expect_ident()?;
            if !self.consume(&Token::LParen) {
                expr = Expr::Member {
                    target: Box::new(expr),
                    name,
                };
                continue;
            }

            if let Some(function) = AggregateFn::lookup(&name) {
                let selector = if self.consume(&Token::RParen) {
                    None
                } else {
                    let lambda = self.parse_lambda()?;
                    self.expect(Token::RParen)?;
                    Some(lambda)
                };
                expr = Expr::Aggregate {
                    source: Box::new(expr),
                    function,
                    selector,
                };
            } else if let Some(method) = StringMethod::lookup(&name) {
                let args = self.parse_call_args()?;
                if args.len() != method.arity() {
                    return Err(ExpressionError::new(
                        format!(
                            "{name} expects {} argument(s), got {}",
                            method.arity(),
                            args.len()
                        ),
                        position,
                    ));
                }
                expr = Expr::Method {
                    target: Box::new(expr),
                    method,
                    args,
                };
            } else {
                return Err(ExpressionError::new(
                    format!("unknown method '{name}'"),
                    position,
                ));
            }
        }
        self.depth = mark;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let position = self.position();
        let Some(token) = self.next() else {
            return Err(ExpressionError::new(
                "expected expression but reached end of input",
                position,
            ));
        };

        match token {
            Token::Number(value) => Ok(Expr::Literal(number_literal(value))),
            Token::Str(value) => Ok(Expr::Literal(Value::String(value))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::New => self.parse_object(),
            Token::Ident(name) => {
                if self.consume(&Token::LParen) {
                    let function = self.extensions.function(&name).ok_or_else(|| {
                        ExpressionError::new(format!("unknown function '{name}'"), position)
                    })?;
                    let args = self.parse_call_args()?;
                    return Ok(Expr::Call { function, args });
                }
                if !self.scope.iter().any(|var| var == &name) {
                    return Err(ExpressionError::new(
                        format!("'{name}' is not defined"),
                        position,
                    ));
                }
                Ok(Expr::Var(name))
            }
            other => Err(ExpressionError::new(
                format!("expected expression, found {}", other.describe()),
                position,
            )),
        }
    }

    fn parse_object(&mut self) -> Result<Expr> {
        self.expect(Token::LBrace)?;
        let mut members: Vec<(String, Expr)> = Vec::new();

        while !self.consume(&Token::RBrace) {
            if !members.is_empty() {
                self.expect(Token::Comma)?;
                // Trailing comma.
                if self.consume(&Token::RBrace) {
                    break;
                }
            }

            let position = self.position();
            let explicit_name = match (self.peek_token(), self.peek_token_at(1)) {
                (Some(Token::Ident(name)), Some(Token::Assign)) => Some(name.clone()),
                _ => None,
            };
            let (name, value) = match explicit_name {
                Some(name) => {
                    self.index += 2;
                    (name, self.parse_expression()?)
                }
                None => {
                    let value = self.parse_expression()?;
                    let name = implicit_member_name(&value).ok_or_else(|| {
                        ExpressionError::new(
                            "anonymous object members must be named (Name = ...)",
                            position,
                        )
                    })?;
                    (name, value)
                }
            };

            if members.iter().any(|(existing, _)| existing == &name) {
                return Err(ExpressionError::new(
                    format!("duplicate member '{name}'"),
                    position,
                ));
            }
            members.push((name, value));
        }

        Ok(Expr::Object(members))
    }

    fn parse_lambda(&mut self) -> Result<Lambda> {
        let param = self.expect_ident()?;
        self.expect(Token::Arrow)?;
        self.scope.push(param.clone());
        let body = self.parse_expression();
        self.scope.pop();
        Ok(Lambda {
            param,
            body: Box::new(body?),
        })
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.consume(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.consume(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma)?;
        }
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::new(
                "expression nested too deeply",
                self.position(),
            ));
        }
        Ok(())
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        self.descend()?;
        let expr = parse(self);
        self.depth -= 1;
        expr
    }

    fn declare(&mut self, var: String) -> Result<()> {
        if self.scope.contains(&var) {
            return Err(ExpressionError::new(
                format!("'{var}' is already defined"),
                self.position(),
            ));
        }
        self.scope.push(var);
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.consume(&expected) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(|token| token.token.describe())
            .unwrap_or_else(|| "end of input".to_string());
        Err(ExpressionError::new(
            format!("expected {}, found {found}", expected.describe()),
            self.position(),
        ))
    }

    fn expect_ident(&mut self) -> Result<String> {
        let position = self.position();
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(other) => Err(ExpressionError::new(
                format!("expected identifier, found {}", other.describe()),
                position,
            )),
            None => Err(ExpressionError::new(
                "expected identifier but reached end of input",
                position,
            )),
        }
    }

    fn consume(&mut self, expected: &Token) -> bool {
        matches!(self.peek_token(), Some(token) if token == expected) && {
            self.index += 1;
            true
        }
    }

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.index)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek_token_at(0)
    }

    fn peek_token_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.index + offset).map(|spanned| &spanned.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index)?.token.clone();
        self.index += 1;
        Some(token)
    }

    fn position(&self) -> usize {
        self.peek().map(|token| token.position).unwrap_or(self.end)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// `new { doc.Name }` is shorthand for `new { Name = doc.Name }`.
fn implicit_member_name(value: &Expr) -> Option<String> {
    match value {
        Expr::Member { name, .. } => Some(name.clone()),
        Expr::Var(name) => Some(name.clone()),
        _ => None,
    }
}

fn number_literal(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<QueryPlan> {
        QueryParser::parse(input, &ExtensionSet::with_builtins())
    }

    #[test]
    fn parses_simple_map() {
        let plan = parse("from doc in docs.Users select new { doc.Name, Age = doc.Age + 1 }")
            .expect("parse");
        assert_eq!(plan.range, "doc");
        assert_eq!(
            plan.source,
            Source::Documents {
                collection: Some("Users".into())
            }
        );
        assert_eq!(
            plan.output_fields(),
            Some(vec!["Name".to_string(), "Age".to_string()])
        );
    }

    #[test]
    fn parses_group_by_reduce() {
        let plan = parse(
            "from r in results group r by r.Name into g \
             select new { Name = g.Key, Count = g.Sum(x => x.Count) }",
        )
        .expect("parse");
        assert_eq!(plan.source, Source::Results);
        let group = plan.group.expect("group clause");
        assert_eq!(group.into, "g");
    }

    #[test]
    fn canonical_text_is_stable() {
        let plan = parse("from doc in docs where doc.Age>=18&&!doc.Deleted select new {doc.Name}")
            .expect("parse");
        let rendered = plan.to_string();
        assert_eq!(
            rendered,
            "from doc in docs\nwhere ((doc.Age >= 18) && !doc.Deleted)\nselect new { Name = doc.Name }"
        );
        let reparsed = parse(&rendered).expect("reparse");
        assert_eq!(reparsed.to_string(), rendered);
    }

    #[test]
    fn undefined_variable_is_rejected() {
        let err = parse("from doc in docs select new { Name = user.Name }").expect_err("undefined");
        assert!(err.message.contains("'user' is not defined"), "{err}");
    }

    #[test]
    fn range_variable_goes_out_of_scope_after_group() {
        let err = parse("from r in results group r by r.Name into g select new { r.Name }")
            .expect_err("out of scope");
        assert!(err.message.contains("'r' is not defined"), "{err}");
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = parse("from doc in docs select new { X = Explode(doc.Name) }")
            .expect_err("unknown function");
        assert!(err.message.contains("unknown function 'Explode'"), "{err}");
    }

    #[test]
    fn duplicate_members_are_rejected() {
        let err = parse("from doc in docs select new { doc.Name, Name = doc.Title }")
            .expect_err("duplicate");
        assert!(err.message.contains("duplicate member 'Name'"), "{err}");
    }

    #[test]
    fn unnamed_computed_member_is_rejected() {
        assert!(parse("from doc in docs select new { doc.A + doc.B }").is_err());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse("from doc in docs select doc doc").expect_err("trailing");
        assert!(err.message.contains("after select"), "{err}");
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!(parse("from doc in users select doc").is_err());
    }

    #[test]
    fn nested_from_and_let_declare_variables() {
        let plan = parse(
            "from doc in docs.Orders from line in doc.Lines let total = line.Price * line.Qty \
             where total > 0 select new { doc.Customer, Total = total }",
        )
        .expect("parse");
        assert_eq!(plan.clauses.len(), 3);
    }

    #[test]
    fn deep_parentheses_are_a_parse_error() {
        let depth = 200_000;
        let input = format!(
            "from doc in docs select new {{ X = {}doc.Name{} }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let err = parse(&input).expect_err("too deep");
        assert!(err.message.contains("nested too deeply"), "{err}");
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let chain = vec!["doc.A"; 10_000].join(" + ");
        let err = parse(&format!("from doc in docs select new {{ X = {chain} }}"))
            .expect_err("chain too long");
        assert!(err.message.contains("nested too deeply"), "{err}");

        let negations = "!".repeat(10_000);
        assert!(parse(&format!("from doc in docs select new {{ X = {negations}doc.A }}")).is_err());
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let input = format!(
            "from doc in docs select new {{ X = {}doc.A + doc.B + doc.C{} }}",
            "(".repeat(16),
            ")".repeat(16)
        );
        parse(&input).expect("parse");
    }
}
