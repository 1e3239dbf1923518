//! Tokenizer for map/reduce and transformer expressions.

use logos::Logos;

use super::ExpressionError;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\r\n\f]+|//[^\n]*)")]
pub enum Token {
    #[token("from")]
    From,
    #[token("in")]
    In,
    #[token("where")]
    Where,
    #[token("let")]
    Let,
    #[token("select")]
    Select,
    #[token("group")]
    Group,
    #[token("by")]
    By,
    #[token("into")]
    Into,
    #[token("new")]
    New,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),
    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    Str(String),

    #[token("=>")]
    Arrow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    Coalesce,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("!")]
    Bang,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
}

impl Token {
    /// Short description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Number(value) => format!("number {value}"),
            Self::Str(value) => format!("string \"{value}\""),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::From => "from",
            Self::In => "in",
            Self::Where => "where",
            Self::Let => "let",
            Self::Select => "select",
            Self::Group => "group",
            Self::By => "by",
            Self::Into => "into",
            Self::New => "new",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Arrow => "=>",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Coalesce => "??",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Bang => "!",
            Self::Assign => "=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Ident(_) | Self::Number(_) | Self::Str(_) => "literal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, ExpressionError> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let position = lexer.span().start;
        match result {
            Ok(token) => tokens.push(SpannedToken { token, position }),
            Err(()) => {
                return Err(ExpressionError::new(
                    format!("unexpected input '{}'", lexer.slice()),
                    position,
                ))
            }
        }
    }

    Ok(tokens)
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            value.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            other => value.push(other),
        }
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .expect("tokenize")
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn keywords_win_over_identifiers_only_on_exact_match() {
        assert_eq!(
            kinds("from fromage in index into"),
            vec![
                Token::From,
                Token::Ident("fromage".into()),
                Token::In,
                Token::Ident("index".into()),
                Token::Into,
            ]
        );
    }

    #[test]
    fn member_access_and_decimals() {
        assert_eq!(
            kinds("doc.Total * 1.5"),
            vec![
                Token::Ident("doc".into()),
                Token::Dot,
                Token::Ident("Total".into()),
                Token::Star,
                Token::Number(1.5),
            ]
        );
    }

    #[test]
    fn strings_are_unescaped() {
        assert_eq!(
            kinds(r#""a \"b\"" 'c\n'"#),
            vec![Token::Str("a \"b\"".into()), Token::Str("c\n".into())]
        );
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        assert_eq!(
            kinds("a // trailing comment\n?? b"),
            vec![
                Token::Ident("a".into()),
                Token::Coalesce,
                Token::Ident("b".into())
            ]
        );
    }

    #[test]
    fn reports_position_of_bad_input() {
        let err = tokenize("doc.Name # 1").expect_err("bad input");
        assert_eq!(err.position, 9);
    }
}
