//! # Discovery queries
//!
//! A small predicate language evaluated against each agent's attributes.
//!
//! ```text
//! query   := or
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := "true" | "false" | "(" or ")"
//!          | attr "==" value | attr "!=" value
//!          | attr "inside" "rect" "(" num "," num "," num "," num ")"
//! value   := '"' ... '"' | word
//! ```
//!
//! Keywords are case-insensitive. `rect(lng, lat, w, h)` covers
//! `lng..=lng+w` by `lat..=lat+h`. An attribute the agent does not have
//! never matches, not even `!=`.

use agentsh_core::platform::Location;

/// Attribute name agent locations are indexed under.
pub const LOCATION_ATTRIBUTE: &str = agentsh_core::platform::DEFAULT_LOCATION_ATTRIBUTE;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Point(Location),
}

/// Anything a query can be evaluated against.
pub trait Attributes {
    fn attribute(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub lng: f64,
    pub lat: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, point: Location) -> bool {
        point.lng >= self.lng
            && point.lng <= self.lng + self.width
            && point.lat >= self.lat
            && point.lat <= self.lat + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Const(bool),
    Eq(String, String),
    Ne(String, String),
    Inside(String, Rect),
    Not(Box<Query>),
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
}

impl Query {
    pub fn matches(&self, subject: &dyn Attributes) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::Eq(attr, want) => matches!(subject.attribute(attr), Some(Value::Text(v)) if &v == want),
            Self::Ne(attr, want) => matches!(subject.attribute(attr), Some(Value::Text(v)) if &v != want),
            Self::Inside(attr, rect) => {
                matches!(subject.attribute(attr), Some(Value::Point(p)) if rect.contains(p))
            }
            Self::Not(q) => !q.matches(subject),
            Self::And(a, b) => a.matches(subject) && b.matches(subject),
            Self::Or(a, b) => a.matches(subject) || b.matches(subject),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnexpectedEnd,
    Unexpected { found: String, pos: usize },
    UnterminatedString(usize),
    BadNumber { found: String, pos: usize },
    /// Nesting of `not` and parentheses exceeds [`MAX_DEPTH`].
    TooDeep { pos: usize },
    /// More than [`MAX_OPERATORS`] `and`/`or` operators.
    TooLong { pos: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "query ends too early"),
            Self::Unexpected { found, pos } => write!(f, "unexpected '{}' at {}", found, pos),
            Self::UnterminatedString(pos) => write!(f, "unterminated string at {}", pos),
            Self::BadNumber { found, pos } => write!(f, "'{}' at {} is not a number", found, pos),
            Self::TooDeep { pos } => write!(f, "query nests deeper than {} at {}", MAX_DEPTH, pos),
            Self::TooLong { pos } => write!(f, "query has more than {} operators at {}", MAX_OPERATORS, pos),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Deepest nesting of `not` and parentheses a query may use.
pub const MAX_DEPTH: usize = 128;

/// Most `and`/`or` operators a query may use. Chains build left-deep trees,
/// so this also bounds their depth.
pub const MAX_OPERATORS: usize = 1024;

pub fn parse(src: &str) -> Result<Query> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, operators: 0 };
    let query = parser.or()?;
    match parser.peek() {
        None => Ok(query),
        Some((tok, pos)) => Err(Error::Unexpected { found: tok.to_string(), pos }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    EqEq,
    NotEq,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Word(w) => write!(f, "{}", w),
            Self::Quoted(q) => write!(f, "\"{}\"", q),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
        }
    }
}

fn lex(src: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' => {
                chars.next();
                let tok = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    _ => Token::Comma,
                };
                tokens.push((tok, pos));
            }
            '=' | '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) if c == '=' => tokens.push((Token::EqEq, pos)),
                    Some((_, '=')) => tokens.push((Token::NotEq, pos)),
                    _ => return Err(Error::Unexpected { found: c.to_string(), pos }),
                }
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, ch)) => text.push(ch),
                        None => return Err(Error::UnterminatedString(pos)),
                    }
                }
                tokens.push((Token::Quoted(text), pos));
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | ',' | '=' | '!' | '"') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push((Token::Word(word), pos));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, p)| (t, *p))
    }

    fn next(&mut self) -> Result<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned().ok_or(Error::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    /// Position of the next token, or of the end of input.
    fn current(&self) -> usize {
        self.peek()
            .map(|(_, pos)| pos)
            .or_else(|| self.tokens.last().map(|(_, pos)| *pos))
            .unwrap_or(0)
    }

    /// Consumes an `and`/`or` keyword, failing past [`MAX_OPERATORS`].
    fn operator(&mut self) -> Result<()> {
        let pos = self.current();
        if self.operators >= MAX_OPERATORS {
            return Err(Error::TooLong { pos });
        }
        self.operators += 1;
        self.pos += 1;
        Ok(())
    }

    /// Runs `inner` one nesting level down, failing past [`MAX_DEPTH`].
    fn nested(&mut self, pos: usize, inner: impl FnOnce(&mut Self) -> Result<Query>) -> Result<Query> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::TooDeep { pos });
        }
        self.depth += 1;
        let query = inner(self);
        self.depth -= 1;
        query
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some((Token::Word(w), _)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, want: Token) -> Result<()> {
        let (tok, pos) = self.next()?;
        if tok == want {
            Ok(())
        } else {
            Err(Error::Unexpected { found: tok.to_string(), pos })
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        match self.next()? {
            (Token::Word(w), _) if w.eq_ignore_ascii_case(keyword) => Ok(()),
            (tok, pos) => Err(Error::Unexpected { found: tok.to_string(), pos }),
        }
    }

    fn or(&mut self) -> Result<Query> {
        let mut left = self.and()?;
        while self.at_keyword("or") {
            self.operator()?;
            left = Query::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Query> {
        let mut left = self.unary()?;
        while self.at_keyword("and") {
            self.operator()?;
            left = Query::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Query> {
        if self.at_keyword("not") {
            let pos = self.current();
            self.pos += 1;
            let inner = self.nested(pos, Self::unary)?;
            return Ok(Query::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Query> {
        match self.next()? {
            (Token::LParen, pos) => {
                let inner = self.nested(pos, Self::or)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            (Token::Word(w), _) if w.eq_ignore_ascii_case("true") => Ok(Query::Const(true)),
            (Token::Word(w), _) if w.eq_ignore_ascii_case("false") => Ok(Query::Const(false)),
            (Token::Word(attr), _) => self.comparison(attr),
            (tok, pos) => Err(Error::Unexpected { found: tok.to_string(), pos }),
        }
    }

    fn comparison(&mut self, attr: String) -> Result<Query> {
        match self.next()? {
            (Token::EqEq, _) => Ok(Query::Eq(attr, self.value()?)),
            (Token::NotEq, _) => Ok(Query::Ne(attr, self.value()?)),
            (Token::Word(w), _) if w.eq_ignore_ascii_case("inside") => {
                self.expect_keyword("rect")?;
                self.expect(Token::LParen)?;
                let lng = self.number()?;
                self.expect(Token::Comma)?;
                let lat = self.number()?;
                self.expect(Token::Comma)?;
                let width = self.number()?;
                self.expect(Token::Comma)?;
                let height = self.number()?;
                self.expect(Token::RParen)?;
                Ok(Query::Inside(attr, Rect { lng, lat, width, height }))
            }
            (tok, pos) => Err(Error::Unexpected { found: tok.to_string(), pos }),
        }
    }

    fn value(&mut self) -> Result<String> {
        match self.next()? {
            (Token::Word(w), _) | (Token::Quoted(w), _) => Ok(w),
            (tok, pos) => Err(Error::Unexpected { found: tok.to_string(), pos }),
        }
    }

    fn number(&mut self) -> Result<f64> {
        match self.next()? {
            (Token::Word(w), pos) => w.parse().map_err(|_| Error::BadNumber { found: w, pos }),
            (tok, pos) => Err(Error::Unexpected { found: tok.to_string(), pos }),
        }
    }
}
