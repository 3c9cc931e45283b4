//! Formula parser
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with operator precedence. The AST can only
//! express the arithmetic subset (binary and unary operators, numeric
//! literals, bare names), so anything outside it fails here rather than being
//! filtered afterwards.
//!
//! Precedence, lowest first:
//!
//! ```text
//! expr  := term (("+" | "-") term)*
//! term  := unary (("*" | "/" | "%") unary)*
//! unary := ("-" | "+") unary | power
//! power := atom ("**" unary)?          (right-associative)
//! atom  := NUMBER | IDENTIFIER | "(" expr ")"
//! ```

use super::tokenizer::{tokenize, Token};
use std::fmt;

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            "%" => Some(BinaryOp::Mod),
            "**" => Some(BinaryOp::Pow),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

/// Unary sign operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
}

impl UnaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "-" => Some(UnaryOp::Neg),
            "+" => Some(UnaryOp::Pos),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        }
    }
}

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal
    Number(f64),
    /// A column or computed-value name
    Identifier(String),
    /// Binary operation: left op right
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation: op operand
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

impl Expr {
    /// Names referenced anywhere in the expression, in first-seen order
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Identifier(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.collect_identifiers(names);
                right.collect_identifiers(names);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_identifiers(names),
        }
    }
}

/// Fully parenthesized rendering, handy in logs
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Identifier(name) => write!(f, "{}", name),
            Expr::BinaryOp { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::UnaryOp { op, operand } => write!(f, "({}{})", op.symbol(), operand),
        }
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at token {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parser for formula tokens
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Create a new parser for the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if let Some(token) = self.peek() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", token),
                self.position,
            ));
        }

        Ok(expr)
    }

    /// Peek at the current token
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    /// Advance to the next token and return it
    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Consume the current token if it is one of the given operators
    fn match_any_operator(&mut self, ops: &[&str]) -> Option<String> {
        if let Some(Token::Operator(s)) = self.peek() {
            if ops.contains(&s.as_str()) {
                let op = s.clone();
                self.position += 1;
                return Some(op);
            }
        }
        None
    }

    fn binary(&self, symbol: &str, left: Expr, right: Expr) -> Result<Expr, ParseError> {
        let op = BinaryOp::from_symbol(symbol).ok_or_else(|| {
            ParseError::new(format!("Unsupported operator: {}", symbol), self.position)
        })?;
        Ok(Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Expression: term (( "+" | "-" ) term)*
    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;

        while let Some(op) = self.match_any_operator(&["+", "-"]) {
            let right = self.term()?;
            left = self.binary(&op, left, right)?;
        }

        Ok(left)
    }

    /// Term: unary (( "*" | "/" | "%" ) unary)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;

        while let Some(op) = self.match_any_operator(&["*", "/", "%"]) {
            let right = self.unary()?;
            left = self.binary(&op, left, right)?;
        }

        Ok(left)
    }

    /// Unary: ( "-" | "+" ) unary | power
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(symbol) = self.match_any_operator(&["-", "+"]) {
            let operand = self.unary()?;
            let op = UnaryOp::from_symbol(&symbol).ok_or_else(|| {
                ParseError::new(format!("Unsupported unary operator: {}", symbol), self.position)
            })?;
            Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            })
        } else {
            self.power()
        }
    }

    /// Power: atom ( "**" unary )?
    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.atom()?;

        if let Some(op) = self.match_any_operator(&["**"]) {
            // The exponent may carry its own sign: 2 ** -1
            let exponent = self.unary()?;
            self.binary(&op, base, exponent)
        } else {
            Ok(base)
        }
    }

    /// Atom: NUMBER | IDENTIFIER | "(" expression ")"
    fn atom(&mut self) -> Result<Expr, ParseError> {
        let position = self.position;
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),

            Some(Token::Identifier(name)) => {
                if self.peek() == Some(&Token::OpenParen) {
                    return Err(ParseError::new(
                        format!("Function calls are not allowed here: {}(...)", name),
                        position,
                    ));
                }
                Ok(Expr::Identifier(name))
            }

            Some(Token::OpenParen) => {
                let expr = self.expression()?;
                match self.advance() {
                    Some(Token::CloseParen) => Ok(expr),
                    _ => Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    )),
                }
            }

            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                position,
            )),

            None => Err(ParseError::new("Unexpected end of expression", position)),
        }
    }
}

/// Convenience function to parse tokens into an AST
pub fn parse(tokens: Vec<Token>) -> Result<Expr, ParseError> {
    Parser::new(tokens).parse()
}

/// Tokenize and parse formula text in one step
pub fn parse_formula(formula: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(formula).map_err(|e| ParseError::new(e.message, e.position))?;
    parse(tokens)
}
