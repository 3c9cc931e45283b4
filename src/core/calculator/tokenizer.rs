//! Formula tokenizer
//!
//! Converts formula strings like "gross_revenue * (1 - discount_rate)" into a
//! sequence of tokens for the parser. Only the characters the formula language
//! admits are recognized; anything else (quotes, comparison signs, dots used as
//! attribute access, brackets) is rejected here.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, .5, 1.5e10)
    Number(f64),
    /// A column or computed-value name, or an aggregate function name
    Identifier(String),
    /// Arithmetic operators: + - * / % **
    Operator(String),
    /// Opening parenthesis
    OpenParen,
    /// Closing parenthesis
    CloseParen,
    /// Comma (only meaningful inside aggregate calls, rejected by the parser)
    Comma,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given formula string
    pub fn new(formula: &'a str) -> Self {
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    /// Get the next token, or None if at end of input
    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '(' => {
                self.advance();
                Token::OpenParen
            }
            ')' => {
                self.advance();
                Token::CloseParen
            }
            ',' => {
                self.advance();
                Token::Comma
            }

            '+' | '-' | '/' | '%' => {
                self.advance();
                Token::Operator(c.to_string())
            }

            // '*' or '**'
            '*' => {
                self.advance();
                if self.peek() == Some('*') {
                    self.advance();
                    Token::Operator("**".to_string())
                } else {
                    Token::Operator("*".to_string())
                }
            }

            c if c.is_ascii_digit() => self.read_number()?,
            '.' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => self.read_number()?,

            c if c.is_alphabetic() || c == '_' => self.read_identifier(),

            c => {
                return Err(TokenizeError::new(
                    format!("Unexpected character: '{}'", c),
                    self.position,
                ));
            }
        };
        Ok(Some(token))
    }

    /// Peek at the next character without consuming it
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Peek one character past the next
    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    /// Push consecutive ASCII digits onto `buf`
    fn read_digits(&mut self, buf: &mut String) {
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            buf.push(c);
            self.advance();
        }
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        self.read_digits(&mut num_str);

        if self.peek() == Some('.') {
            num_str.push('.');
            self.advance();
            self.read_digits(&mut num_str);
        }

        // Exponent part (e.g., 1.5e10, 2E-5)
        if let Some(e) = self.peek().filter(|c| *c == 'e' || *c == 'E') {
            num_str.push(e);
            self.advance();
            if let Some(sign) = self.peek().filter(|c| *c == '+' || *c == '-') {
                num_str.push(sign);
                self.advance();
            }
            self.read_digits(&mut num_str);
        }

        // A number running straight into a name ("2x") is not a valid literal
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(TokenizeError::new(
                format!("Invalid number: {}", num_str),
                start_pos,
            ));
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    /// Read an identifier (column, computed value or function name)
    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while let Some(c) = self.peek().filter(|c| c.is_alphanumeric() || *c == '_') {
            ident.push(c);
            self.advance();
        }

        Token::Identifier(ident)
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}
