//! Handle Lox's lexical analysis.
//!
//! Contains the [Scanner], which turns source text into [Token]s on demand.
//! The scanner is total: it never fails, it encodes lexical errors as
//! [TokenKind::Error] tokens, and once the source is exhausted it yields
//! [TokenKind::Eof] forever.
//!
//! # Example
//!
//! ```
//! use loxide::scanner::{Scanner, TokenKind};
//! let scanner = Scanner::new("print 1 + 2;");
//! let kinds: Vec<_> = scanner
//!     .map(|token| token.kind)
//!     .take_while(|&kind| kind != TokenKind::Eof) // scanner will yield Eof forever...
//!     .collect();
//!
//! use TokenKind::*;
//! assert_eq!(vec![Print, Number, Plus, Number, Semicolon], kinds);
//! ```

use enum_map::Enum;

/// One semantic atom of Lox source code: its [TokenKind], the slice of the
/// source it covers, and the line it starts on.
///
/// For [TokenKind::Error] tokens, `text` is the error message instead of a
/// source slice.
#[derive(Clone, Copy, Debug)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: usize,
}

/// What _kind_ of [Token] you have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
#[rustfmt::skip]
pub enum TokenKind {
    // Single-character tokens.
    LeftParen, RightParen,
    LeftBrace, RightBrace,
    Comma, Dot, Minus, Plus,
    Semicolon, Star, Slash,
    // One or two character tokens.
    Bang, BangEqual,
    Equal, EqualEqual,
    Greater, GreaterEqual,
    Less, LessEqual,
    // Literals.
    Identifier, StrLiteral, Number,
    // Keywords.
    And, Class, Else, False,
    For, Fun, If, Nil, Or,
    Print, Return, Super, This,
    True, Var, While,

    // Others.
    Error, Eof,
}

impl<'a> Token<'a> {
    /// A placeholder token for parser state that has not seen real input yet.
    pub fn sentinel(message: &'static str) -> Token<'static> {
        Token {
            kind: TokenKind::Error,
            text: message,
            line: 0,
        }
    }
}

/// Scans Lox source code and yields [Token]s one at a time.
///
/// The scanner is stateful and does a single pass over the source string.
#[derive(Debug)]
pub struct Scanner<'a> {
    source: &'a str,
    /// Byte offset where the token being scanned starts.
    start: usize,
    /// Byte offset of the next character to consume.
    current: usize,
    line: usize,
}

impl<'a> Scanner<'a> {
    /// Start scanning the given string of source code.
    pub fn new(source: &'a str) -> Self {
        Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
        }
    }

    /// Yield the next [Token]. Once the source is exhausted, this returns an
    /// end-of-file token every time it is called.
    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        match self.advance() {
            c if is_id_start(c) => self.identifier(),
            c if c.is_ascii_digit() => self.number(),
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            '{' => self.make_token(TokenKind::LeftBrace),
            '}' => self.make_token(TokenKind::RightBrace),
            ';' => self.make_token(TokenKind::Semicolon),
            ',' => self.make_token(TokenKind::Comma),
            '.' => self.make_token(TokenKind::Dot),
            '-' => self.make_token(TokenKind::Minus),
            '+' => self.make_token(TokenKind::Plus),
            '/' => self.make_token(TokenKind::Slash),
            '*' => self.make_token(TokenKind::Star),
            '!' => self.one_or_two('=', TokenKind::BangEqual, TokenKind::Bang),
            '=' => self.one_or_two('=', TokenKind::EqualEqual, TokenKind::Equal),
            '<' => self.one_or_two('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.one_or_two('=', TokenKind::GreaterEqual, TokenKind::Greater),
            '"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    /// Returns `true` if we've reached the end of the source code.
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    /// Consumes and returns the next character.
    ///
    /// # Panics
    ///
    /// If this is called at the end of the source.
    fn advance(&mut self) -> char {
        let c = self.source[self.current..]
            .chars()
            .next()
            .expect("called advance() at end of input");
        self.current += c.len_utf8();
        c
    }

    /// Peek at the next character without consuming it. Yields `'\0'` at the
    /// end of the source.
    fn peek(&self) -> char {
        self.source[self.current..].chars().next().unwrap_or('\0')
    }

    /// Peek one character past [Scanner::peek].
    fn peek_next(&self) -> char {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next().unwrap_or('\0')
    }

    /// If the next character is `expected`, consume it and return true.
    fn match_and_advance(&mut self, expected: char) -> bool {
        if self.peek() != expected {
            return false;
        }
        self.current += expected.len_utf8();
        true
    }

    /// Coalesce a one-or-two-character operator in a single look-ahead.
    fn one_or_two(&mut self, second: char, double: TokenKind, single: TokenKind) -> Token<'a> {
        let kind = if self.match_and_advance(second) {
            double
        } else {
            single
        };
        self.make_token(kind)
    }

    /// Skips whitespace and `// …` comments, counting newlines.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                ' ' | '\r' | '\t' => {
                    self.advance();
                }
                '\n' => {
                    self.line += 1;
                    self.advance();
                }
                '/' => {
                    if self.peek_next() == '/' {
                        while self.peek() != '\n' && !self.is_at_end() {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Scan an identifier or keyword. The first character is consumed.
    fn identifier(&mut self) -> Token<'a> {
        while is_id_continue(self.peek()) {
            self.advance();
        }

        self.make_token(self.identifier_kind())
    }

    /// Scan a string literal. Expects the opening quote to have been
    /// consumed. There is no escape processing.
    fn string(&mut self) -> Token<'a> {
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        assert_eq!('"', self.advance());
        self.make_token(TokenKind::StrLiteral)
    }

    /// Scan a number literal. Expects the first digit to have been consumed.
    fn number(&mut self) -> Token<'a> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            // Consume the decimal point.
            self.advance();

            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    /// Decide whether the lexeme just scanned is a keyword or an ordinary
    /// identifier. This is a hand-rolled trie: branch on the first character
    /// (and second, where needed), then compare the rest.
    fn identifier_kind(&self) -> TokenKind {
        let lexeme = &self.source[self.start..self.current];
        let mut chars = lexeme.chars();

        match chars.next().unwrap_or('\0') {
            'a' => self.check_keyword("and", TokenKind::And),
            'c' => self.check_keyword("class", TokenKind::Class),
            'e' => self.check_keyword("else", TokenKind::Else),
            'f' => match chars.next().unwrap_or('\0') {
                'a' => self.check_keyword("false", TokenKind::False),
                'o' => self.check_keyword("for", TokenKind::For),
                'u' => self.check_keyword("fun", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            'i' => self.check_keyword("if", TokenKind::If),
            'n' => self.check_keyword("nil", TokenKind::Nil),
            'o' => self.check_keyword("or", TokenKind::Or),
            'p' => self.check_keyword("print", TokenKind::Print),
            'r' => self.check_keyword("return", TokenKind::Return),
            's' => self.check_keyword("super", TokenKind::Super),
            't' => match chars.next().unwrap_or('\0') {
                'h' => self.check_keyword("this", TokenKind::This),
                'r' => self.check_keyword("true", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            'v' => self.check_keyword("var", TokenKind::Var),
            'w' => self.check_keyword("while", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    /// Confirms that the current lexeme is exactly the given keyword.
    fn check_keyword(&self, keyword_text: &'static str, keyword: TokenKind) -> TokenKind {
        if &self.source[self.start..self.current] == keyword_text {
            keyword
        } else {
            TokenKind::Identifier
        }
    }

    /// Returns a token with [TokenKind::Error], carrying the message.
    fn error_token(&self, message: &'static str) -> Token<'a> {
        Token {
            kind: TokenKind::Error,
            text: message,
            line: self.line,
        }
    }

    /// Returns a [Token] spanning from `self.start` to `self.current`.
    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        Token {
            kind,
            text: &self.source[self.start..self.current],
            line: self.line,
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        Some(self.next_token())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // This iterator is infinite.
        (usize::MAX, None)
    }
}

///////////////////////////////////////////// Helpers /////////////////////////////////////////////

/// Returns true if this char can start an identifier or keyword.
fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Returns true if this char can continue an identifier or keyword.
fn is_id_continue(c: char) -> bool {
    is_id_start(c) || c.is_ascii_digit()
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////
