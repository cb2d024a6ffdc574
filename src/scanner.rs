use crate::token::{Token, TokenType};
use phf::phf_map;
use std::error::Error;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum LexErrorKind {
    UnterminatedString,
    InvalidCharacter,
}

#[derive(Debug)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: i32,
    message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[line {}] Lex Error ({}): {}",
            self.line, self.kind, self.message
        )
    }
}

impl Error for LexError {
    fn description(&self) -> &str {
        &self.message
    }
}

// Lexical regions. Code is the base mode for class bodies; a markup region
// opens on '<' and tracks element nesting; a tag header is its own mode so
// attribute punctuation does not collide with text runs; '{' inside markup
// re-enters the statement grammar until its matching '}'.
#[derive(Debug, Clone, Copy)]
enum Mode {
    Code,
    Markup { depth: u32 },
    Tag { closing: bool },
    Embedded { braces: u32 },
}

struct Scanner<'a> {
    source: &'a str,
    iter: Peekable<CharIndices<'a>>,
    start: usize,
    line: i32,
    modes: Vec<Mode>,
}

pub fn scan_tokens(source: &str) -> Result<Vec<Token>, LexError> {
    let mut scanner = Scanner {
        source,
        iter: source.char_indices().peekable(),
        start: 0,
        line: 1,
        modes: vec![Mode::Code],
    };
    let mut tokens: Vec<Token> = Vec::new();

    while let Some((idx, _)) = scanner.iter.peek() {
        scanner.start = *idx;
        if let Some(token) = scanner.scan_token()? {
            tokens.push(token);
        }
    }
    tokens.push(Token {
        tokentype: TokenType::EOF,
        lexeme: String::new(),
        line: scanner.line,
    });
    Ok(tokens)
}

impl<'a> Scanner<'a> {
    fn scan_token(&mut self) -> Result<Option<Token>, LexError> {
        match self.modes.last() {
            Some(Mode::Markup { .. }) => self.scan_markup(),
            Some(Mode::Tag { .. }) => self.scan_tag(),
            _ => self.scan_code(),
        }
    }

    fn scan_code(&mut self) -> Result<Option<Token>, LexError> {
        match self.advance()?.1 {
            '(' => Ok(Some(self.token(TokenType::LeftParen))),
            ')' => Ok(Some(self.token(TokenType::RightParen))),
            '{' => {
                if let Some(Mode::Embedded { braces }) = self.modes.last_mut() {
                    *braces += 1;
                }
                Ok(Some(self.token(TokenType::LeftBrace)))
            }
            '}' => {
                match self.modes.last_mut() {
                    Some(Mode::Embedded { braces: 0 }) => {
                        self.modes.pop();
                    }
                    Some(Mode::Embedded { braces }) => *braces -= 1,
                    _ => (),
                }
                Ok(Some(self.token(TokenType::RightBrace)))
            }
            ',' => Ok(Some(self.token(TokenType::Comma))),
            ';' => Ok(Some(self.token(TokenType::Semicolon))),
            ':' => Ok(Some(self.token(TokenType::Colon))),
            '.' => Ok(Some(self.token(TokenType::Dot))),
            '-' => Ok(Some(self.token(TokenType::Minus))),
            '+' => Ok(Some(self.token(TokenType::Plus))),
            '*' => Ok(Some(self.token(TokenType::Star))),
            '=' => Ok(Some(self.token(TokenType::Equal))),
            '/' => {
                if self.next_if('/') {
                    self.skip_line_comment();
                    Ok(None)
                } else if self.next_if('*') {
                    self.skip_block_comment();
                    Ok(None)
                } else {
                    Ok(Some(self.token(TokenType::Slash)))
                }
            }
            '<' => {
                // The surface language has no comparison operators, so '<'
                // in code position always opens a markup region.
                let closing = self.next_if('/');
                self.modes.push(Mode::Tag { closing });
                if closing {
                    Ok(Some(self.token(TokenType::LessSlash)))
                } else {
                    Ok(Some(self.token(TokenType::Less)))
                }
            }
            ' ' | '\r' | '\t' => Ok(None),
            '\n' => {
                self.line += 1;
                Ok(None)
            }
            q @ '"' | q @ '\'' => Ok(Some(self.string(q)?)),
            '0'..='9' => Ok(Some(self.number()?)),
            'a'..='z' | 'A'..='Z' | '_' => Ok(Some(self.identifier()?)),
            _ => Err(self.error(LexErrorKind::InvalidCharacter, "Unexpected character.")),
        }
    }

    fn scan_tag(&mut self) -> Result<Option<Token>, LexError> {
        match self.advance()?.1 {
            ' ' | '\r' | '\t' => Ok(None),
            '\n' => {
                self.line += 1;
                Ok(None)
            }
            '=' => Ok(Some(self.token(TokenType::Equal))),
            '>' => {
                let closing = self.pop_tag();
                self.finish_tag(closing, false);
                Ok(Some(self.token(TokenType::Greater)))
            }
            '/' => {
                if self.next_if('>') {
                    self.pop_tag();
                    self.finish_tag(false, true);
                    Ok(Some(self.token(TokenType::SlashGreater)))
                } else {
                    Err(self.error(LexErrorKind::InvalidCharacter, "Unexpected '/' in tag."))
                }
            }
            '{' => {
                self.modes.push(Mode::Embedded { braces: 0 });
                Ok(Some(self.token(TokenType::LeftBrace)))
            }
            q @ '"' | q @ '\'' => Ok(Some(self.string(q)?)),
            '0'..='9' => Ok(Some(self.number()?)),
            // tag and attribute names are never keywords ('class' is a
            // perfectly good attribute)
            'a'..='z' | 'A'..='Z' | '_' => Ok(Some(self.raw_identifier()?)),
            _ => Err(self.error(LexErrorKind::InvalidCharacter, "Unexpected character in tag.")),
        }
    }

    fn scan_markup(&mut self) -> Result<Option<Token>, LexError> {
        match self.peek_char() {
            Some('<') => {
                self.advance()?;
                let closing = self.next_if('/');
                self.modes.push(Mode::Tag { closing });
                if closing {
                    Ok(Some(self.token(TokenType::LessSlash)))
                } else {
                    Ok(Some(self.token(TokenType::Less)))
                }
            }
            Some('{') => {
                self.advance()?;
                self.modes.push(Mode::Embedded { braces: 0 });
                Ok(Some(self.token(TokenType::LeftBrace)))
            }
            Some(_) => self.text(),
            None => Ok(None),
        }
    }

    // A raw run between markup nodes. Leading/trailing whitespace is
    // insignificant; whitespace-only runs produce no token. Line comments
    // may sit between nodes and are skipped like in code position.
    fn text(&mut self) -> Result<Option<Token>, LexError> {
        let mut value = String::new();
        while let Some(c) = self.peek_char() {
            match c {
                '<' | '{' => break,
                '/' => {
                    if self.peek_second() == Some('/') && value.trim().is_empty() {
                        self.skip_line_comment();
                        value.clear();
                        continue;
                    }
                    value.push(c);
                    self.iter.next();
                }
                '\n' => {
                    self.line += 1;
                    value.push(c);
                    self.iter.next();
                }
                _ => {
                    value.push(c);
                    self.iter.next();
                }
            }
        }
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Token {
                tokentype: TokenType::Text(trimmed.to_string()),
                lexeme: value,
                line: self.line,
            }))
        }
    }

    fn pop_tag(&mut self) -> bool {
        match self.modes.pop() {
            Some(Mode::Tag { closing }) => closing,
            _ => false,
        }
    }

    // Adjusts element nesting once a tag header ends. An opening tag either
    // deepens the current markup region or starts a new one; a closing tag
    // that returns the region to depth zero hands control back to the
    // enclosing mode.
    fn finish_tag(&mut self, closing: bool, self_closing: bool) {
        if self_closing {
            return;
        }
        if closing {
            if let Some(Mode::Markup { depth }) = self.modes.last_mut() {
                *depth -= 1;
                if *depth == 0 {
                    self.modes.pop();
                }
            }
        } else {
            match self.modes.last_mut() {
                Some(Mode::Markup { depth }) => *depth += 1,
                _ => self.modes.push(Mode::Markup { depth: 1 }),
            }
        }
    }

    fn current(&mut self) -> usize {
        match self.iter.peek() {
            None => self.source.len(),
            Some((idx, _)) => *idx,
        }
    }

    fn token(&mut self, token_type: TokenType) -> Token {
        let current = self.current();
        Token {
            tokentype: token_type,
            lexeme: self.source[self.start..current].to_string(),
            line: self.line,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.iter.peek().map(|&(_, c)| c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.iter.clone();
        it.next();
        it.next().map(|(_, c)| c)
    }

    fn next_if(&mut self, expected: char) -> bool {
        if let Some((_, c)) = self.iter.peek() {
            if *c == expected {
                self.iter.next();
                return true;
            }
        }
        false
    }

    fn advance(&mut self) -> Result<(usize, char), LexError> {
        let line = self.line;
        self.iter.next().ok_or(LexError {
            kind: LexErrorKind::InvalidCharacter,
            line,
            message: "Unexpected end of input.".to_string(),
        })
    }

    fn error(&self, kind: LexErrorKind, message: &str) -> LexError {
        LexError {
            kind,
            line: self.line,
            message: message.to_string(),
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some((_, c)) = self.iter.peek() {
            if *c == '\n' {
                break;
            }
            self.iter.next();
        }
    }

    fn skip_block_comment(&mut self) {
        while let Some((_, c)) = self.iter.next() {
            match c {
                '\n' => self.line += 1,
                '*' => {
                    if self.next_if('/') {
                        return;
                    }
                }
                _ => (),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<Token, LexError> {
        let mut value = String::new();
        loop {
            match self.iter.next() {
                None => {
                    return Err(self.error(LexErrorKind::UnterminatedString, "Unterminated string."))
                }
                Some((_, c)) if c == quote => break,
                Some((_, '\\')) => match self.iter.next() {
                    None => {
                        return Err(
                            self.error(LexErrorKind::UnterminatedString, "Unterminated string.")
                        )
                    }
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, other)) => value.push(other),
                },
                Some((_, '\n')) => {
                    self.line += 1;
                    value.push('\n');
                }
                Some((_, c)) => value.push(c),
            }
        }
        Ok(self.token(TokenType::String(value)))
    }

    fn number(&mut self) -> Result<Token, LexError> {
        while let Some((_, c)) = self.iter.peek() {
            match c {
                '0'..='9' => {
                    self.iter.next();
                }
                _ => break,
            }
        }
        if self.peek_char() == Some('.') {
            if let Some('0'..='9') = self.peek_second() {
                self.iter.next();
                while let Some((_, c)) = self.iter.peek() {
                    match c {
                        '0'..='9' => {
                            self.iter.next();
                        }
                        _ => break,
                    }
                }
            }
        }
        let current = self.current();
        let value = self.source[self.start..current].parse().map_err(|_| {
            self.error(LexErrorKind::InvalidCharacter, "Malformed number literal.")
        })?;
        Ok(self.token(TokenType::Number(value)))
    }

    fn identifier(&mut self) -> Result<Token, LexError> {
        let token = self.raw_identifier()?;
        if let TokenType::Identifier(name) = &token.tokentype {
            if let Some(keyword) = KEYWORDS.get(name.as_str()) {
                return Ok(Token {
                    tokentype: keyword.clone(),
                    lexeme: token.lexeme.clone(),
                    line: token.line,
                });
            }
        }
        Ok(token)
    }

    fn raw_identifier(&mut self) -> Result<Token, LexError> {
        while let Some((_, c)) = self.iter.peek() {
            match c {
                '0'..='9' | 'a'..='z' | 'A'..='Z' | '_' => {
                    self.iter.next();
                }
                _ => break,
            }
        }
        let current = self.current();
        Ok(self.token(TokenType::Identifier(
            self.source[self.start..current].to_string(),
        )))
    }
}

static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "class" => TokenType::Class,
    "extends" => TokenType::Extends,
    "namespace" => TokenType::Namespace,
    "public" => TokenType::Public,
    "const" => TokenType::Const,
    "let" => TokenType::Let,
    "init" => TokenType::Init,
    "new" => TokenType::New,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "false" => TokenType::False,
};
