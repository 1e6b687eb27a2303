//! Indentation-aware lexer for warden scripts.
//!
//! Indentation is tracked with a stack; each change emits Indent/Dedent
//! tokens through a pending queue. Newlines and indentation are suppressed
//! inside brackets so call argument lists can span lines.

use crate::tokens::{Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}")]
    UnexpectedChar { ch: char, line: usize },
    #[error("unterminated string at line {line}")]
    UnterminatedString { line: usize },
    #[error("inconsistent indentation at line {line}")]
    InconsistentIndent { line: usize },
    #[error("invalid number at line {line}")]
    InvalidNumber { line: usize },
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    indent_stack: Vec<usize>,
    pending: Vec<Token>,
    at_line_start: bool,
    bracket_depth: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            indent_stack: vec![0],
            pending: Vec::new(),
            at_line_start: true,
            bracket_depth: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.at_line_start = true;
        }
        Some(ch)
    }

    fn handle_indentation(&mut self) -> Result<(), LexError> {
        let mut indent = 0;
        while let Some(ch) = self.current() {
            match ch {
                ' ' => {
                    indent += 1;
                    self.advance();
                }
                '\t' => {
                    indent += 4;
                    self.advance();
                }
                _ => break,
            }
        }
        // Blank and comment-only lines carry no indentation meaning.
        if matches!(self.current(), None | Some('\n') | Some('#')) {
            return Ok(());
        }
        let cur = *self.indent_stack.last().unwrap();
        if indent > cur {
            self.indent_stack.push(indent);
            self.pending.push(Token::new(TokenKind::Indent, self.line));
        } else if indent < cur {
            while let Some(&top) = self.indent_stack.last() {
                if top > indent {
                    self.indent_stack.pop();
                    self.pending.push(Token::new(TokenKind::Dedent, self.line));
                } else {
                    break;
                }
            }
            if *self.indent_stack.last().unwrap() != indent {
                return Err(LexError::InconsistentIndent { line: self.line });
            }
        }
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start_line = self.line;
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.current() {
                None | Some('\n') => return Err(LexError::UnterminatedString { line: start_line }),
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => {
                            s.push('\n');
                            self.advance();
                        }
                        Some('t') => {
                            s.push('\t');
                            self.advance();
                        }
                        Some('r') => {
                            s.push('\r');
                            self.advance();
                        }
                        Some('\\') => {
                            s.push('\\');
                            self.advance();
                        }
                        Some(c) if c == quote => {
                            s.push(c);
                            self.advance();
                        }
                        Some(c) => {
                            s.push('\\');
                            s.push(c);
                            self.advance();
                        }
                        None => return Err(LexError::UnterminatedString { line: start_line }),
                    }
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::StringLit(s), start_line))
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let line = self.line;
        let mut ns = String::new();
        let mut is_float = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                ns.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && matches!(self.peek(), Some(d) if d.is_ascii_digit())
            {
                is_float = true;
                ns.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        if is_float {
            ns.parse::<f64>()
                .map(|f| Token::new(TokenKind::FloatLit(f), line))
                .map_err(|_| LexError::InvalidNumber { line })
        } else {
            ns.parse::<i64>()
                .map(|n| Token::new(TokenKind::IntLit(n), line))
                .map_err(|_| LexError::InvalidNumber { line })
        }
    }

    fn read_ident(&mut self) -> Token {
        let line = self.line;
        let mut id = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                id.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        let kind = match id.as_str() {
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "with" => TokenKind::With,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "pass" => TokenKind::Pass,
            "try" => TokenKind::Try,
            "except" => TokenKind::Except,
            "lambda" => TokenKind::Lambda,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "is" => TokenKind::Is,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None_,
            _ => TokenKind::Ident(id),
        };
        Token::new(kind, line)
    }

    fn two_char(&mut self, second: char, matched: TokenKind, single: TokenKind) -> Token {
        let line = self.line;
        self.advance();
        if self.current() == Some(second) {
            self.advance();
            Token::new(matched, line)
        } else {
            Token::new(single, line)
        }
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        let line = self.line;
        self.advance();
        Token::new(kind, line)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                self.at_line_start = false;
                self.handle_indentation()?;
                tokens.append(&mut self.pending);
            } else if self.at_line_start {
                self.at_line_start = false;
                while matches!(self.current(), Some(' ' | '\t')) {
                    self.advance();
                }
            }
            let ch = match self.current() {
                Some(c) => c,
                None => break,
            };
            match ch {
                '\n' => {
                    let line = self.line;
                    self.advance();
                    if self.bracket_depth == 0
                        && !matches!(
                            tokens.last().map(|t| &t.kind),
                            Some(TokenKind::Newline) | Some(TokenKind::Indent) | None
                        )
                    {
                        tokens.push(Token::new(TokenKind::Newline, line));
                    }
                }
                ' ' | '\t' | '\r' => {
                    while matches!(self.current(), Some(' ' | '\t' | '\r')) {
                        self.advance();
                    }
                }
                '#' => {
                    while matches!(self.current(), Some(c) if c != '\n') {
                        self.advance();
                    }
                }
                '"' | '\'' => tokens.push(self.read_string(ch)?),
                '0'..='9' => tokens.push(self.read_number()?),
                'a'..='z' | 'A'..='Z' | '_' => tokens.push(self.read_ident()),
                '+' => tokens.push(self.two_char('=', TokenKind::PlusAssign, TokenKind::Plus)),
                '-' => tokens.push(self.two_char('=', TokenKind::MinusAssign, TokenKind::Minus)),
                '*' => {
                    let line = self.line;
                    self.advance();
                    match self.current() {
                        Some('*') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::DoubleStar, line));
                        }
                        Some('=') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::StarAssign, line));
                        }
                        _ => tokens.push(Token::new(TokenKind::Star, line)),
                    }
                }
                '/' => {
                    let line = self.line;
                    self.advance();
                    match self.current() {
                        Some('/') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::DoubleSlash, line));
                        }
                        Some('=') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::SlashAssign, line));
                        }
                        _ => tokens.push(Token::new(TokenKind::Slash, line)),
                    }
                }
                '%' => tokens.push(self.single(TokenKind::Percent)),
                '&' => tokens.push(self.single(TokenKind::Amp)),
                '|' => tokens.push(self.single(TokenKind::Pipe)),
                '^' => tokens.push(self.single(TokenKind::Caret)),
                '=' => tokens.push(self.two_char('=', TokenKind::Eq, TokenKind::Assign)),
                '!' => {
                    let line = self.line;
                    self.advance();
                    if self.current() == Some('=') {
                        self.advance();
                        tokens.push(Token::new(TokenKind::NotEq, line));
                    } else {
                        return Err(LexError::UnexpectedChar { ch: '!', line });
                    }
                }
                '<' => {
                    let line = self.line;
                    self.advance();
                    match self.current() {
                        Some('<') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::Shl, line));
                        }
                        Some('=') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::LtEq, line));
                        }
                        _ => tokens.push(Token::new(TokenKind::Lt, line)),
                    }
                }
                '>' => {
                    let line = self.line;
                    self.advance();
                    match self.current() {
                        Some('>') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::Shr, line));
                        }
                        Some('=') => {
                            self.advance();
                            tokens.push(Token::new(TokenKind::GtEq, line));
                        }
                        _ => tokens.push(Token::new(TokenKind::Gt, line)),
                    }
                }
                '(' => {
                    self.bracket_depth += 1;
                    tokens.push(self.single(TokenKind::LParen));
                }
                ')' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    tokens.push(self.single(TokenKind::RParen));
                }
                '[' => {
                    self.bracket_depth += 1;
                    tokens.push(self.single(TokenKind::LBracket));
                }
                ']' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    tokens.push(self.single(TokenKind::RBracket));
                }
                '{' => {
                    self.bracket_depth += 1;
                    tokens.push(self.single(TokenKind::LBrace));
                }
                '}' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    tokens.push(self.single(TokenKind::RBrace));
                }
                ',' => tokens.push(self.single(TokenKind::Comma)),
                ':' => tokens.push(self.single(TokenKind::Colon)),
                '.' => tokens.push(self.single(TokenKind::Dot)),
                _ => {
                    return Err(LexError::UnexpectedChar {
                        ch,
                        line: self.line,
                    })
                }
            }
        }
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Newline) | None) {
            tokens.push(Token::new(TokenKind::Newline, self.line));
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            tokens.push(Token::new(TokenKind::Dedent, self.line));
        }
        tokens.push(Token::new(TokenKind::Eof, self.line));
        Ok(tokens)
    }
}
