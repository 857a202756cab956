//! Tokenizer for application scripts.

use crate::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Function,
    Return,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Typeof,
    Delete,
    Void,
    In,
    This,
    True,
    False,
    Null,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Self> {
        Some(match word {
            "var" => Self::Var,
            "let" => Self::Let,
            "function" => Self::Function,
            "return" => Self::Return,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "throw" => Self::Throw,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "typeof" => Self::Typeof,
            "delete" => Self::Delete,
            "void" => Self::Void,
            "in" => Self::In,
            "this" => Self::This,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Var => "var",
            Self::Let => "let",
            Self::Function => "function",
            Self::Return => "return",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Throw => "throw",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Typeof => "typeof",
            Self::Delete => "delete",
            Self::Void => "void",
            Self::In => "in",
            Self::This => "this",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Colon,
    Question,
    Assign,
    PlusAssign,
    MinusAssign,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    label: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, label: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            label,
        }
    }

    /// Tokenizes the whole source, ending with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };
            let kind = if c.is_ascii_digit()
                || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if is_ident_start(c) {
                self.word()
            } else {
                TokenKind::Punct(self.punct()?)
            };
            tokens.push(Token { kind, line, column });
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            message: message.into(),
            label: self.label.to_string(),
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), ScriptError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' && self.peek_at(1) == Some('/') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else if c == '/' && self.peek_at(1) == Some('*') {
                self.bump();
                self.bump();
                loop {
                    match self.bump() {
                        Some('*') if self.peek() == Some('/') => {
                            self.bump();
                            break;
                        }
                        Some(_) => {}
                        None => return Err(self.error("unterminated comment")),
                    }
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn number(&mut self) -> Result<TokenKind, ScriptError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else if (c == 'e' || c == 'E') && !text.contains(['e', 'E']) {
                text.push(c);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        text.parse()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number literal '{text}'")))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ScriptError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => return Ok(TokenKind::String(text)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some(other) => other,
                        None => return Err(self.error("unterminated string literal")),
                    };
                    text.push(escaped);
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek().filter(|&c| is_ident_part(c)) {
            word.push(c);
            self.bump();
        }
        match Keyword::lookup(&word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident(word),
        }
    }

    fn punct(&mut self) -> Result<Punct, ScriptError> {
        let c = self.peek().unwrap_or('\0');
        let next = self.peek_at(1);
        let third = self.peek_at(2);
        let (punct, width) = match (c, next, third) {
            ('=', Some('='), Some('=')) => (Punct::StrictEq, 3),
            ('!', Some('='), Some('=')) => (Punct::StrictNotEq, 3),
            ('=', Some('='), _) => (Punct::Eq, 2),
            ('!', Some('='), _) => (Punct::NotEq, 2),
            ('<', Some('='), _) => (Punct::LtEq, 2),
            ('>', Some('='), _) => (Punct::GtEq, 2),
            ('+', Some('='), _) => (Punct::PlusAssign, 2),
            ('-', Some('='), _) => (Punct::MinusAssign, 2),
            ('&', Some('&'), _) => (Punct::AndAnd, 2),
            ('|', Some('|'), _) => (Punct::OrOr, 2),
            ('(', ..) => (Punct::LParen, 1),
            (')', ..) => (Punct::RParen, 1),
            ('{', ..) => (Punct::LBrace, 1),
            ('}', ..) => (Punct::RBrace, 1),
            ('[', ..) => (Punct::LBracket, 1),
            (']', ..) => (Punct::RBracket, 1),
            (',', ..) => (Punct::Comma, 1),
            (';', ..) => (Punct::Semicolon, 1),
            ('.', ..) => (Punct::Dot, 1),
            (':', ..) => (Punct::Colon, 1),
            ('?', ..) => (Punct::Question, 1),
            ('=', ..) => (Punct::Assign, 1),
            ('<', ..) => (Punct::Lt, 1),
            ('>', ..) => (Punct::Gt, 1),
            ('+', ..) => (Punct::Plus, 1),
            ('-', ..) => (Punct::Minus, 1),
            ('*', ..) => (Punct::Star, 1),
            ('/', ..) => (Punct::Slash, 1),
            ('%', ..) => (Punct::Percent, 1),
            ('!', ..) => (Punct::Bang, 1),
            _ => return Err(self.error(format!("unexpected character '{c}'"))),
        };
        for _ in 0..width {
            self.bump();
        }
        Ok(punct)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, "test")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_operators_greedily() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::StrictEq),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(Punct::StrictNotEq),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_numbers_and_comments() {
        assert_eq!(
            kinds("// note\n'a\\'b' /* x */ 1.5e3"),
            vec![
                TokenKind::String("a'b".into()),
                TokenKind::Number(1500.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = Lexer::new("x\n  y", "test").tokenize().unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = Lexer::new("'abc", "app.js").tokenize().unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { label, .. } if label == "app.js"));
    }
}
