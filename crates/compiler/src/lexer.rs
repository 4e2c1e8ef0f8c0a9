//! The source-to-token scanner.
//!
//! Recognition order: skip whitespace and `//`/`/* */` comments, then try a
//! string literal, a character literal, a maximal-munch identifier/keyword
//! run, an integer literal, and finally the fixed operator/punctuation
//! table (longest entry first). Scanning identifiers before checking them
//! against the keyword table (rather than greedily matching keyword text
//! against the input) means `interest` lexes as one identifier rather than
//! the keyword `int` followed by `erest`.

use crate::error::{CompileError, Location};
use crate::token::{Token, TokenKind};

/// Fixed operator/punctuation lexemes, longest first so prefix ambiguities
/// (`<=` vs `<`, `>>` vs `>`) resolve correctly.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("&&", TokenKind::AmpAmp),
    ("||", TokenKind::PipePipe),
    ("->", TokenKind::Arrow),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    (">=", TokenKind::Ge),
    ("<=", TokenKind::Le),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    (">", TokenKind::Gt),
    ("<", TokenKind::Lt),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("!", TokenKind::Bang),
    ("=", TokenKind::Eq),
    ("~", TokenKind::Tilde),
    ("?", TokenKind::Question),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (";", TokenKind::Semi),
    (",", TokenKind::Comma),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
];

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src: src.as_bytes(), pos: 0, line: 1, col: 1, done: false }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn loc(&self) -> Location {
        Location { line: self.line, col: self.col }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some() && self.peek() != Some(b'\n') {
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    while self.peek().is_some()
                        && !(self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/'))
                    {
                        self.bump();
                    }
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn scan_escape(&mut self) -> u8 {
        match self.bump() {
            Some(b'n') => b'\n',
            Some(b't') => b'\t',
            Some(b'0') => 0,
            Some(b'\\') => b'\\',
            Some(b'\'') => b'\'',
            Some(b'"') => b'"',
            Some(other) => other,
            None => 0,
        }
    }

    /// String literals deliberately do *not* interpret `\n` the way
    /// character literals do: `PRINTF`'s runtime substitutes the literal
    /// two-byte `\n` for a newline out of the data segment (see
    /// `minic_core::vm::run_printf`), so the lexer only collapses `\"`
    /// (to let a string embed a quote) and `\\`, leaving every other
    /// backslash escape untouched in the stored bytes.
    fn scan_string(&mut self, start: Location) -> Result<Token, CompileError> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(CompileError::UnterminatedLiteral { at: start });
                }
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    match self.peek() {
                        Some(b'"') => {
                            self.bump();
                            text.push('"');
                        }
                        Some(b'\\') => {
                            self.bump();
                            text.push('\\');
                        }
                        _ => text.push('\\'),
                    }
                }
                Some(_) => {
                    text.push(self.bump().unwrap() as char);
                }
            }
        }
        Ok(Token::new(TokenKind::Str, text, start.line, start.col))
    }

    fn scan_char(&mut self, start: Location) -> Result<Token, CompileError> {
        self.bump(); // opening quote
        let value = match self.peek() {
            None => return Err(CompileError::UnterminatedLiteral { at: start }),
            Some(b'\\') => {
                self.bump();
                self.scan_escape()
            }
            Some(_) => self.bump().unwrap(),
        };
        if self.peek() != Some(b'\'') {
            return Err(CompileError::UnterminatedLiteral { at: start });
        }
        self.bump();
        Ok(Token::new(TokenKind::Num, (value as i64).to_string(), start.line, start.col))
    }

    fn scan_word(&mut self, start: Location) -> Token {
        let begin = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = std::str::from_utf8(&self.src[begin..self.pos]).unwrap().to_string();
        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Id);
        Token::new(kind, word, start.line, start.col)
    }

    fn scan_number(&mut self, start: Location) -> Token {
        let begin = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[begin..self.pos]).unwrap().to_string();
        Token::new(TokenKind::Num, text, start.line, start.col)
    }

    fn scan_operator(&mut self, start: Location) -> Result<Token, CompileError> {
        let remaining = &self.src[self.pos..];
        for (lexeme, kind) in OPERATORS {
            let bytes = lexeme.as_bytes();
            if remaining.len() >= bytes.len() && &remaining[..bytes.len()] == bytes {
                for _ in 0..bytes.len() {
                    self.bump();
                }
                return Ok(Token::new(*kind, *lexeme, start.line, start.col));
            }
        }
        let ch = self.peek().unwrap() as char;
        Err(CompileError::UnrecognizedCharacter { ch, at: start })
    }

    fn scan(&mut self) -> Option<Result<Token, CompileError>> {
        self.skip_trivia();
        let start = self.loc();
        match self.peek() {
            None => None,
            Some(b'"') => Some(self.scan_string(start)),
            Some(b'\'') => Some(self.scan_char(start)),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => Some(Ok(self.scan_word(start))),
            Some(c) if c.is_ascii_digit() => Some(Ok(self.scan_number(start))),
            Some(_) => Some(self.scan_operator(start)),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, CompileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.scan() {
            Some(result) => Some(result),
            None => {
                self.done = true;
                Some(Ok(Token::new(TokenKind::Eof, "", self.line, self.col)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).map(|t| t.unwrap().kind).collect()
    }

    #[test]
    fn keyword_is_not_a_prefix_trap() {
        let toks: Vec<_> = Lexer::new("interest").map(|t| t.unwrap()).collect();
        assert_eq!(toks[0].kind, TokenKind::Id);
        assert_eq!(toks[0].lexeme, "interest");
    }

    #[test]
    fn longest_operator_match() {
        assert_eq!(kinds("<<="), vec![TokenKind::Shl, TokenKind::Eq, TokenKind::Eof]);
        assert_eq!(kinds("<="), vec![TokenKind::Le, TokenKind::Eof]);
    }

    #[test]
    fn string_escape_n_is_kept_literal_for_printf_to_expand() {
        let toks: Vec<_> = Lexer::new(r#""hi\n""#).map(|t| t.unwrap()).collect();
        assert_eq!(toks[0].kind, TokenKind::Str);
        assert_eq!(toks[0].lexeme, "hi\\n");
    }

    #[test]
    fn string_escaped_quote_is_embedded() {
        let toks: Vec<_> = Lexer::new(r#""a\"b""#).map(|t| t.unwrap()).collect();
        assert_eq!(toks[0].lexeme, "a\"b");
    }

    #[test]
    fn char_literal_yields_numeric_value() {
        let toks: Vec<_> = Lexer::new("'a'").map(|t| t.unwrap()).collect();
        assert_eq!(toks[0].kind, TokenKind::Num);
        assert_eq!(toks[0].lexeme, (b'a' as i64).to_string());
    }

    #[test]
    fn skips_comments() {
        assert_eq!(kinds("// hi\n1 /* block */ 2"), vec![TokenKind::Num, TokenKind::Num, TokenKind::Eof]);
    }

    #[test]
    fn unrecognized_character_errors() {
        let err = Lexer::new("@").next().unwrap().unwrap_err();
        assert!(matches!(err, CompileError::UnrecognizedCharacter { ch: '@', .. }));
    }
}
