//! Compile-time error types.
//!
//! The reference implementation this compiler is modeled on raises bare
//! string exceptions; here each failure mode named by the language's error
//! scenarios gets its own variant so callers can match on *what* went wrong
//! instead of grepping a message.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The lexer found a character that starts no valid token.
    UnrecognizedCharacter { ch: char, at: Location },
    /// A string or char literal ran off the end of the source.
    UnterminatedLiteral { at: Location },
    /// Parser expected one token kind and found another.
    UnexpectedToken { expected: String, found: String, at: Location },
    /// Used a name that was never declared in any visible scope.
    Undeclared { name: String, at: Location },
    /// Declared a name already bound in the current scope.
    Redeclared { name: String, at: Location },
    /// A `struct`/`union`/`enum` tag used before or without a definition.
    IncompleteType { tag: String, at: Location },
    /// Same member name declared twice in one aggregate.
    DuplicateMember { name: String, tag: String, at: Location },
    /// An expression that isn't an lvalue was used where one is required.
    NotAnLvalue { at: Location },
    /// `*` applied to a non-pointer type.
    BadDereference { at: Location },
    /// `sizeof`/declarations on a type that was never completed.
    NotSized { at: Location },
    /// A global's initializer (or array size) must be a constant.
    NotConstant { at: Location },
    /// Catch-all for conditions the reference flags with a plain message.
    Other { message: String, at: Location },
}

impl CompileError {
    pub fn location(&self) -> &Location {
        match self {
            CompileError::UnrecognizedCharacter { at, .. }
            | CompileError::UnterminatedLiteral { at }
            | CompileError::UnexpectedToken { at, .. }
            | CompileError::Undeclared { at, .. }
            | CompileError::Redeclared { at, .. }
            | CompileError::IncompleteType { at, .. }
            | CompileError::DuplicateMember { at, .. }
            | CompileError::NotAnLvalue { at }
            | CompileError::BadDereference { at }
            | CompileError::NotSized { at }
            | CompileError::NotConstant { at }
            | CompileError::Other { at, .. } => at,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnrecognizedCharacter { ch, at } => {
                write!(f, "{at}: unrecognized character '{ch}'")
            }
            CompileError::UnterminatedLiteral { at } => {
                write!(f, "{at}: unterminated string or character literal")
            }
            CompileError::UnexpectedToken { expected, found, at } => {
                write!(f, "{at}: expected {expected}, found {found}")
            }
            CompileError::Undeclared { name, at } => {
                write!(f, "{at}: undeclared identifier '{name}'")
            }
            CompileError::Redeclared { name, at } => {
                write!(f, "{at}: '{name}' redeclared in this scope")
            }
            CompileError::IncompleteType { tag, at } => {
                write!(f, "{at}: '{tag}' used before it is defined")
            }
            CompileError::DuplicateMember { name, tag, at } => {
                write!(f, "{at}: duplicate member '{name}' in '{tag}'")
            }
            CompileError::NotAnLvalue { at } => write!(f, "{at}: expression is not an lvalue"),
            CompileError::BadDereference { at } => {
                write!(f, "{at}: cannot dereference a non-pointer value")
            }
            CompileError::NotSized { at } => write!(f, "{at}: type has no known size here"),
            CompileError::NotConstant { at } => {
                write!(f, "{at}: expected a constant expression")
            }
            CompileError::Other { message, at } => write!(f, "{at}: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}
