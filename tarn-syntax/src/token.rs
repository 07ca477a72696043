// tarn-syntax - Token and syntax tree definitions for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! Token definitions.
//!
//! Tokens are thin slices into the source text: the lexer records a kind and
//! a byte range, and consumers read the bytes back through
//! [`Ast::token_slice`](crate::Ast::token_slice). String tokens keep their
//! surrounding quotes; escape sequences are decoded later, by the compiler.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index of a token in the token table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TokenIndex(pub u32);

impl TokenIndex {
    /// The token's position as a usize, for table indexing.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Classification of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TokenKind {
    /// An identifier or type name.
    Ident,
    /// An integer literal.
    Int,
    /// A floating-point literal.
    Num,
    /// A string literal, including the surrounding quotes.
    Str,
    /// A keyword (`let`, `fn`, `for`, ...).
    Keyword,
    /// Any operator or punctuation lexeme.
    Symbol,
}

/// A single token: a kind plus a byte range into the source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first byte of the lexeme.
    pub start: u32,
    /// Length of the lexeme in bytes.
    pub len: u32,
}

impl Token {
    /// The half-open byte range of this token in the source.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.start + self.len) as usize
    }
}
