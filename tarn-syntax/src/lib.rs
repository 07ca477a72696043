// tarn-syntax - Token and syntax tree definitions for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! # tarn-syntax
//!
//! Token and syntax tree definitions shared by the Tarn parser and the
//! bytecode compiler. The tree is a dense node table over a token table; see
//! [`Ast`] for the layout and [`AstBuilder`] for assembling one.

pub mod ast;
pub mod token;

pub use ast::{Ast, AstBuilder, Node, NodeData, NodeIndex, NodeKind};
pub use token::{Token, TokenIndex, TokenKind};
