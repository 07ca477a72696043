// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! # tarn-compiler
//!
//! Compiles a Tarn syntax tree (from `tarn-syntax`) into register-style
//! bytecode for the Tarn VM. Lowering is a single pass in evaluation order:
//! expressions fold to compile-time constants where possible, everything
//! else becomes instructions whose index doubles as the name of the value
//! they produce. See [`Compiler`] for the entry point and [`Bytecode`] for
//! the output.
//!
//! ```
//! use tarn_compiler::{Compiler, Opcode};
//! use tarn_syntax::{AstBuilder, NodeKind};
//!
//! let mut b = AstBuilder::new();
//! let two = b.int("2");
//! let three = b.int("3");
//! let sum = b.binary(NodeKind::Add, two, three);
//! b.root(sum);
//!
//! let out = Compiler::new(&b.finish()).compile().unwrap();
//! // `2 + 3` folds: one constant, then the implicit ret_null.
//! assert_eq!(out.bytecode.main.len(), 2);
//! assert_eq!(out.bytecode.instruction(out.bytecode.main[0]).op, Opcode::Int);
//! ```

pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod intern;
pub mod scope;
pub mod value;

pub use bytecode::{
    pack_func_info, unpack_func_info, Bytecode, Instruction, Opcode, Operand, Primitive, Ref,
    TypeTag, MAX_PARAMS, UNPATCHED,
};
pub use compiler::{CompileOutput, Compiler, UnresolvedGlobal};
pub use error::{CompileError, CompileFailure, Diagnostic, Diagnostics, Severity};
pub use intern::Interner;
pub use value::{ResultMode, Value};
