// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! Scope bookkeeping: symbol bindings, function frames, loops and try
//! scopes.
//!
//! The scope stack interleaves [`Symbol`] bindings with [`FunctionFrame`]
//! markers. Name lookup walks the stack top-down and lifts captures through
//! any frames it crosses; the frame also owns its function's code stream, so
//! a `load_capture` created mid-lookup can land inside the right body.

use crate::bytecode::Ref;
use crate::value::Value;

/// A named binding on the scope stack.
///
/// `slot` aliases the instruction that first produced the bound value (for
/// parameters, the placeholder reserving their slot). `constant` keeps the
/// initializer's value for immutable bindings when it was known at compile
/// time.
#[derive(Clone, Debug)]
pub struct Symbol<'a> {
    pub name: &'a str,
    pub slot: Ref,
    pub mutable: bool,
    pub constant: Value,
}

/// One lifted binding in a function's environment.
///
/// `local` is the `load_capture` instruction inside the function; its
/// integer operand is this capture's ordinal. `parent` is the binding's slot
/// in the enclosing scope chain, resolved at first use.
#[derive(Clone, Debug)]
pub struct Capture<'a> {
    pub name: &'a str,
    pub parent: Ref,
    pub local: Ref,
    pub mutable: bool,
}

/// A function boundary on the scope stack: the body's code stream plus the
/// captures lifted into it so far.
#[derive(Debug, Default)]
pub struct FunctionFrame<'a> {
    pub stream: Vec<Ref>,
    pub captures: Vec<Capture<'a>>,
}

/// One entry of the scope stack.
#[derive(Debug)]
pub enum ScopeEntry<'a> {
    Symbol(Symbol<'a>),
    Frame(FunctionFrame<'a>),
}

/// Result of a name lookup.
#[derive(Clone, Copy, Debug)]
pub struct Resolved {
    pub slot: Ref,
    pub mutable: bool,
    /// Set when the name fell through to a `load_global` placeholder.
    pub global: bool,
}

/// The innermost loop being lowered; `break` jumps collect here until the
/// loop's end offset is known.
#[derive(Debug)]
pub struct LoopScope {
    /// Code-stream offset of the loop's first instruction.
    pub start_offset: u32,
    pub break_jumps: Vec<Ref>,
}

/// The innermost try scope. Fallible results are copied into `err_slot` and
/// tested with `jump_if_error`; the jumps collect here until the handler's
/// offset is known.
#[derive(Debug)]
pub struct TryScope {
    pub err_slot: Ref,
    pub error_jumps: Vec<Ref>,
}
