// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! The lowering engine.
//!
//! A [`Compiler`] walks the syntax tree once, in evaluation order, and
//! appends instructions to a single shared buffer. Each expression lowers to
//! a compile-time [`Value`] under a caller-supplied [`ResultMode`]; constant
//! folding happens in value space, and only materialization commits a value
//! to an instruction. Function bodies keep their own code streams on the
//! scope stack, which is what lets capture lifting emit `load_capture`
//! instructions into an enclosing body mid-lookup.

mod control;
mod expr;
mod lvalue;

use tracing::debug;

use tarn_syntax::{Ast, Node, NodeIndex, NodeKind, TokenIndex};

use crate::bytecode::{Bytecode, Instruction, Opcode, Operand, Primitive, Ref, UNPATCHED};
use crate::error::{CompileError, CompileFailure, Diagnostics, Result, Severity};
use crate::intern::Interner;
use crate::scope::{FunctionFrame, LoopScope, Resolved, ScopeEntry, Symbol, TryScope};
use crate::value::{ResultMode, Value};

pub(crate) use lvalue::LvalueMode;

/// A `load_global` placeholder awaiting resolution by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnresolvedGlobal {
    /// The identifier token that failed to resolve.
    pub token: TokenIndex,
    /// The placeholder instruction the host must fix up.
    pub slot: Ref,
}

/// A successful compilation: the bytecode plus the unresolved-global side
/// channel for the host's module binding table.
#[derive(Debug)]
pub struct CompileOutput {
    pub bytecode: Bytecode,
    pub unresolved: Vec<UnresolvedGlobal>,
}

/// Compiles one syntax tree into bytecode.
pub struct Compiler<'a> {
    ast: &'a Ast,

    /// The instruction buffer; an instruction's [`Ref`] is its index here.
    code: Vec<Instruction>,
    /// Side table for variable-arity operands.
    extra: Vec<u32>,
    /// String constants.
    strings: Interner,
    /// The top-level code stream.
    main: Vec<Ref>,
    /// Source byte offset per instruction, parallel to `code`.
    debug_info: Vec<u32>,

    /// Symbols and function frames, innermost last.
    scope: Vec<ScopeEntry<'a>>,
    /// The loop being lowered, if any; saved and restored around nested
    /// loops and cleared inside function bodies.
    current_loop: Option<LoopScope>,
    /// The active try scope, if any; same save/restore discipline.
    current_try: Option<TryScope>,

    diagnostics: Diagnostics,
    unresolved: Vec<UnresolvedGlobal>,
    /// Byte offset of the token being lowered, recorded per instruction.
    current_offset: u32,
}

impl<'a> Compiler<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        Self {
            ast,
            code: Vec::new(),
            extra: Vec::new(),
            strings: Interner::new(),
            main: Vec::new(),
            debug_info: Vec::new(),
            scope: Vec::new(),
            current_loop: None,
            current_try: None,
            diagnostics: Diagnostics::new(),
            unresolved: Vec::new(),
            current_offset: 0,
        }
    }

    /// Run the compilation. On failure the accumulated diagnostics are
    /// returned; on success, the bytecode and the unresolved-global list.
    pub fn compile(mut self) -> std::result::Result<CompileOutput, CompileFailure> {
        match self.run() {
            Ok(()) => Ok(CompileOutput {
                bytecode: Bytecode {
                    code: self.code,
                    extra: self.extra,
                    strings: self.strings.into_pool(),
                    main: self.main,
                    debug_info: self.debug_info,
                },
                unresolved: self.unresolved,
            }),
            Err(CompileError) => Err(CompileFailure {
                diagnostics: self.diagnostics.into_entries(),
            }),
        }
    }

    fn run(&mut self) -> Result<()> {
        debug!(roots = self.ast.roots().len(), "compiling module");
        for &root in self.ast.roots() {
            // Statements are fine at the top level; constants still
            // materialize and leftover runtime values get discarded.
            let value = self.gen_node(root, ResultMode::Discard)?;
            self.wrap_result(value, ResultMode::Discard)?;
        }
        self.emit(Opcode::RetNull, Operand::None);
        debug!(
            instructions = self.code.len(),
            stream = self.main.len(),
            "module compiled"
        );
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Record a diagnostic at `token` and return the abort marker.
    pub(crate) fn fail(&mut self, message: impl Into<String>, token: TokenIndex) -> CompileError {
        self.diagnostics
            .add(message, self.ast.token_offset(token), Severity::Error);
        CompileError
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// The code stream of the innermost function frame, or `main`.
    fn stream_mut(&mut self) -> &mut Vec<Ref> {
        for entry in self.scope.iter_mut().rev() {
            if let ScopeEntry::Frame(frame) = entry {
                return &mut frame.stream;
            }
        }
        &mut self.main
    }

    /// Current length of the active code stream; the offset the next emitted
    /// instruction will occupy.
    pub(crate) fn stream_len(&self) -> u32 {
        for entry in self.scope.iter().rev() {
            if let ScopeEntry::Frame(frame) = entry {
                return frame.stream.len() as u32;
            }
        }
        self.main.len() as u32
    }

    /// Append an instruction to the buffer and the active code stream.
    pub(crate) fn emit(&mut self, op: Opcode, data: Operand) -> Ref {
        let r = Ref(self.code.len() as u32);
        self.code.push(Instruction { op, data });
        self.debug_info.push(self.current_offset);
        self.stream_mut().push(r);
        r
    }

    pub(crate) fn emit_un(&mut self, op: Opcode, operand: Ref) -> Ref {
        self.emit(op, Operand::Un(operand))
    }

    pub(crate) fn emit_bin(&mut self, op: Opcode, a: Ref, b: Ref) -> Ref {
        self.emit(op, Operand::Bin(a, b))
    }

    /// Copy `refs` into the extra buffer, then emit the variable-arity
    /// instruction referencing the new slice.
    pub(crate) fn emit_extra(&mut self, op: Opcode, refs: &[Ref]) -> Ref {
        let start = self.extra.len() as u32;
        self.extra.extend(refs.iter().map(|r| r.0));
        self.emit(
            op,
            Operand::Extra {
                start,
                len: refs.len() as u32,
            },
        )
    }

    /// Like [`emit_extra`](Self::emit_extra) but for raw words
    /// (`build_func` payloads mix an info word with stream refs).
    pub(crate) fn emit_extra_words(&mut self, op: Opcode, words: &[u32]) -> Ref {
        let start = self.extra.len() as u32;
        self.extra.extend_from_slice(words);
        self.emit(
            op,
            Operand::Extra {
                start,
                len: words.len() as u32,
            },
        )
    }

    /// Write the current stream length into a pending jump's offset.
    pub(crate) fn finalize_jump(&mut self, jump: Ref) {
        let offset = self.stream_len();
        match &mut self.code[jump.index()].data {
            Operand::Jump { offset: slot } | Operand::JumpCond { offset: slot, .. } => {
                *slot = offset;
            }
            other => debug_assert!(false, "finalize_jump called on non-jump: {:?}", other),
        }
    }

    /// Emit an instruction that may fault at runtime, wiring its result into
    /// the active try scope when there is one.
    pub(crate) fn emit_fallible(&mut self, op: Opcode, data: Operand) -> Ref {
        debug_assert!(op.is_fallible());
        let result = self.emit(op, data);
        if let Some(err_slot) = self.current_try.as_ref().map(|t| t.err_slot) {
            self.emit(Opcode::Move, Operand::Bin(err_slot, result));
            let jump = self.emit(
                Opcode::JumpIfError,
                Operand::JumpCond {
                    cond: result,
                    offset: UNPATCHED,
                },
            );
            if let Some(scope) = self.current_try.as_mut() {
                scope.error_jumps.push(jump);
            }
        }
        result
    }

    // =========================================================================
    // Scope & resolution
    // =========================================================================

    pub(crate) fn push_symbol(&mut self, name: &'a str, slot: Ref, mutable: bool, constant: Value) {
        self.scope.push(ScopeEntry::Symbol(Symbol {
            name,
            slot,
            mutable,
            constant,
        }));
    }

    /// Error if `name` is already bound in the current flat scope (up to the
    /// nearest function frame).
    pub(crate) fn check_redeclaration(&mut self, name: &str, token: TokenIndex) -> Result<()> {
        for entry in self.scope.iter().rev() {
            match entry {
                ScopeEntry::Frame(_) => break,
                ScopeEntry::Symbol(sym) if sym.name == name => {
                    return Err(self.fail(format!("redeclaration of `{name}`"), token));
                }
                ScopeEntry::Symbol(_) => {}
            }
        }
        Ok(())
    }

    /// The known constant of an immutable binding in the current function,
    /// if any. Stops at function frames so capture lifting stays observable.
    pub(crate) fn local_constant(&self, name: &str) -> Option<Value> {
        for entry in self.scope.iter().rev() {
            match entry {
                ScopeEntry::Frame(_) => return None,
                ScopeEntry::Symbol(sym) if sym.name == name => {
                    if !sym.mutable && sym.constant.is_constant() {
                        return Some(sym.constant.clone());
                    }
                    return None;
                }
                ScopeEntry::Symbol(_) => {}
            }
        }
        None
    }

    /// Resolve `name`, lifting captures through any function frames crossed
    /// and falling back to a `load_global` placeholder.
    pub(crate) fn resolve(&mut self, name: &'a str, token: TokenIndex) -> Resolved {
        self.resolve_from(name, self.scope.len(), token)
    }

    fn resolve_from(&mut self, name: &'a str, from: usize, token: TokenIndex) -> Resolved {
        let mut i = from;
        while i > 0 {
            i -= 1;
            match &self.scope[i] {
                ScopeEntry::Symbol(sym) if sym.name == name => {
                    return Resolved {
                        slot: sym.slot,
                        mutable: sym.mutable,
                        global: false,
                    };
                }
                ScopeEntry::Symbol(_) => {}
                ScopeEntry::Frame(_) => return self.capture_into_frame(name, i, token),
            }
        }

        // Nothing on the stack: defer to the host.
        let slot = self.emit(Opcode::LoadGlobal, Operand::None);
        self.unresolved.push(UnresolvedGlobal { token, slot });
        Resolved {
            slot,
            mutable: false,
            global: true,
        }
    }

    /// Resolve `name` through the frame at `frame_idx`, creating a capture
    /// on first use. Globals pass through uncaptured.
    fn capture_into_frame(&mut self, name: &'a str, frame_idx: usize, token: TokenIndex) -> Resolved {
        if let ScopeEntry::Frame(frame) = &self.scope[frame_idx] {
            if let Some(capture) = frame.captures.iter().find(|c| c.name == name) {
                return Resolved {
                    slot: capture.local,
                    mutable: capture.mutable,
                    global: false,
                };
            }
        }

        let outer = self.resolve_from(name, frame_idx, token);
        if outer.global {
            return outer;
        }

        // New capture: the load_capture belongs to the frame's own body, not
        // to whatever stream is innermost right now.
        let ordinal = match &self.scope[frame_idx] {
            ScopeEntry::Frame(frame) => frame.captures.len() as i64,
            ScopeEntry::Symbol(_) => unreachable!("capture target must be a frame"),
        };
        let local = Ref(self.code.len() as u32);
        self.code.push(Instruction {
            op: Opcode::LoadCapture,
            data: Operand::Int(ordinal),
        });
        self.debug_info.push(self.current_offset);
        if let ScopeEntry::Frame(frame) = &mut self.scope[frame_idx] {
            frame.stream.push(local);
            frame.captures.push(crate::scope::Capture {
                name,
                parent: outer.slot,
                local,
                mutable: outer.mutable,
            });
        }
        Resolved {
            slot: local,
            mutable: outer.mutable,
            global: false,
        }
    }

    /// Pop the frame pushed at `frame_idx` together with every symbol above
    /// it, returning the frame.
    pub(crate) fn pop_frame(&mut self, frame_idx: usize) -> FunctionFrame<'a> {
        let mut drained = self.scope.drain(frame_idx..);
        match drained.next() {
            Some(ScopeEntry::Frame(frame)) => frame,
            _ => unreachable!("scope stack lost its function frame"),
        }
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Emit whatever is needed for `value` to exist at runtime as one ref.
    pub(crate) fn materialize(&mut self, value: &Value) -> Ref {
        match value {
            Value::Empty => unreachable!("cannot materialize an empty value"),
            Value::Ref(r) | Value::Mut(r) => *r,
            Value::Null => self.emit(Opcode::Primitive, Operand::Primitive(Primitive::Null)),
            Value::Bool(true) => self.emit(Opcode::Primitive, Operand::Primitive(Primitive::True)),
            Value::Bool(false) => {
                self.emit(Opcode::Primitive, Operand::Primitive(Primitive::False))
            }
            Value::Int(v) => self.emit(Opcode::Int, Operand::Int(*v)),
            Value::Num(v) => self.emit(Opcode::Num, Operand::Num(*v)),
            Value::Str(bytes) => {
                let offset = self.strings.intern(bytes);
                self.emit(
                    Opcode::Str,
                    Operand::Str {
                        offset,
                        len: bytes.len() as u32,
                    },
                )
            }
        }
    }

    /// Apply the caller's [`ResultMode`] to a lowered value.
    ///
    /// `Empty` is trapped here for every mode that needs a value. In discard
    /// position constants still materialize, and runtime values get an
    /// explicit `discard`.
    pub(crate) fn wrap_result(&mut self, value: Value, mode: ResultMode) -> Result<Value> {
        match mode {
            ResultMode::Value => {
                if value.is_empty() {
                    return Err(self.expected_value());
                }
                Ok(value)
            }
            ResultMode::Discard => {
                match &value {
                    Value::Empty => {}
                    Value::Ref(r) | Value::Mut(r) => {
                        let r = *r;
                        self.emit_un(Opcode::Discard, r);
                    }
                    _ => {
                        self.materialize(&value);
                    }
                }
                Ok(Value::Empty)
            }
            ResultMode::Ref(target) => {
                if value.is_empty() {
                    return Err(self.expected_value());
                }
                let source = self.materialize(&value);
                if source != target {
                    if matches!(value, Value::Mut(_)) {
                        self.emit_bin(Opcode::Copy, target, source);
                    } else {
                        self.emit_bin(Opcode::Move, target, source);
                    }
                }
                Ok(Value::Ref(target))
            }
        }
    }

    fn expected_value(&mut self) -> CompileError {
        self.diagnostics
            .add("expected a value", self.current_offset, Severity::Error);
        CompileError
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Lower one expression under `mode`, wrapping the result.
    pub(crate) fn gen_expr(&mut self, idx: NodeIndex, mode: ResultMode) -> Result<Value> {
        let value = self.gen_node(idx, mode)?;
        self.wrap_result(value, mode)
    }

    /// Lower one expression without the final wrap. Constructs that handle
    /// `mode` internally (control flow, collections) have already honoured
    /// it in their return value.
    pub(crate) fn gen_node(&mut self, idx: NodeIndex, mode: ResultMode) -> Result<Value> {
        let node = *self.ast.node(idx);
        self.current_offset = self.ast.token_offset(node.token);
        match node.kind {
            NodeKind::Int => self.int_literal(&node),
            NodeKind::Num => self.num_literal(&node),
            NodeKind::Str => self.str_literal(&node),
            NodeKind::True => Ok(Value::Bool(true)),
            NodeKind::False => Ok(Value::Bool(false)),
            NodeKind::Null => Ok(Value::Null),
            NodeKind::Ident => self.gen_ident(&node),
            NodeKind::MutIdent => {
                Err(self.fail("`mut` binding cannot be used as a value", node.token))
            }
            NodeKind::Discard => Err(self.fail("`_` cannot be used as a value", node.token)),

            NodeKind::BoolNot | NodeKind::BitNot | NodeKind::Negate => self.gen_unary(&node),

            NodeKind::Return => self.gen_return(&node),
            NodeKind::Break => self.gen_break(&node),
            NodeKind::Continue => self.gen_continue(&node),

            NodeKind::Error => self.gen_error_value(&node),
            NodeKind::Import => self.gen_import(&node),
            NodeKind::Throw => Err(self.fail("unsupported expression", node.token)),

            NodeKind::Paren => {
                let inner = self.expect_un(&node)?;
                self.gen_node(inner, mode)
            }
            NodeKind::MemberAccess => self.gen_member_access(&node),
            NodeKind::ArrayAccess => self.gen_array_access(&node),

            NodeKind::Add
            | NodeKind::Sub
            | NodeKind::Mul
            | NodeKind::Div
            | NodeKind::DivFloor
            | NodeKind::Mod
            | NodeKind::Pow
            | NodeKind::BitAnd
            | NodeKind::BitOr
            | NodeKind::BitXor
            | NodeKind::Shl
            | NodeKind::Shr
            | NodeKind::Eq
            | NodeKind::Neq
            | NodeKind::Lt
            | NodeKind::Gt
            | NodeKind::Lte
            | NodeKind::Gte => self.gen_binary_op(&node),

            NodeKind::As => self.gen_cast(&node),
            NodeKind::Is => self.gen_type_query(&node),

            NodeKind::Assign => self.gen_assign(&node, mode),
            NodeKind::AddAssign
            | NodeKind::SubAssign
            | NodeKind::MulAssign
            | NodeKind::DivAssign
            | NodeKind::DivFloorAssign
            | NodeKind::ModAssign
            | NodeKind::PowAssign
            | NodeKind::BitAndAssign
            | NodeKind::BitOrAssign
            | NodeKind::BitXorAssign
            | NodeKind::ShlAssign
            | NodeKind::ShrAssign => self.gen_aug_assign(&node, mode),
            NodeKind::Decl => self.gen_decl(&node),

            NodeKind::Block => self.gen_block(&node),
            NodeKind::Tuple | NodeKind::List => self.gen_sequence(&node, mode),
            NodeKind::Map => self.gen_map(&node, mode),
            NodeKind::Call => self.gen_call(&node),
            NodeKind::Fn => self.gen_fn(&node),
            NodeKind::For => self.gen_for(&node, mode),
            NodeKind::While => self.gen_while(&node, mode),
            NodeKind::If => self.gen_if(&node, mode),
            NodeKind::Match => self.gen_match(&node, mode),

            NodeKind::MatchCase | NodeKind::MatchCaseLet | NodeKind::MatchElse => {
                Err(self.fail("match arm outside of a match", node.token))
            }
            NodeKind::MapItem => Err(self.fail("map entry outside of a map literal", node.token)),
        }
    }

    fn gen_ident(&mut self, node: &Node) -> Result<Value> {
        let name = self.ast.token_slice(node.token);
        let resolved = self.resolve(name, node.token);
        if resolved.mutable {
            Ok(Value::Mut(resolved.slot))
        } else {
            Ok(Value::Ref(resolved.slot))
        }
    }

    // =========================================================================
    // Literals
    // =========================================================================

    fn int_literal(&mut self, node: &Node) -> Result<Value> {
        let text = self.ast.token_slice(node.token);
        match text.parse::<i64>() {
            Ok(v) => Ok(Value::Int(v)),
            Err(_) => Err(self.fail("integer literal out of range", node.token)),
        }
    }

    fn num_literal(&mut self, node: &Node) -> Result<Value> {
        let text = self.ast.token_slice(node.token);
        match text.parse::<f64>() {
            Ok(v) => Ok(Value::Num(v)),
            Err(_) => Err(self.fail("invalid number literal", node.token)),
        }
    }

    /// Strip the quotes the lexer left in place and decode escape sequences.
    fn str_literal(&mut self, node: &Node) -> Result<Value> {
        let text = self.ast.token_slice(node.token);
        debug_assert!(text.len() >= 2, "string token must include its quotes");
        let body = &text.as_bytes()[1..text.len() - 1];

        let mut bytes = Vec::with_capacity(body.len());
        let mut iter = body.iter().copied();
        while let Some(b) = iter.next() {
            if b != b'\\' {
                bytes.push(b);
                continue;
            }
            match iter.next() {
                Some(b'\\') => bytes.push(b'\\'),
                Some(b'n') => bytes.push(b'\n'),
                Some(b'r') => bytes.push(b'\r'),
                Some(b't') => bytes.push(b'\t'),
                Some(b'\'') => bytes.push(b'\''),
                Some(b'"') => bytes.push(b'"'),
                // Hex and unicode escapes are reserved.
                _ => return Err(self.fail("unsupported escape sequence", node.token)),
            }
        }
        Ok(Value::Str(bytes.into()))
    }

    // =========================================================================
    // Node helpers
    // =========================================================================

    pub(crate) fn expect_un(&mut self, node: &Node) -> Result<NodeIndex> {
        match node.un() {
            Some(n) => Ok(n),
            None => Err(self.fail("malformed syntax tree", node.token)),
        }
    }

    pub(crate) fn expect_bin(&mut self, node: &Node) -> Result<(NodeIndex, NodeIndex)> {
        match node.bin() {
            Some(pair) => Ok(pair),
            None => Err(self.fail("malformed syntax tree", node.token)),
        }
    }

    pub(crate) fn expect_ty_bin(&mut self, node: &Node) -> Result<(NodeIndex, TokenIndex)> {
        match node.ty_bin() {
            Some(pair) => Ok(pair),
            None => Err(self.fail("malformed syntax tree", node.token)),
        }
    }

    /// The children of a compound node, copied out to release the AST borrow.
    pub(crate) fn node_children(&self, node: &Node) -> Vec<NodeIndex> {
        self.ast.children(node).to_vec()
    }

    #[cfg(test)]
    pub(crate) fn enter_try_scope_for_test(&mut self, err_slot: Ref) {
        self.current_try = Some(TryScope {
            err_slot,
            error_jumps: Vec::new(),
        });
    }

    #[cfg(test)]
    pub(crate) fn try_scope_jumps_for_test(&self) -> &[Ref] {
        match &self.current_try {
            Some(scope) => &scope.error_jumps,
            None => &[],
        }
    }
}
