// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! The lvalue engine: everything that can appear on the left of `let`, `=`
//! or an augmented assignment.
//!
//! Patterns are lowered by a dedicated pass rather than as expressions.
//! Identifiers bind or update symbols; `error(inner)` unwraps and recurses;
//! `_` swallows the value; parens are transparent. Composite patterns
//! (tuple, list, map, range) are reserved by the language surface.

use tarn_syntax::{Node, NodeIndex, NodeKind};

use crate::bytecode::Opcode;
use crate::error::Result;
use crate::value::{ResultMode, Value};

use super::expr::binary_opcode;
use super::Compiler;

/// What the lvalue engine is being asked to do.
pub(crate) enum LvalueMode {
    /// Bind a new symbol to the value.
    Let(Value),
    /// Store the value into an existing mutable binding.
    Assign(Value),
    /// Resolve the target slot for an augmented assignment; the caller
    /// emits the operator and writes the result back.
    Aug,
}

impl<'a> Compiler<'a> {
    /// Lower an lvalue pattern.
    ///
    /// Returns: for `Let`, the declaration's result (the bound runtime ref,
    /// or `Empty` for a constant initializer); for `Assign`, `Empty`; for
    /// `Aug`, the target slot as a `Value::Ref`.
    pub(crate) fn lvalue(&mut self, idx: NodeIndex, mode: LvalueMode) -> Result<Value> {
        let node = *self.ast.node(idx);
        match node.kind {
            NodeKind::Ident | NodeKind::MutIdent => self.lvalue_ident(&node, mode),

            NodeKind::Discard => match mode {
                // `_` swallows the value; the right side was already lowered.
                LvalueMode::Let(_) | LvalueMode::Assign(_) => Ok(Value::Empty),
                LvalueMode::Aug => Err(self.fail("invalid lvalue", node.token)),
            },

            NodeKind::Error => {
                if matches!(mode, LvalueMode::Aug) {
                    return Err(self.fail("invalid lvalue", node.token));
                }
                let inner = self.expect_un(&node)?;
                let (value, rebuild): (Value, fn(Value) -> LvalueMode) = match mode {
                    LvalueMode::Let(v) => (v, LvalueMode::Let),
                    LvalueMode::Assign(v) => (v, LvalueMode::Assign),
                    LvalueMode::Aug => unreachable!(),
                };
                let Some(source) = value.runtime_ref() else {
                    return Err(self.fail("expected an error", node.token));
                };
                let unwrapped = self.emit_un(Opcode::UnwrapError, source);
                self.lvalue(inner, rebuild(Value::Ref(unwrapped)))
            }

            NodeKind::Paren => {
                let inner = self.expect_un(&node)?;
                self.lvalue(inner, mode)
            }

            // Destructuring patterns are reserved.
            _ => Err(self.fail("invalid lvalue", node.token)),
        }
    }

    fn lvalue_ident(&mut self, node: &Node, mode: LvalueMode) -> Result<Value> {
        let name = self.ast.token_slice(node.token);
        let mutable_binding = node.kind == NodeKind::MutIdent;

        match mode {
            LvalueMode::Let(value) => {
                self.check_redeclaration(name, node.token)?;
                let was_runtime = value.is_runtime();
                let source = self.materialize(&value);
                // Copy when the new binding is mutable over a runtime value,
                // or when the source already aliases a mutable slot.
                let needs_copy = (mutable_binding && was_runtime)
                    || matches!(value, Value::Mut(_));
                let slot = if needs_copy {
                    self.emit_un(Opcode::CopyUn, source)
                } else {
                    source
                };
                let constant = if !mutable_binding && value.is_constant() {
                    value.clone()
                } else {
                    Value::Empty
                };
                self.push_symbol(name, slot, mutable_binding, constant);
                Ok(if was_runtime {
                    Value::Ref(slot)
                } else {
                    Value::Empty
                })
            }

            LvalueMode::Assign(value) => {
                if mutable_binding {
                    return Err(self.fail("invalid lvalue", node.token));
                }
                let resolved = self.resolve(name, node.token);
                if !resolved.mutable {
                    return Err(
                        self.fail(format!("cannot assign to immutable binding `{name}`"), node.token)
                    );
                }
                let source = self.materialize(&value);
                // A mut alias is copied so the slots stay independent.
                if matches!(value, Value::Mut(_)) {
                    self.emit_bin(Opcode::Copy, resolved.slot, source);
                } else {
                    self.emit_bin(Opcode::Move, resolved.slot, source);
                }
                Ok(Value::Empty)
            }

            LvalueMode::Aug => {
                if mutable_binding {
                    return Err(self.fail("invalid lvalue", node.token));
                }
                let resolved = self.resolve(name, node.token);
                if !resolved.mutable {
                    return Err(
                        self.fail(format!("cannot assign to immutable binding `{name}`"), node.token)
                    );
                }
                Ok(Value::Ref(resolved.slot))
            }
        }
    }

    // =========================================================================
    // Statements built on the engine
    // =========================================================================

    /// `let pattern = expr`.
    pub(crate) fn gen_decl(&mut self, node: &Node) -> Result<Value> {
        let (pattern, init) = self.expect_bin(node)?;
        if self.ast.node(pattern).kind == NodeKind::Discard {
            return Err(self.fail("cannot declare `_`", node.token));
        }
        let value = self.gen_expr(init, ResultMode::Value)?;
        self.lvalue(pattern, LvalueMode::Let(value))
    }

    /// `lhs = rhs`. Assignment is a statement; using it as a value is an
    /// error.
    pub(crate) fn gen_assign(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        if mode != ResultMode::Discard {
            return Err(self.fail("assignment produces no value", node.token));
        }
        let (target, rhs) = self.expect_bin(node)?;
        let value = self.gen_expr(rhs, ResultMode::Value)?;
        self.lvalue(target, LvalueMode::Assign(value))?;
        Ok(Value::Empty)
    }

    /// `lhs op= rhs`: read the target slot, apply the operator, move the
    /// result back in.
    pub(crate) fn gen_aug_assign(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        if mode != ResultMode::Discard {
            return Err(self.fail("assignment produces no value", node.token));
        }
        let (target_node, rhs) = self.expect_bin(node)?;
        let target = match self.lvalue(target_node, LvalueMode::Aug)? {
            Value::Ref(r) => r,
            _ => unreachable!("aug lvalue always yields a slot"),
        };
        let value = self.gen_expr(rhs, ResultMode::Value)?;
        let operand = self.materialize(&value);
        let result = self.emit_bin(binary_opcode(node.kind), target, operand);
        self.emit_bin(Opcode::Move, target, result);
        Ok(Value::Empty)
    }
}
