// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! Control-flow lowering: blocks, `if`, `match`, loops and function
//! literals.
//!
//! Forward jumps are emitted with an unpatched offset and finalized once
//! their target's stream position is known. `if`, `match` and the loops are
//! also expressions: when the caller wants a value, branches merge through a
//! reserved `nop` slot, and loops collect per-iteration results into a list.

use tracing::trace;

use tarn_syntax::{Node, NodeKind};

use crate::bytecode::{pack_func_info, Opcode, Operand, Ref, MAX_PARAMS, UNPATCHED};
use crate::error::Result;
use crate::scope::{FunctionFrame, LoopScope, ScopeEntry};
use crate::value::{ResultMode, Value};

use super::{Compiler, LvalueMode};

/// The value a finished loop yields: its collection, or nothing.
fn loop_result(collection: Option<Ref>) -> Value {
    match collection {
        Some(r) => Value::Ref(r),
        None => Value::Empty,
    }
}

impl<'a> Compiler<'a> {
    // =========================================================================
    // Blocks & statements
    // =========================================================================

    /// A block is statements only; it never yields a value.
    pub(crate) fn gen_block(&mut self, node: &Node) -> Result<Value> {
        let children = self.node_children(node);
        let saved = self.scope.len();
        for &child in &children {
            self.gen_expr(child, ResultMode::Discard)?;
        }
        self.scope.truncate(saved);
        Ok(Value::Empty)
    }

    pub(crate) fn gen_return(&mut self, node: &Node) -> Result<Value> {
        match node.un() {
            Some(operand) => {
                let value = self.gen_expr(operand, ResultMode::Value)?;
                let r = self.materialize(&value);
                self.emit_un(Opcode::Ret, r);
            }
            None => {
                self.emit(Opcode::RetNull, Operand::None);
            }
        }
        Ok(Value::Empty)
    }

    pub(crate) fn gen_break(&mut self, node: &Node) -> Result<Value> {
        if self.current_loop.is_none() {
            return Err(self.fail("break outside of a loop", node.token));
        }
        let jump = self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED });
        if let Some(scope) = self.current_loop.as_mut() {
            scope.break_jumps.push(jump);
        }
        Ok(Value::Empty)
    }

    pub(crate) fn gen_continue(&mut self, node: &Node) -> Result<Value> {
        let start = match self.current_loop.as_ref() {
            Some(scope) => scope.start_offset,
            None => return Err(self.fail("continue outside of a loop", node.token)),
        };
        self.emit(Opcode::Jump, Operand::Jump { offset: start });
        Ok(Value::Empty)
    }

    // =========================================================================
    // If
    // =========================================================================

    pub(crate) fn gen_if(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        let children = self.node_children(node);
        let (&cond, &then, else_branch) = match children.as_slice() {
            [cond, then] => (cond, then, None),
            [cond, then, other] => (cond, then, Some(*other)),
            _ => return Err(self.fail("malformed syntax tree", node.token)),
        };

        let cond_value = self.gen_expr(cond, ResultMode::Value)?;
        match self.const_condition(&cond_value, node)? {
            // A constant condition lowers only the live branch.
            Some(true) => return self.gen_expr(then, mode),
            Some(false) => {
                return match else_branch {
                    Some(other) => self.gen_expr(other, mode),
                    None => Ok(match mode {
                        ResultMode::Discard => Value::Empty,
                        _ => Value::Null,
                    }),
                };
            }
            None => {}
        }

        let cond_ref = self.materialize(&cond_value);
        let (slot, branch_mode) = self.reserve_merge_slot(mode);

        let guard = self.emit(
            Opcode::JumpIfFalse,
            Operand::JumpCond {
                cond: cond_ref,
                offset: UNPATCHED,
            },
        );
        self.gen_expr(then, branch_mode)?;
        let skip_else = self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED });
        self.finalize_jump(guard);

        match else_branch {
            Some(other) => {
                self.gen_expr(other, branch_mode)?;
            }
            None => {
                // The missing branch still has to fill the merge slot.
                if slot.is_some() {
                    self.wrap_result(Value::Null, branch_mode)?;
                }
            }
        }
        self.finalize_jump(skip_else);

        Ok(match slot {
            Some(s) => Value::Ref(s),
            None => Value::Empty,
        })
    }

    /// Branch-merging scheme shared by `if` and `match`: in value position a
    /// `nop` is reserved up front and both branches materialize into it.
    fn reserve_merge_slot(&mut self, mode: ResultMode) -> (Option<Ref>, ResultMode) {
        match mode {
            ResultMode::Discard => (None, ResultMode::Discard),
            ResultMode::Value => {
                let slot = self.emit(Opcode::Nop, Operand::None);
                (Some(slot), ResultMode::Ref(slot))
            }
            ResultMode::Ref(target) => (Some(target), ResultMode::Ref(target)),
        }
    }

    fn const_condition(&mut self, value: &Value, node: &Node) -> Result<Option<bool>> {
        match value {
            Value::Bool(b) => Ok(Some(*b)),
            v if v.is_runtime() => Ok(None),
            _ => Err(self.fail("expected a boolean", node.token)),
        }
    }

    // =========================================================================
    // Match
    // =========================================================================

    pub(crate) fn gen_match(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        let children = self.node_children(node);
        let (&subject_node, arms) = match children.split_first() {
            Some(split) => split,
            None => return Err(self.fail("malformed syntax tree", node.token)),
        };

        let subject_value = self.gen_expr(subject_node, ResultMode::Value)?;
        let subject = self.materialize(&subject_value);
        let (slot, arm_mode) = self.reserve_merge_slot(mode);

        let mut end_jumps = Vec::new();
        let mut seen_catch_all = false;

        for (i, &arm_idx) in arms.iter().enumerate() {
            let arm = *self.ast.node(arm_idx);
            if seen_catch_all {
                return Err(self.fail("additional cases after the catch-all case", arm.token));
            }
            let last = i == arms.len() - 1;
            let arm_children = self.node_children(&arm);

            match arm.kind {
                NodeKind::MatchElse => {
                    seen_catch_all = true;
                    let &[body] = arm_children.as_slice() else {
                        return Err(self.fail("malformed syntax tree", arm.token));
                    };
                    self.gen_expr(body, arm_mode)?;
                    if !last {
                        end_jumps.push(self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED }));
                    }
                }
                NodeKind::MatchCaseLet => {
                    seen_catch_all = true;
                    let &[pattern, body] = arm_children.as_slice() else {
                        return Err(self.fail("malformed syntax tree", arm.token));
                    };
                    let saved = self.scope.len();
                    self.lvalue(pattern, LvalueMode::Let(Value::Ref(subject)))?;
                    self.gen_expr(body, arm_mode)?;
                    self.scope.truncate(saved);
                    if !last {
                        end_jumps.push(self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED }));
                    }
                }
                NodeKind::MatchCase => {
                    let (&body, candidates) = match arm_children.split_last() {
                        Some(split) if !split.1.is_empty() => split,
                        _ => return Err(self.fail("malformed syntax tree", arm.token)),
                    };
                    // With a null fallback pending, even the last arm's body
                    // must jump past it.
                    let needs_end_jump = !last || slot.is_some();

                    if let [candidate] = candidates {
                        let value = self.gen_expr(*candidate, ResultMode::Value)?;
                        let c = self.materialize(&value);
                        let test = self.emit_bin(Opcode::Eq, subject, c);
                        let skip = self.emit(
                            Opcode::JumpIfFalse,
                            Operand::JumpCond {
                                cond: test,
                                offset: UNPATCHED,
                            },
                        );
                        self.gen_expr(body, arm_mode)?;
                        if needs_end_jump {
                            end_jumps
                                .push(self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED }));
                        }
                        self.finalize_jump(skip);
                    } else {
                        let mut body_jumps = Vec::with_capacity(candidates.len());
                        for &candidate in candidates {
                            let value = self.gen_expr(candidate, ResultMode::Value)?;
                            let c = self.materialize(&value);
                            let test = self.emit_bin(Opcode::Eq, subject, c);
                            body_jumps.push(self.emit(
                                Opcode::JumpIfTrue,
                                Operand::JumpCond {
                                    cond: test,
                                    offset: UNPATCHED,
                                },
                            ));
                        }
                        // No candidate matched: fall through to the next arm.
                        let skip = self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED });
                        for jump in body_jumps {
                            self.finalize_jump(jump);
                        }
                        self.gen_expr(body, arm_mode)?;
                        if needs_end_jump {
                            end_jumps
                                .push(self.emit(Opcode::Jump, Operand::Jump { offset: UNPATCHED }));
                        }
                        self.finalize_jump(skip);
                    }
                }
                _ => return Err(self.fail("malformed syntax tree", arm.token)),
            }
        }

        if !seen_catch_all && slot.is_some() {
            self.wrap_result(Value::Null, arm_mode)?;
        }
        for jump in end_jumps {
            self.finalize_jump(jump);
        }

        Ok(match slot {
            Some(s) => Value::Ref(s),
            None => Value::Empty,
        })
    }

    // =========================================================================
    // Loops
    // =========================================================================

    pub(crate) fn gen_for(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        let children = self.node_children(node);
        let (pattern, iterable, body) = match children.as_slice() {
            &[iterable, body] => (None, iterable, body),
            &[pattern, iterable, body] => (Some(pattern), iterable, body),
            _ => return Err(self.fail("malformed syntax tree", node.token)),
        };

        let collection = self.begin_loop_collection(mode);

        let iter_value = self.gen_expr(iterable, ResultMode::Value)?;
        // Constant strings iterate at runtime; no other constant iterates.
        if iter_value.is_constant() && !matches!(iter_value, Value::Str(_)) {
            return Err(self.fail("expected an iterable", node.token));
        }
        let source = self.materialize(&iter_value);
        let iter = self.emit_fallible(Opcode::IterInit, Operand::Un(source));

        let start = self.stream_len();
        let saved_loop = self.current_loop.replace(LoopScope {
            start_offset: start,
            break_jumps: Vec::new(),
        });

        // iter_next's own ref is the element; its jump leaves the loop.
        let element = self.emit(
            Opcode::IterNext,
            Operand::JumpCond {
                cond: iter,
                offset: UNPATCHED,
            },
        );
        let saved_scope = self.scope.len();
        if let Some(pattern) = pattern {
            self.lvalue(pattern, LvalueMode::Let(Value::Ref(element)))?;
        }
        self.lower_loop_body(body, collection)?;
        self.scope.truncate(saved_scope);

        self.emit(Opcode::Jump, Operand::Jump { offset: start });
        self.finalize_jump(element);
        self.end_loop(saved_loop);

        Ok(loop_result(collection))
    }

    pub(crate) fn gen_while(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        let children = self.node_children(node);
        let (pattern, cond, body) = match children.as_slice() {
            &[cond, body] => (None, cond, body),
            &[pattern, cond, body] => (Some(pattern), cond, body),
            _ => return Err(self.fail("malformed syntax tree", node.token)),
        };

        let collection = self.begin_loop_collection(mode);

        // The condition re-evaluates every iteration, so the loop starts
        // before it.
        let start = self.stream_len();
        let saved_loop = self.current_loop.replace(LoopScope {
            start_offset: start,
            break_jumps: Vec::new(),
        });

        let cond_value = self.gen_expr(cond, ResultMode::Value)?;
        let mut exit = None;
        let mut bind_source = None;
        match pattern {
            None => match self.const_condition(&cond_value, node)? {
                // `while (true)` runs unconditionally; only `break` leaves.
                Some(true) => {}
                Some(false) => {
                    self.current_loop = saved_loop;
                    return Ok(loop_result(collection));
                }
                None => {
                    let c = self.materialize(&cond_value);
                    exit = Some(self.emit(
                        Opcode::JumpIfFalse,
                        Operand::JumpCond {
                            cond: c,
                            offset: UNPATCHED,
                        },
                    ));
                }
            },
            Some(_) => {
                // "while let": run while the condition is non-null.
                if matches!(cond_value, Value::Null) {
                    self.current_loop = saved_loop;
                    return Ok(loop_result(collection));
                }
                let c = self.materialize(&cond_value);
                if cond_value.is_runtime() {
                    exit = Some(self.emit(
                        Opcode::JumpIfNull,
                        Operand::JumpCond {
                            cond: c,
                            offset: UNPATCHED,
                        },
                    ));
                }
                bind_source = Some(c);
            }
        }

        let saved_scope = self.scope.len();
        if let (Some(pattern), Some(source)) = (pattern, bind_source) {
            self.lvalue(pattern, LvalueMode::Let(Value::Ref(source)))?;
        }
        self.lower_loop_body(body, collection)?;
        self.scope.truncate(saved_scope);

        self.emit(Opcode::Jump, Operand::Jump { offset: start });
        if let Some(jump) = exit {
            self.finalize_jump(jump);
        }
        self.end_loop(saved_loop);

        Ok(loop_result(collection))
    }

    /// When the loop is an expression, results collect into a list emitted
    /// ahead of the loop (moved into the caller's slot when it has one).
    fn begin_loop_collection(&mut self, mode: ResultMode) -> Option<Ref> {
        match mode {
            ResultMode::Discard => None,
            ResultMode::Value => Some(self.emit_extra(Opcode::BuildList, &[])),
            ResultMode::Ref(target) => {
                let list = self.emit_extra(Opcode::BuildList, &[]);
                self.emit_bin(Opcode::Move, target, list);
                Some(target)
            }
        }
    }

    fn lower_loop_body(&mut self, body: tarn_syntax::NodeIndex, collection: Option<Ref>) -> Result<()> {
        match collection {
            None => {
                self.gen_expr(body, ResultMode::Discard)?;
            }
            Some(list) => {
                let value = self.gen_expr(body, ResultMode::Value)?;
                let r = self.materialize(&value);
                self.emit_bin(Opcode::Append, list, r);
            }
        }
        Ok(())
    }

    /// Restore the outer loop and land all breaks on the current offset.
    fn end_loop(&mut self, saved: Option<LoopScope>) {
        if let Some(scope) = std::mem::replace(&mut self.current_loop, saved) {
            for jump in scope.break_jumps {
                self.finalize_jump(jump);
            }
        }
    }

    // =========================================================================
    // Functions
    // =========================================================================

    pub(crate) fn gen_fn(&mut self, node: &Node) -> Result<Value> {
        let children = self.node_children(node);
        let (&body, params) = match children.split_last() {
            Some(split) => split,
            None => return Err(self.fail("malformed syntax tree", node.token)),
        };
        if params.len() > MAX_PARAMS {
            return Err(self.fail("too many parameters", node.token));
        }
        trace!(params = params.len(), "lowering function body");

        // The body compiles against its own stream; loop/try scopes do not
        // leak across the function boundary.
        let saved_loop = self.current_loop.take();
        let saved_try = self.current_try.take();
        let frame_idx = self.scope.len();
        self.scope.push(ScopeEntry::Frame(FunctionFrame::default()));

        // Each parameter claims a real buffer slot at the head of the body
        // stream; the call sequence fills them in order. A fabricated ref
        // would alias whatever instruction shares its buffer index.
        for &param in params {
            let slot = self.emit(Opcode::Nop, Operand::None);
            self.lvalue(param, LvalueMode::Let(Value::Ref(slot)))?;
        }

        let body_kind = self.ast.node(body).kind;
        if body_kind == NodeKind::Block || body_kind.is_assignment() {
            // Statement bodies return explicitly; the trailing ret_null only
            // catches a fall-through.
            self.gen_expr(body, ResultMode::Discard)?;
            self.emit(Opcode::RetNull, Operand::None);
        } else {
            let value = self.gen_node(body, ResultMode::Value)?;
            match value {
                Value::Empty | Value::Null => {
                    self.emit(Opcode::RetNull, Operand::None);
                }
                _ => {
                    let r = self.materialize(&value);
                    self.emit_un(Opcode::Ret, r);
                }
            }
        }

        let frame = self.pop_frame(frame_idx);
        self.current_loop = saved_loop;
        self.current_try = saved_try;

        // Payload: one packed info word, then the body's stream.
        let mut words = Vec::with_capacity(frame.stream.len() + 1);
        words.push(pack_func_info(
            params.len() as u8,
            frame.captures.len() as u32,
        ));
        words.extend(frame.stream.iter().map(|r| r.0));
        let func = self.emit_extra_words(Opcode::BuildFunc, &words);

        for capture in &frame.captures {
            self.emit_bin(Opcode::StoreCapture, func, capture.parent);
        }
        Ok(Value::Ref(func))
    }
}
