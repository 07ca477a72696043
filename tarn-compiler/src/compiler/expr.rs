// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! Expression lowering: operators, constant folding, casts, calls,
//! collections and access paths.
//!
//! Folding is a refinement of runtime evaluation: when both operands are
//! known the compiler computes the result itself, and anything the host
//! `i64` cannot represent (overflow, division by zero) falls through to a
//! runtime emission instead of folding wrongly.

use tarn_syntax::{Node, NodeIndex, NodeKind};

use crate::bytecode::{Opcode, Operand, Ref, TypeTag, MAX_PARAMS};
use crate::error::Result;
use crate::value::{ResultMode, Value};

use super::Compiler;

/// The bytecode operator for a binary (or augmented-assignment) node.
pub(crate) fn binary_opcode(kind: NodeKind) -> Opcode {
    match kind {
        NodeKind::Add | NodeKind::AddAssign => Opcode::Add,
        NodeKind::Sub | NodeKind::SubAssign => Opcode::Sub,
        NodeKind::Mul | NodeKind::MulAssign => Opcode::Mul,
        NodeKind::Div | NodeKind::DivAssign => Opcode::Div,
        NodeKind::DivFloor | NodeKind::DivFloorAssign => Opcode::DivFloor,
        NodeKind::Mod | NodeKind::ModAssign => Opcode::Mod,
        NodeKind::Pow | NodeKind::PowAssign => Opcode::Pow,
        NodeKind::BitAnd | NodeKind::BitAndAssign => Opcode::BitAnd,
        NodeKind::BitOr | NodeKind::BitOrAssign => Opcode::BitOr,
        NodeKind::BitXor | NodeKind::BitXorAssign => Opcode::BitXor,
        NodeKind::Shl | NodeKind::ShlAssign => Opcode::Shl,
        NodeKind::Shr | NodeKind::ShrAssign => Opcode::Shr,
        NodeKind::Eq => Opcode::Eq,
        NodeKind::Neq => Opcode::Neq,
        NodeKind::Lt => Opcode::Lt,
        NodeKind::Gt => Opcode::Gt,
        NodeKind::Lte => Opcode::Lte,
        NodeKind::Gte => Opcode::Gte,
        other => unreachable!("not a binary operator: {other:?}"),
    }
}

/// A numeric constant, for folding.
#[derive(Clone, Copy)]
enum Numeric {
    Int(i64),
    Num(f64),
}

impl Numeric {
    fn widen(self) -> f64 {
        match self {
            Numeric::Int(v) => v as f64,
            Numeric::Num(v) => v,
        }
    }
}

fn numeric(value: &Value) -> Option<Numeric> {
    match value {
        Value::Int(v) => Some(Numeric::Int(*v)),
        Value::Num(v) => Some(Numeric::Num(*v)),
        _ => None,
    }
}

/// Flooring division; `None` on division by zero or `i64` overflow.
fn checked_floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Flooring remainder; `None` on division by zero or `i64` overflow.
fn checked_floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn const_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x.widen() == y.widen(),
            _ => false,
        },
    }
}

impl<'a> Compiler<'a> {
    // =========================================================================
    // Unary operators
    // =========================================================================

    pub(crate) fn gen_unary(&mut self, node: &Node) -> Result<Value> {
        let operand = self.expect_un(node)?;
        let value = self.gen_expr(operand, ResultMode::Value)?;

        match node.kind {
            NodeKind::BoolNot => match value {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                v if v.is_runtime() => {
                    let r = self.materialize(&v);
                    Ok(Value::Ref(self.emit_un(Opcode::BoolNot, r)))
                }
                _ => Err(self.fail("expected a boolean", node.token)),
            },
            NodeKind::BitNot => match value {
                Value::Int(v) => Ok(Value::Int(!v)),
                v if v.is_runtime() => {
                    let r = self.materialize(&v);
                    Ok(Value::Ref(self.emit_un(Opcode::BitNot, r)))
                }
                _ => Err(self.fail("expected an integer", node.token)),
            },
            NodeKind::Negate => match value {
                // -i64::MIN overflows; leave it to the runtime.
                Value::Int(v) => match v.checked_neg() {
                    Some(negated) => Ok(Value::Int(negated)),
                    None => {
                        let r = self.materialize(&value);
                        Ok(Value::Ref(self.emit_un(Opcode::Negate, r)))
                    }
                },
                Value::Num(v) => Ok(Value::Num(-v)),
                v if v.is_runtime() => {
                    let r = self.materialize(&v);
                    Ok(Value::Ref(self.emit_un(Opcode::Negate, r)))
                }
                _ => Err(self.fail("expected a number", node.token)),
            },
            other => unreachable!("not a unary operator: {other:?}"),
        }
    }

    // =========================================================================
    // Binary operators
    // =========================================================================

    pub(crate) fn gen_binary_op(&mut self, node: &Node) -> Result<Value> {
        let (lhs_node, rhs_node) = self.expect_bin(node)?;
        let lhs = self.gen_expr(lhs_node, ResultMode::Value)?;
        let rhs = self.gen_expr(rhs_node, ResultMode::Value)?;

        if let Some(folded) = self.fold_binary(node, &lhs, &rhs)? {
            return Ok(folded);
        }

        let a = self.materialize(&lhs);
        let b = self.materialize(&rhs);
        Ok(Value::Ref(self.emit_bin(binary_opcode(node.kind), a, b)))
    }

    /// Fold a binary operator over constant operands. `Ok(None)` means
    /// "emit at runtime instead".
    fn fold_binary(&mut self, node: &Node, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
        match node.kind {
            NodeKind::Add
            | NodeKind::Sub
            | NodeKind::Mul
            | NodeKind::Div
            | NodeKind::DivFloor
            | NodeKind::Mod
            | NodeKind::Pow => Ok(fold_arithmetic(node.kind, lhs, rhs)),
            NodeKind::BitAnd | NodeKind::BitOr | NodeKind::BitXor => {
                match (lhs, rhs) {
                    (Value::Int(a), Value::Int(b)) => Ok(Some(Value::Int(match node.kind {
                        NodeKind::BitAnd => a & b,
                        NodeKind::BitOr => a | b,
                        _ => a ^ b,
                    }))),
                    _ if lhs.is_constant() && rhs.is_constant() => {
                        Err(self.fail("expected an integer", node.token))
                    }
                    _ => Ok(None),
                }
            }
            NodeKind::Shl | NodeKind::Shr => self.fold_shift(node, lhs, rhs),
            NodeKind::Eq | NodeKind::Neq => {
                if lhs.is_constant() && rhs.is_constant() {
                    let eq = const_eq(lhs, rhs);
                    Ok(Some(Value::Bool(if node.kind == NodeKind::Eq {
                        eq
                    } else {
                        !eq
                    })))
                } else {
                    Ok(None)
                }
            }
            NodeKind::Lt | NodeKind::Gt | NodeKind::Lte | NodeKind::Gte => {
                match (numeric(lhs), numeric(rhs)) {
                    (Some(a), Some(b)) => {
                        let ordered = match (a, b) {
                            (Numeric::Int(x), Numeric::Int(y)) => compare(node.kind, x, y),
                            _ => compare(node.kind, a.widen(), b.widen()),
                        };
                        Ok(Some(Value::Bool(ordered)))
                    }
                    _ if lhs.is_constant() && rhs.is_constant() => {
                        Err(self.fail("expected a number", node.token))
                    }
                    _ => Ok(None),
                }
            }
            other => unreachable!("not a binary operator: {other:?}"),
        }
    }

    fn fold_shift(&mut self, node: &Node, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
        // A known negative amount is an error even when the left side is
        // only known at runtime.
        if let Value::Int(amount) = rhs {
            if *amount < 0 {
                return Err(self.fail("shift by a negative amount", node.token));
            }
        }
        let (Value::Int(a), Value::Int(b)) = (lhs, rhs) else {
            return Ok(None);
        };
        let (a, b) = (*a, *b);
        if b >= 64 {
            // Saturate: everything shifted out.
            return Ok(Some(Value::Int(match node.kind {
                NodeKind::Shl => 0,
                _ => i64::MAX,
            })));
        }
        match node.kind {
            NodeKind::Shl => {
                let wide = (a as i128) << b;
                match i64::try_from(wide) {
                    Ok(v) => Ok(Some(Value::Int(v))),
                    Err(_) => Ok(None),
                }
            }
            // Arithmetic shift, matching the VM's sign-preserving semantics.
            _ => Ok(Some(Value::Int(a >> b))),
        }
    }

    // =========================================================================
    // Casts & type queries
    // =========================================================================

    pub(crate) fn gen_cast(&mut self, node: &Node) -> Result<Value> {
        let (operand_node, ty_token) = self.expect_ty_bin(node)?;
        let name = self.ast.token_slice(ty_token);
        let Some(tag) = TypeTag::from_name(name) else {
            return Err(self.fail(format!("unknown type name `{name}`"), ty_token));
        };
        if matches!(
            tag,
            TypeTag::Func
                | TypeTag::Err
                | TypeTag::Range
                | TypeTag::Tuple
                | TypeTag::Map
                | TypeTag::List
                | TypeTag::Tagged
        ) {
            return Err(self.fail(format!("invalid cast to `{tag}`"), ty_token));
        }

        let value = self.gen_expr(operand_node, ResultMode::Value)?;

        // Anything casts to null; a runtime operand keeps its effects but
        // its value goes unused and must be explicitly dropped.
        if tag == TypeTag::Null {
            if value.is_runtime() {
                let r = self.materialize(&value);
                self.emit_un(Opcode::Discard, r);
            }
            return Ok(Value::Null);
        }
        if value.is_runtime() {
            let r = self.materialize(&value);
            return Ok(Value::Ref(self.emit_fallible(
                Opcode::As,
                Operand::TyBin { operand: r, ty: tag },
            )));
        }
        self.fold_cast(&value, tag, node)
    }

    fn fold_cast(&mut self, value: &Value, tag: TypeTag, node: &Node) -> Result<Value> {
        let from = value
            .type_tag()
            .expect("cast operand must be a constant here");
        let invalid = |c: &mut Self| c.fail(format!("invalid cast from `{from}` to `{tag}`"), node.token);

        Ok(match tag {
            TypeTag::Int => match value {
                Value::Int(v) => Value::Int(*v),
                Value::Num(v) => Value::Int(*v as i64),
                Value::Bool(b) => Value::Int(i64::from(*b)),
                Value::Str(bytes) => match parse_str(bytes).and_then(|s| s.parse::<i64>().ok()) {
                    Some(v) => Value::Int(v),
                    None => return Err(invalid(self)),
                },
                _ => return Err(invalid(self)),
            },
            TypeTag::Num => match value {
                Value::Int(v) => Value::Num(*v as f64),
                Value::Num(v) => Value::Num(*v),
                Value::Bool(b) => Value::Num(if *b { 1.0 } else { 0.0 }),
                Value::Str(bytes) => match parse_str(bytes).and_then(|s| s.parse::<f64>().ok()) {
                    Some(v) => Value::Num(v),
                    None => return Err(invalid(self)),
                },
                _ => return Err(invalid(self)),
            },
            TypeTag::Bool => match value {
                Value::Int(v) => Value::Bool(*v != 0),
                Value::Num(v) => Value::Bool(*v != 0.0),
                Value::Bool(b) => Value::Bool(*b),
                Value::Str(bytes) => match &**bytes {
                    b"true" => Value::Bool(true),
                    b"false" => Value::Bool(false),
                    _ => return Err(invalid(self)),
                },
                _ => return Err(invalid(self)),
            },
            TypeTag::Str => match value {
                Value::Int(v) => Value::Str(v.to_string().into_bytes().into()),
                Value::Num(v) => Value::Str(v.to_string().into_bytes().into()),
                Value::Bool(b) => Value::Str(b.to_string().into_bytes().into()),
                Value::Str(bytes) => Value::Str(bytes.clone()),
                _ => return Err(invalid(self)),
            },
            _ => unreachable!("forbidden cast targets are rejected earlier"),
        })
    }

    pub(crate) fn gen_type_query(&mut self, node: &Node) -> Result<Value> {
        let (operand_node, ty_token) = self.expect_ty_bin(node)?;
        let name = self.ast.token_slice(ty_token);
        let Some(tag) = TypeTag::from_name(name) else {
            return Err(self.fail(format!("unknown type name `{name}`"), ty_token));
        };

        // An immutable binding with a known initializer answers the query
        // without touching the scope (no capture, no global placeholder).
        let operand = *self.ast.node(operand_node);
        if operand.kind == NodeKind::Ident {
            let ident = self.ast.token_slice(operand.token);
            if let Some(constant) = self.local_constant(ident) {
                return Ok(Value::Bool(constant.type_tag() == Some(tag)));
            }
        }

        let value = self.gen_expr(operand_node, ResultMode::Value)?;
        if let Some(actual) = value.type_tag() {
            return Ok(Value::Bool(actual == tag));
        }
        let r = self.materialize(&value);
        Ok(Value::Ref(self.emit(
            Opcode::Is,
            Operand::TyBin { operand: r, ty: tag },
        )))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub(crate) fn gen_call(&mut self, node: &Node) -> Result<Value> {
        let children = self.node_children(node);
        let (&callee_node, args) = match children.split_first() {
            Some(split) => split,
            None => return Err(self.fail("malformed syntax tree", node.token)),
        };

        let callee_value = self.gen_expr(callee_node, ResultMode::Value)?;
        if !callee_value.is_runtime() {
            return Err(self.fail("value is not callable", node.token));
        }
        let callee = self.materialize(&callee_value);

        if args.len() > MAX_PARAMS {
            return Err(self.fail("too many arguments", node.token));
        }

        let mut refs = Vec::with_capacity(args.len() + 1);
        refs.push(callee);
        for &arg in args {
            let value = self.gen_expr(arg, ResultMode::Value)?;
            let mut r = self.materialize(&value);
            // Never hand the callee an alias of the caller's mutable slot.
            if matches!(value, Value::Mut(_)) {
                r = self.emit_un(Opcode::CopyUn, r);
            }
            refs.push(r);
        }

        let result = match args.len() {
            0 => self.emit_fallible(Opcode::CallZero, Operand::Un(callee)),
            1 => self.emit_fallible(Opcode::CallOne, Operand::Bin(callee, refs[1])),
            _ => {
                let start = self.extra.len() as u32;
                self.extra.extend(refs.iter().map(|r| r.0));
                self.emit_fallible(
                    Opcode::Call,
                    Operand::Extra {
                        start,
                        len: refs.len() as u32,
                    },
                )
            }
        };
        Ok(Value::Ref(result))
    }

    // =========================================================================
    // Member & index access
    // =========================================================================

    pub(crate) fn gen_member_access(&mut self, node: &Node) -> Result<Value> {
        let object_node = self.expect_un(node)?;
        let object = self.gen_expr(object_node, ResultMode::Value)?;
        self.check_indexable(&object, node)?;
        let obj = self.materialize(&object);
        let name = self.ast.token_slice(node.token);
        let key = self.emit_str_constant(name.as_bytes());
        Ok(Value::Ref(self.emit_bin(Opcode::Get, obj, key)))
    }

    pub(crate) fn gen_array_access(&mut self, node: &Node) -> Result<Value> {
        let (object_node, index_node) = self.expect_bin(node)?;
        let object = self.gen_expr(object_node, ResultMode::Value)?;
        self.check_indexable(&object, node)?;
        let obj = self.materialize(&object);
        let index = self.gen_expr(index_node, ResultMode::Value)?;
        let idx = self.materialize(&index);
        Ok(Value::Ref(self.emit_bin(Opcode::Get, obj, idx)))
    }

    /// Member and index reads need a runtime object or a string constant.
    fn check_indexable(&mut self, value: &Value, node: &Node) -> Result<()> {
        match value {
            _ if value.is_runtime() => Ok(()),
            Value::Str(_) => Ok(()),
            _ => Err(self.fail("value is not indexable", node.token)),
        }
    }

    /// Intern and emit a string constant.
    pub(crate) fn emit_str_constant(&mut self, bytes: &[u8]) -> Ref {
        let offset = self.strings.intern(bytes);
        self.emit(
            Opcode::Str,
            Operand::Str {
                offset,
                len: bytes.len() as u32,
            },
        )
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub(crate) fn gen_sequence(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        let children = self.node_children(node);

        // Element side effects survive a discarded literal; the build does not.
        if mode == ResultMode::Discard {
            for &child in &children {
                self.gen_expr(child, ResultMode::Discard)?;
            }
            return Ok(Value::Empty);
        }

        let mut elements = Vec::with_capacity(children.len());
        for &child in &children {
            let value = self.gen_expr(child, ResultMode::Value)?;
            elements.push(self.materialize(&value));
        }
        let op = if node.kind == NodeKind::Tuple {
            Opcode::BuildTuple
        } else {
            Opcode::BuildList
        };
        Ok(Value::Ref(self.emit_extra(op, &elements)))
    }

    pub(crate) fn gen_map(&mut self, node: &Node, mode: ResultMode) -> Result<Value> {
        let children = self.node_children(node);

        if mode == ResultMode::Discard {
            for &child in &children {
                let entry = *self.ast.node(child);
                if entry.kind == NodeKind::MapItem {
                    let (key_node, value_node) = self.expect_bin(&entry)?;
                    if self.ast.node(key_node).kind != NodeKind::Ident {
                        self.gen_expr(key_node, ResultMode::Discard)?;
                    }
                    self.gen_expr(value_node, ResultMode::Discard)?;
                } else {
                    self.gen_expr(child, ResultMode::Discard)?;
                }
            }
            return Ok(Value::Empty);
        }

        let mut pairs = Vec::with_capacity(children.len() * 2);
        for &child in &children {
            let entry = *self.ast.node(child);
            if entry.kind == NodeKind::MapItem {
                let (key_node, value_node) = self.expect_bin(&entry)?;
                let key_entry = *self.ast.node(key_node);
                // A trailing identifier key means its *name*, not its value.
                let key = if key_entry.kind == NodeKind::Ident {
                    let name = self.ast.token_slice(key_entry.token);
                    self.emit_str_constant(name.as_bytes())
                } else {
                    let value = self.gen_expr(key_node, ResultMode::Value)?;
                    self.materialize(&value)
                };
                let value = self.gen_expr(value_node, ResultMode::Value)?;
                let value = self.materialize(&value);
                pairs.push(key);
                pairs.push(value);
            } else {
                // Shorthand entry: the value expression names its own key.
                let name = self.trailing_ident_name(child)?;
                let key = self.emit_str_constant(name.as_bytes());
                let value = self.gen_expr(child, ResultMode::Value)?;
                let value = self.materialize(&value);
                pairs.push(key);
                pairs.push(value);
            }
        }
        Ok(Value::Ref(self.emit_extra(Opcode::BuildMap, &pairs)))
    }

    fn trailing_ident_name(&mut self, idx: NodeIndex) -> Result<&'a str> {
        let node = *self.ast.node(idx);
        match node.kind {
            NodeKind::Ident | NodeKind::MemberAccess => Ok(self.ast.token_slice(node.token)),
            NodeKind::Paren => {
                let inner = self.expect_un(&node)?;
                self.trailing_ident_name(inner)
            }
            _ => Err(self.fail("map entry has no key", node.token)),
        }
    }

    // =========================================================================
    // Error values & imports
    // =========================================================================

    pub(crate) fn gen_error_value(&mut self, node: &Node) -> Result<Value> {
        let inner = self.expect_un(node)?;
        let value = self.gen_expr(inner, ResultMode::Value)?;
        let r = self.materialize(&value);
        Ok(Value::Ref(self.emit_un(Opcode::BuildError, r)))
    }

    pub(crate) fn gen_import(&mut self, node: &Node) -> Result<Value> {
        let inner = self.expect_un(node)?;
        let value = self.gen_expr(inner, ResultMode::Value)?;
        if !matches!(value, Value::Str(_)) {
            return Err(self.fail("expected a string", node.token));
        }
        let name = self.materialize(&value);
        Ok(Value::Ref(self.emit_un(Opcode::Import, name)))
    }
}

fn fold_arithmetic(kind: NodeKind, lhs: &Value, rhs: &Value) -> Option<Value> {
    let a = numeric(lhs)?;
    let b = numeric(rhs)?;

    if let (Numeric::Int(a), Numeric::Int(b)) = (a, b) {
        // `/` promotes; everything else stays integral when it fits.
        return match kind {
            NodeKind::Add => a.checked_add(b).map(Value::Int),
            NodeKind::Sub => a.checked_sub(b).map(Value::Int),
            NodeKind::Mul => a.checked_mul(b).map(Value::Int),
            NodeKind::Div => Some(Value::Num(a as f64 / b as f64)),
            NodeKind::DivFloor => checked_floor_div(a, b).map(Value::Int),
            NodeKind::Mod => checked_floor_mod(a, b).map(Value::Int),
            NodeKind::Pow => u32::try_from(b)
                .ok()
                .and_then(|exp| a.checked_pow(exp))
                .map(Value::Int),
            _ => None,
        };
    }

    let (x, y) = (a.widen(), b.widen());
    Some(Value::Num(match kind {
        NodeKind::Add => x + y,
        NodeKind::Sub => x - y,
        NodeKind::Mul => x * y,
        NodeKind::Div => x / y,
        NodeKind::DivFloor => (x / y).floor(),
        NodeKind::Mod => x - y * (x / y).floor(),
        NodeKind::Pow => x.powf(y),
        _ => return None,
    }))
}

fn compare<T: PartialOrd>(kind: NodeKind, a: T, b: T) -> bool {
    match kind {
        NodeKind::Lt => a < b,
        NodeKind::Gt => a > b,
        NodeKind::Lte => a <= b,
        NodeKind::Gte => a >= b,
        other => unreachable!("not an ordering operator: {other:?}"),
    }
}

fn parse_str(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok()
}
