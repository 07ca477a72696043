// tarn-compiler - Closure capture tests
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

use tarn_compiler::{unpack_func_info, Bytecode, CompileOutput, Compiler, Opcode, Operand, Ref};
use tarn_syntax::{AstBuilder, NodeKind};

fn compile(build: impl FnOnce(&mut AstBuilder)) -> CompileOutput {
    let mut b = AstBuilder::new();
    build(&mut b);
    let ast = b.finish();
    Compiler::new(&ast).compile().expect("compilation failed")
}

fn main_ops(bc: &Bytecode) -> Vec<Opcode> {
    bc.main.iter().map(|&r| bc.instruction(r).op).collect()
}

/// Decode a `build_func`: (args, captures, body stream refs).
fn decode_func(bc: &Bytecode, func: Ref) -> (u8, u32, Vec<Ref>) {
    let instr = bc.instruction(func);
    assert_eq!(instr.op, Opcode::BuildFunc);
    let Operand::Extra { start, len } = instr.data else {
        panic!("build_func must carry an extra slice");
    };
    let words = bc.extra_slice(start, len);
    let (args, captures) = unpack_func_info(words[0]);
    let stream = words[1..].iter().map(|&w| Ref(w)).collect();
    (args, captures, stream)
}

#[test]
fn test_single_capture() {
    // let x = 10
    // let f = fn() x
    let out = compile(|b| {
        let x = b.ident("x");
        let ten = b.int("10");
        let decl_x = b.decl(x, ten);
        b.root(decl_x);

        let f = b.ident("f");
        let x_use = b.ident("x");
        let body = b.variadic(NodeKind::Fn, &[x_use]);
        let decl_f = b.decl(f, body);
        b.root(decl_f);
    });
    let bc = &out.bytecode;

    assert_eq!(
        main_ops(bc),
        vec![
            Opcode::Int,
            Opcode::BuildFunc,
            Opcode::StoreCapture,
            Opcode::Discard,
            Opcode::RetNull
        ]
    );
    assert_eq!(bc.instruction(bc.main[0]).data, Operand::Int(10));

    let func = bc.main[1];
    let (args, captures, stream) = decode_func(bc, func);
    assert_eq!(args, 0);
    assert_eq!(captures, 1);

    // The body is exactly load_capture(0) then ret.
    assert_eq!(stream.len(), 2);
    let load = bc.instruction(stream[0]);
    assert_eq!(load.op, Opcode::LoadCapture);
    assert_eq!(load.data, Operand::Int(0));
    let ret = bc.instruction(stream[1]);
    assert_eq!(ret.op, Opcode::Ret);
    assert_eq!(ret.data, Operand::Un(stream[0]));

    // store_capture wires the function to x's slot, right after build_func.
    let store = bc.instruction(bc.main[2]);
    assert_eq!(store.data, Operand::Bin(func, bc.main[0]));

    // The unused function value is discarded at the top level.
    assert_eq!(bc.instruction(bc.main[3]).data, Operand::Un(func));
}

#[test]
fn test_transitive_capture_through_two_frames() {
    // let x = 10
    // let f = fn() fn() x
    let out = compile(|b| {
        let x = b.ident("x");
        let ten = b.int("10");
        let decl_x = b.decl(x, ten);
        b.root(decl_x);

        let f = b.ident("f");
        let x_use = b.ident("x");
        let inner = b.variadic(NodeKind::Fn, &[x_use]);
        let outer = b.variadic(NodeKind::Fn, &[inner]);
        let decl_f = b.decl(f, outer);
        b.root(decl_f);
    });
    let bc = &out.bytecode;

    assert_eq!(
        main_ops(bc),
        vec![
            Opcode::Int,
            Opcode::BuildFunc,
            Opcode::StoreCapture,
            Opcode::Discard,
            Opcode::RetNull
        ]
    );

    let outer_func = bc.main[1];
    let (_, outer_captures, outer_stream) = decode_func(bc, outer_func);
    assert_eq!(outer_captures, 1);

    // The outer body: lift x, build the inner function, wire its capture to
    // the lifted slot, return it.
    assert_eq!(outer_stream.len(), 4);
    let outer_load = bc.instruction(outer_stream[0]);
    assert_eq!(outer_load.op, Opcode::LoadCapture);
    assert_eq!(outer_load.data, Operand::Int(0));

    let inner_func = outer_stream[1];
    let (_, inner_captures, inner_stream) = decode_func(bc, inner_func);
    assert_eq!(inner_captures, 1);
    let inner_store = bc.instruction(outer_stream[2]);
    assert_eq!(inner_store.op, Opcode::StoreCapture);
    assert_eq!(inner_store.data, Operand::Bin(inner_func, outer_stream[0]));
    assert_eq!(bc.instruction(outer_stream[3]).op, Opcode::Ret);

    // The inner body reads its own capture slot 0.
    assert_eq!(inner_stream.len(), 2);
    assert_eq!(bc.instruction(inner_stream[0]).op, Opcode::LoadCapture);
    assert_eq!(bc.instruction(inner_stream[0]).data, Operand::Int(0));

    // The outer capture is wired to x itself.
    let outer_store = bc.instruction(bc.main[2]);
    assert_eq!(outer_store.data, Operand::Bin(outer_func, bc.main[0]));
}

#[test]
fn test_capture_is_created_once_per_name() {
    // let x = 1
    // let f = fn() x + x
    let out = compile(|b| {
        let x = b.ident("x");
        let one = b.int("1");
        let decl_x = b.decl(x, one);
        b.root(decl_x);

        let f = b.ident("f");
        let a = b.ident("x");
        let c = b.ident("x");
        let sum = b.binary(NodeKind::Add, a, c);
        let body = b.variadic(NodeKind::Fn, &[sum]);
        let decl_f = b.decl(f, body);
        b.root(decl_f);
    });
    let bc = &out.bytecode;

    let func = bc.main[1];
    let (_, captures, stream) = decode_func(bc, func);
    assert_eq!(captures, 1, "same name lifts once");

    // One load_capture feeding both sides of the add.
    assert_eq!(stream.len(), 3);
    let load = stream[0];
    assert_eq!(bc.instruction(load).op, Opcode::LoadCapture);
    assert_eq!(bc.instruction(stream[1]).op, Opcode::Add);
    assert_eq!(bc.instruction(stream[1]).data, Operand::Bin(load, load));

    // Exactly one store_capture follows the build_func.
    let stores = main_ops(bc)
        .iter()
        .filter(|&&op| op == Opcode::StoreCapture)
        .count();
    assert_eq!(stores, 1);
}

#[test]
fn test_mutable_capture_allows_assignment() {
    // let mut x = 1
    // let f = fn() x = 2
    let out = compile(|b| {
        let x = b.mut_ident("x");
        let one = b.int("1");
        let decl_x = b.decl(x, one);
        b.root(decl_x);

        let f = b.ident("f");
        let x_use = b.ident("x");
        let two = b.int("2");
        let assign = b.binary(NodeKind::Assign, x_use, two);
        let body = b.variadic(NodeKind::Fn, &[assign]);
        let decl_f = b.decl(f, body);
        b.root(decl_f);
    });
    let bc = &out.bytecode;

    let func = bc.main[1];
    let (_, captures, stream) = decode_func(bc, func);
    assert_eq!(captures, 1);

    // Assignment body: lift x, materialize 2, move into the capture slot,
    // then the implicit ret_null of a statement body.
    assert_eq!(stream.len(), 4);
    let load = stream[0];
    assert_eq!(bc.instruction(load).op, Opcode::LoadCapture);
    assert_eq!(bc.instruction(stream[1]).data, Operand::Int(2));
    assert_eq!(bc.instruction(stream[2]).op, Opcode::Move);
    assert_eq!(bc.instruction(stream[2]).data, Operand::Bin(load, stream[1]));
    assert_eq!(bc.instruction(stream[3]).op, Opcode::RetNull);
}

#[test]
fn test_globals_are_not_captured() {
    // let f = fn() g   -- g resolves nowhere; no capture, one placeholder.
    let out = compile(|b| {
        let f = b.ident("f");
        let g = b.ident("g");
        let body = b.variadic(NodeKind::Fn, &[g]);
        let decl_f = b.decl(f, body);
        b.root(decl_f);
    });
    let bc = &out.bytecode;

    assert_eq!(
        main_ops(bc),
        vec![Opcode::BuildFunc, Opcode::Discard, Opcode::RetNull]
    );
    let (args, captures, stream) = decode_func(bc, bc.main[0]);
    assert_eq!(args, 0);
    assert_eq!(captures, 0);

    // The placeholder load_global sits inside the function body.
    assert_eq!(stream.len(), 2);
    let load = stream[0];
    assert_eq!(bc.instruction(load).op, Opcode::LoadGlobal);
    assert_eq!(bc.instruction(load).data, Operand::None);

    assert_eq!(out.unresolved.len(), 1);
    assert_eq!(out.unresolved[0].slot, load);
}

#[test]
fn test_capture_ordinals_are_dense() {
    // let a = 1
    // let b = 2
    // let f = fn() a + b
    let out = compile(|builder| {
        let a = builder.ident("a");
        let one = builder.int("1");
        let decl_a = builder.decl(a, one);
        builder.root(decl_a);

        let bn = builder.ident("b");
        let two = builder.int("2");
        let decl_b = builder.decl(bn, two);
        builder.root(decl_b);

        let f = builder.ident("f");
        let a_use = builder.ident("a");
        let b_use = builder.ident("b");
        let sum = builder.binary(NodeKind::Add, a_use, b_use);
        let body = builder.variadic(NodeKind::Fn, &[sum]);
        let decl_f = builder.decl(f, body);
        builder.root(decl_f);
    });
    let bc = &out.bytecode;

    let func = bc.main[2];
    let (_, captures, stream) = decode_func(bc, func);
    assert_eq!(captures, 2);

    // load_capture k carries operand k, in first-use order.
    assert_eq!(bc.instruction(stream[0]).op, Opcode::LoadCapture);
    assert_eq!(bc.instruction(stream[0]).data, Operand::Int(0));
    assert_eq!(bc.instruction(stream[1]).op, Opcode::LoadCapture);
    assert_eq!(bc.instruction(stream[1]).data, Operand::Int(1));

    // build_func is followed by exactly captures.len() store_captures, in
    // capture order: first a, then b.
    let store_a = bc.instruction(bc.main[3]);
    let store_b = bc.instruction(bc.main[4]);
    assert_eq!(store_a.op, Opcode::StoreCapture);
    assert_eq!(store_b.op, Opcode::StoreCapture);
    assert_eq!(store_a.data, Operand::Bin(func, bc.main[0]));
    assert_eq!(store_b.data, Operand::Bin(func, bc.main[1]));
}
