// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! String interning.
//!
//! All string constants of a compilation share one growable byte pool; an
//! interned string is addressed by its byte offset into that pool. Keys are
//! compared by byte equality, with no normalization, so re-interning the
//! same bytes always returns the original offset.

use rustc_hash::FxHashMap;

/// Interns byte strings into a single growable pool.
#[derive(Debug, Default)]
pub struct Interner {
    pool: Vec<u8>,
    offsets: FxHashMap<Box<[u8]>, u32>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `bytes`, returning the offset of its (single) copy in the pool.
    pub fn intern(&mut self, bytes: &[u8]) -> u32 {
        if let Some(&offset) = self.offsets.get(bytes) {
            return offset;
        }
        let offset = self.pool.len() as u32;
        self.pool.extend_from_slice(bytes);
        self.offsets.insert(bytes.into(), offset);
        offset
    }

    /// The pool contents so far.
    pub fn bytes(&self) -> &[u8] {
        &self.pool
    }

    /// Consume the interner, keeping only the pool.
    pub fn into_pool(self) -> Vec<u8> {
        self.pool
    }
}
