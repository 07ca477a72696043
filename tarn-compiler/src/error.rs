// tarn-compiler - Bytecode compiler for the Tarn programming language
// Copyright (c) 2026 The Tarn Authors. MIT licensed.

//! Compile errors and the diagnostic collector.
//!
//! Lowering records a [`Diagnostic`] (message plus source byte offset)
//! *before* returning an error, so the marker error type itself stays
//! data-free. The first semantic error aborts the compilation; the caller
//! receives everything the collector accumulated.

use std::fmt;

/// Severity of a diagnostic entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic with its source byte offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub offset: u32,
    pub severity: Severity,
}

/// Accumulates diagnostics during a compilation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: impl Into<String>, offset: u32, severity: Severity) {
        self.entries.push(Diagnostic {
            message: message.into(),
            offset,
            severity,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}

/// Marker for an aborted compilation; the details live in the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileError;

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("compilation failed")
    }
}

impl std::error::Error for CompileError {}

/// Result type for lowering.
pub type Result<T> = std::result::Result<T, CompileError>;

/// A failed compilation: the diagnostics accumulated before the abort.
#[derive(Debug)]
pub struct CompileFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileFailure {
    /// The first error message, for one-line reporting.
    pub fn message(&self) -> &str {
        self.diagnostics
            .first()
            .map(|d| d.message.as_str())
            .unwrap_or("compilation failed")
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for CompileFailure {}
