//! Core primitives shared across the fedql workspace.
//!
//! - `span`: byte-offset source spans and line/column lookup
//! - `diagnostics`: diagnostic collection for the parser
//! - `value`: the recursive value type flowing through queries

pub mod diagnostics;
pub mod span;
pub mod value;

pub use diagnostics::{Diagnostic, DiagnosticBag, DiagnosticSeverity, Label};
pub use span::{LineCol, LineIndex, Span};
pub use value::{ChainLink, ObjectMap, Value};
