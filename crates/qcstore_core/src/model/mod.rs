//! Domain model for stored quantum-chemistry calculation files.
//!
//! # Responsibility
//! - Define canonical record, owner and enumeration types used by core logic.
//! - Define request/response shapes exchanged with callers.
//!
//! # Invariants
//! - Calc type and status are closed enumerations at every layer.
//! - Owner references resolve to exactly one owner kind or fail.

pub mod qc_file;
pub mod schema;
