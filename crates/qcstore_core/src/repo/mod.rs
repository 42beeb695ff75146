//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for QC files.
//! - Isolate SQLite query details from the ownership resolver.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `DuplicateSlot`,
//!   `ChecksumCollision`) in addition to DB transport errors.

pub mod qc_file_repo;
