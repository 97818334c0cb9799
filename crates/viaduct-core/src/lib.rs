//! Core types and traits for Viaduct.
//!
//! This crate provides the foundational abstractions for has-one-through
//! association resolution:
//!
//! - `Record` trait for table-mapped entities
//! - `ThroughInfo` static association metadata
//! - `ThroughOne` lazily-resolved association proxy
//! - `Connection` trait for storage access
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod association;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod record;
pub mod row;
pub mod value;

pub use association::{
    IntermediateHop, ScopeFilter, ScopeValue, ThroughInfo, ThroughOne, ThroughOrder,
};
pub use connection::{Connection, Dialect, TransactionOps};
pub use dispatch::{Dispatch, MemberVisibility, checked_call};
pub use error::{
    ConfigError, Error, Result, StorageError, StorageErrorKind, TypeError, TypeResolutionError,
    VisibilityError, VisibilityErrorKind,
};
pub use record::{Record, find_through};
pub use row::{Columns, Row};
pub use value::{FromValue, Value, hash_value};
