//! Viaduct - has-one-through association resolution for Rust.
//!
//! Viaduct resolves a single logical related entity (the "target") reached
//! indirectly through an intermediate join entity (the "through record"),
//! where the join table may be shared polymorphically between several
//! associations. It provides:
//!
//! - Static association metadata validated at registration time
//! - Single-owner and batch resolution with a bounded query count
//! - Eager loading via a decomposed preload or a single-query join
//!   fallback, chosen per request
//! - Transactional write-through assignment (replace, never append)
//! - A cached association proxy that forwards calls without widening the
//!   target's visibility rules
//!
//! # Quick Start
//!
//! ```ignore
//! use viaduct::prelude::*;
//!
//! const CLUB: ThroughInfo =
//!     ThroughInfo::new("club", "memberships", "member_id", "clubs", "club_id");
//!
//! struct Member {
//!     id: Option<i64>,
//!     name: String,
//!     club: ThroughOne<Club>,
//! }
//!
//! async fn example(cx: &Cx, conn: impl Connection) -> Result<()> {
//!     let mut session = Session::new(conn);
//!     session.register::<Member>()?;
//!
//!     // Per-owner access, cached on the proxy
//!     let member = session.get::<Member>(cx, 1_i64).await.unwrap();
//!     session.load_through(cx, &member, &CLUB, |m| &m.club).await;
//!
//!     // Batch eager loading: the planner picks preload or join fallback
//!     let request = FetchRequest::new().filter(Cond::eq("name", "Groucho Marx"));
//!     let members = session
//!         .fetch_with::<Member, Club, _>(cx, request, &CLUB, |m| &m.club)
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Zero-reflection metadata**: associations are `const` data, validated
//!   once, read everywhere
//! - **Structured concurrency**: built on asupersync for cancel-correct
//!   operations
//! - **Bounded query counts**: batch loading never degrades to N+1, and an
//!   injectable counter makes that assertable

// Re-export all public types from sub-crates
pub use viaduct_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Core types
    Columns,
    ConfigError,
    Connection,
    Dialect,
    Dispatch,
    Error,
    FromValue,
    IntermediateHop,
    MemberVisibility,
    Record,
    Result,
    Row,
    ScopeFilter,
    ScopeValue,
    StorageError,
    StorageErrorKind,
    ThroughInfo,
    ThroughOne,
    ThroughOrder,
    TransactionOps,
    TypeError,
    TypeResolutionError,
    Value,
    VisibilityError,
    VisibilityErrorKind,
    checked_call,
    find_through,
    hash_value,
};
pub use viaduct_query::{
    Cond, CondOp, EagerStrategy, FetchRequest, OrderDirection, Ordering, choose_strategy,
};
pub use viaduct_session::{ObjectKey, RoundTripCounter, Session};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::{
        Cond, Connection, Cx, Dispatch, Error, FetchRequest, Outcome, Record, Result,
        RoundTripCounter, Session, ThroughInfo, ThroughOne, Value,
    };
}
