//! Clause model and eager-load planning for Viaduct.
//!
//! This crate decides *how* a batch of owners gets its associations
//! resolved: the default decomposed preload, or the single-query join
//! fallback when caller clauses reach beyond the owner's own table. The
//! session crate executes whichever plan comes back.

pub mod clause;
pub mod planner;

pub use clause::{Cond, CondOp, OrderDirection, Ordering};
pub use planner::{
    EagerStrategy, FetchRequest, alias_column_parts, build_join_select, build_owner_select,
    choose_strategy, subrow, tie_break_sql,
};
