//! Has-one-through association metadata and the per-owner proxy cell.
//!
//! Associations are defined as static metadata on each [`Record`]. Higher
//! layers (the planner and the session resolver) read this metadata to
//! generate correct lookups and populate proxies without runtime
//! reflection.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dispatch::{Dispatch, checked_call};
use crate::error::{Error, Result, VisibilityError};
use crate::record::Record;
use crate::value::Value;

/// A const-friendly scalar for static scope filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeValue {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl ScopeValue {
    /// Convert to a runtime [`Value`] for parameter binding.
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            ScopeValue::Bool(b) => Value::Bool(b),
            ScopeValue::Int(i) => Value::Int(i),
            ScopeValue::Str(s) => Value::Text(s.to_string()),
        }
    }
}

/// A static equality filter applied to through-table lookups.
///
/// Lets several associations share one through table while each only sees
/// its own rows (e.g. only the favourite membership).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeFilter {
    /// Column on the through table.
    pub column: &'static str,
    /// Required value.
    pub equals: ScopeValue,
}

impl ScopeFilter {
    /// Create a new scope filter.
    #[must_use]
    pub const fn new(column: &'static str, equals: ScopeValue) -> Self {
        Self { column, equals }
    }
}

/// Through-row tie-break ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughOrder {
    /// Column on the through table.
    pub column: &'static str,
    pub descending: bool,
}

impl ThroughOrder {
    /// Ascending order on a through-table column.
    #[must_use]
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    /// Descending order on a through-table column.
    #[must_use]
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// A further hop between the through row and the final target.
///
/// Covers chains where the through row points at an intermediate record
/// which itself holds the foreign key to the real target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntermediateHop {
    /// The intermediate table name.
    pub table: &'static str,
    /// Primary key column on the intermediate, matched by the through
    /// row's target key.
    pub pk: &'static str,
    /// Foreign key column on the intermediate pointing at the final target.
    pub target_key: &'static str,
}

impl IntermediateHop {
    /// Create a new intermediate hop.
    #[must_use]
    pub const fn new(table: &'static str, pk: &'static str, target_key: &'static str) -> Self {
        Self {
            table,
            pk,
            target_key,
        }
    }
}

/// Static metadata describing one has-one-through association.
///
/// Construct with [`ThroughInfo::new`] and the builder-style `const`
/// setters, then register on the owner's [`Record::THROUGH`] slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughInfo {
    /// Association name (e.g. `"club"`).
    pub name: &'static str,

    /// The through (join) table name.
    pub through_table: &'static str,

    /// Primary key column of the through table (tie-break default).
    pub through_pk: &'static str,

    /// Column on the through table holding the owner's key.
    pub owner_key: &'static str,

    /// The target table name.
    pub target_table: &'static str,

    /// Column on the through table holding the target's key (or the
    /// intermediate's key when a hop is configured).
    pub target_key: &'static str,

    /// Primary key column on the target table.
    pub target_pk: &'static str,

    /// Target-kind discriminator column on the through table, when the
    /// through table is shared polymorphically.
    pub discriminator: Option<&'static str>,

    /// Required discriminator value for this association.
    pub source_type: Option<&'static str>,

    /// The closed set of target kinds the discriminator may name.
    pub known_kinds: &'static [&'static str],

    /// Static filter narrowing through-table candidates.
    pub scope: Option<ScopeFilter>,

    /// Explicit through-row tie-break; defaults to newest-first on the
    /// through primary key when unset.
    pub order_by: Option<ThroughOrder>,

    /// Optional second hop between through row and target.
    pub intermediate: Option<IntermediateHop>,
}

impl ThroughInfo {
    /// Create a new association with required fields.
    #[must_use]
    pub const fn new(
        name: &'static str,
        through_table: &'static str,
        owner_key: &'static str,
        target_table: &'static str,
        target_key: &'static str,
    ) -> Self {
        Self {
            name,
            through_table,
            through_pk: "id",
            owner_key,
            target_table,
            target_key,
            target_pk: "id",
            discriminator: None,
            source_type: None,
            known_kinds: &[],
            scope: None,
            order_by: None,
            intermediate: None,
        }
    }

    /// Set the through table's primary key column.
    #[must_use]
    pub const fn through_pk(mut self, column: &'static str) -> Self {
        self.through_pk = column;
        self
    }

    /// Set the target table's primary key column.
    #[must_use]
    pub const fn target_pk(mut self, column: &'static str) -> Self {
        self.target_pk = column;
        self
    }

    /// Set the discriminator column (polymorphic through table).
    #[must_use]
    pub const fn discriminator(mut self, column: &'static str) -> Self {
        self.discriminator = Some(column);
        self
    }

    /// Constrain the discriminator to one kind.
    #[must_use]
    pub const fn source_type(mut self, kind: &'static str) -> Self {
        self.source_type = Some(kind);
        self
    }

    /// Register the closed set of kinds the discriminator may name.
    #[must_use]
    pub const fn known_kinds(mut self, kinds: &'static [&'static str]) -> Self {
        self.known_kinds = kinds;
        self
    }

    /// Set a static through-row filter.
    #[must_use]
    pub const fn scope(mut self, filter: ScopeFilter) -> Self {
        self.scope = Some(filter);
        self
    }

    /// Set an explicit through-row tie-break.
    #[must_use]
    pub const fn order_by(mut self, order: ThroughOrder) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Route the chain through an intermediate record.
    #[must_use]
    pub const fn intermediate(mut self, hop: IntermediateHop) -> Self {
        self.intermediate = Some(hop);
        self
    }

    /// Whether the through table carries a discriminator for this
    /// association.
    #[must_use]
    pub const fn is_polymorphic(&self) -> bool {
        self.discriminator.is_some()
    }

    /// Whether a stored discriminator value names a registered kind.
    #[must_use]
    pub fn kind_is_known(&self, kind: &str) -> bool {
        self.known_kinds.iter().any(|k| *k == kind)
    }

    /// Validate the descriptor at registration time.
    ///
    /// Called once per association by `Session::register`; failures are
    /// fatal configuration errors, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("association name unset"));
        }
        if self.target_table.is_empty() || self.target_key.is_empty() {
            return Err(Error::config(format!(
                "association '{}' has no target relation",
                self.name
            )));
        }
        if self.source_type.is_some() && self.discriminator.is_none() {
            return Err(Error::config(format!(
                "association '{}' sets a source type but '{}' is not polymorphic",
                self.name, self.through_table
            )));
        }
        if self.discriminator.is_some() && self.known_kinds.is_empty() {
            return Err(Error::config(format!(
                "association '{}' is polymorphic but registers no target kinds",
                self.name
            )));
        }
        if let Some(source) = self.source_type {
            if !self.kind_is_known(source) {
                return Err(Error::config(format!(
                    "association '{}' constrains to unregistered kind '{}'",
                    self.name, source
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// ThroughOne<T> - the association proxy
// ============================================================================

/// A lazily-resolved, cached handle to one owner's through target.
///
/// # States
///
/// - **Unloaded**: resolution has not run yet
/// - **Loaded**: resolution ran; the cell holds the target or loaded-none
///
/// Loading requires a `Session`; after loading (or after an eager load
/// populated the cell), access is free. [`ThroughOne::reload`] drops the
/// cache so the next access resolves again; assignment replaces the cache
/// alongside the write-through.
pub struct ThroughOne<T: Record> {
    loaded: OnceLock<Option<T>>,
    load_attempted: AtomicBool,
}

impl<T: Record> ThroughOne<T> {
    /// Create an unloaded proxy.
    #[must_use]
    pub fn unloaded() -> Self {
        Self {
            loaded: OnceLock::new(),
            load_attempted: AtomicBool::new(false),
        }
    }

    /// Create with an already-resolved target.
    #[must_use]
    pub fn loaded(target: T) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Some(target));
        Self {
            loaded: cell,
            load_attempted: AtomicBool::new(true),
        }
    }

    /// Get the resolved target (None if unloaded or resolved-to-none).
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.loaded.get().and_then(|t| t.as_ref())
    }

    /// Check whether resolution has run (including resolved-to-none).
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.load_attempted.load(Ordering::Acquire)
    }

    /// Set the resolved target (used by the session's load paths).
    ///
    /// Returns `Err` with the rejected value if the cell was already set.
    pub fn set_loaded(&self, target: Option<T>) -> std::result::Result<(), Option<T>> {
        match self.loaded.set(target) {
            Ok(()) => {
                self.load_attempted.store(true, Ordering::Release);
                Ok(())
            }
            Err(v) => Err(v),
        }
    }

    /// Replace the cache with a newly assigned target.
    ///
    /// This is the cache side of write-through assignment; the storage side
    /// is `Session::assign_through`.
    pub fn assign(&mut self, target: T) {
        let cell = OnceLock::new();
        let _ = cell.set(Some(target));
        self.loaded = cell;
        self.load_attempted = AtomicBool::new(true);
    }

    /// Drop the cache, forcing re-resolution on next access.
    pub fn reload(&mut self) {
        self.loaded = OnceLock::new();
        self.load_attempted = AtomicBool::new(false);
    }
}

impl<T: Record + Dispatch> ThroughOne<T> {
    /// Invoke a member on the resolved target through the ordinary path.
    ///
    /// Restricted and unknown members fail identically, as does invoking on
    /// a missing target; the proxy never opens a back door around the
    /// target's own visibility rules.
    pub fn invoke(&self, member: &str, args: &[Value]) -> Result<Value> {
        match self.get() {
            Some(target) => checked_call(target, member, args),
            None => Err(Error::Visibility(VisibilityError::undefined(
                member,
                T::KIND,
            ))),
        }
    }

    /// Invoke a member regardless of visibility (the explicit escape hatch,
    /// mirroring the target's own).
    pub fn invoke_unchecked(&self, member: &str, args: &[Value]) -> Result<Value> {
        match self.get() {
            Some(target) => target.dispatch(member, args),
            None => Err(Error::Visibility(VisibilityError::undefined(
                member,
                T::KIND,
            ))),
        }
    }
}

impl<T: Record> Default for ThroughOne<T> {
    fn default() -> Self {
        Self::unloaded()
    }
}

impl<T: Record + Clone> Clone for ThroughOne<T> {
    fn clone(&self) -> Self {
        let cloned = Self {
            loaded: OnceLock::new(),
            load_attempted: AtomicBool::new(self.load_attempted.load(Ordering::Acquire)),
        };
        if let Some(value) = self.loaded.get() {
            let _ = cloned.loaded.set(value.clone());
        }
        cloned
    }
}

impl<T: Record + fmt::Debug> fmt::Debug for ThroughOne<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_loaded() { "loaded" } else { "unloaded" };
        f.debug_struct("ThroughOne")
            .field("state", &state)
            .field("target", &self.get())
            .finish()
    }
}

impl<T> Serialize for ThroughOne<T>
where
    T: Record + Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.loaded.get() {
            Some(Some(target)) => target.serialize(serializer),
            Some(None) | None => serializer.serialize_none(),
        }
    }
}

impl<'de, T> Deserialize<'de> for ThroughOne<T>
where
    T: Record + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let opt = Option::<T>::deserialize(deserializer)?;
        Ok(match opt {
            Some(target) => Self::loaded(target),
            None => Self::unloaded(),
        })
    }
}
