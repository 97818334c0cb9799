//! Session and association resolution for Viaduct.
//!
//! `viaduct-session` is the **resolution layer**. It owns a connection and
//! an identity map, resolves has-one-through targets for single owners and
//! batches, plans and executes eager loading, and performs transactional
//! write-through assignment.
//!
//! # Role In The Architecture
//!
//! - **Resolver**: single-owner and batch target resolution with a bounded
//!   query count.
//! - **Eager loading**: populates owner proxies via the preload strategy or
//!   the single-query join fallback, chosen per request.
//! - **Write-through**: replaces an owner's through record inside one
//!   transaction.
//! - **Identity map**: one in-memory instance per primary key; repeat
//!   fetches are cache hits.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: resolution happens when asked, never as a
//!   hidden side effect.
//! - **Single-writer sessions**: `&mut self` methods provide the external
//!   serialization per unit of work; proxies carry no locks of their own.
//! - **Cancel-correct**: all storage-touching operations use `Cx` +
//!   `Outcome` via `viaduct-core`.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(conn);
//! session.register::<Member>()?;
//!
//! // Lazy, per-owner access (cached on the proxy)
//! session.load_through(&cx, &member, &CLUB, |m| &m.club).await?;
//!
//! // Batch eager loading (at most 3 queries, or 1 via the join fallback)
//! let members = session
//!     .fetch_with::<Member, Club, _>(&cx, request, &CLUB, |m| &m.club)
//!     .await?;
//! ```

pub mod instrument;

pub use instrument::RoundTripCounter;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use viaduct_core::{
    Connection, Error, Record, Result, Row, ThroughInfo, ThroughOne, TransactionOps,
    TypeResolutionError, Value, hash_value,
};
use viaduct_query::{
    EagerStrategy, FetchRequest, build_join_select, build_owner_select, choose_strategy, subrow,
    tie_break_sql,
};

// ============================================================================
// Object Key
// ============================================================================

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Type identifier for the Record type.
    type_id: TypeId,
    /// Hash of the primary key value.
    pk_hash: u64,
}

impl ObjectKey {
    /// Create an object key from a record instance with a persisted key.
    #[must_use]
    pub fn from_record<M: Record + 'static>(obj: &M) -> Option<Self> {
        obj.primary_key().map(|pk| Self::from_pk::<M>(&pk))
    }

    /// Create an object key from type and primary key.
    #[must_use]
    pub fn from_pk<M: Record + 'static>(pk: &Value) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            pk_hash: hash_value(pk),
        }
    }

    /// Get the primary key hash.
    #[must_use]
    pub fn pk_hash(&self) -> u64 {
        self.pk_hash
    }
}

// ============================================================================
// Session
// ============================================================================

/// A unit-of-work scope over one connection.
///
/// Holds the identity map and the optional round-trip counter. Not shared
/// across concurrent contexts; callers serialize access per session.
pub struct Session<C: Connection> {
    /// The storage connection.
    connection: C,
    /// Identity map: ObjectKey -> boxed record instance.
    identity_map: HashMap<ObjectKey, Box<dyn Any + Send + Sync>>,
    /// Injectable storage round-trip counter.
    counter: Option<Arc<RoundTripCounter>>,
}

impl<C: Connection> Session<C> {
    /// Create a new session from an existing connection.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            identity_map: HashMap::new(),
            counter: None,
        }
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Install a round-trip counter shared with the caller.
    pub fn instrument(&mut self, counter: Arc<RoundTripCounter>) {
        self.counter = Some(counter);
    }

    /// Validate every association registered on a record type.
    ///
    /// Misconfigured descriptors fail here, before any query runs.
    pub fn register<M: Record>(&self) -> Result<()> {
        for assoc in M::THROUGH {
            assoc.validate()?;
        }
        tracing::debug!(
            table = M::TABLE,
            associations = M::THROUGH.len(),
            "Record type registered"
        );
        Ok(())
    }

    /// Number of instances currently held by the identity map.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    fn record_round_trip(&self, label: &'static str) {
        if let Some(counter) = &self.counter {
            counter.record(label);
        }
    }

    // ========================================================================
    // Identity-map backed fetch
    // ========================================================================

    /// Get a record by primary key.
    ///
    /// Checks the identity map first; a hit costs no query.
    pub async fn get<M: Record + Clone + 'static>(
        &mut self,
        cx: &Cx,
        pk: impl Into<Value>,
    ) -> Outcome<Option<M>, Error> {
        self.fetch_by_pk::<M>(cx, pk.into(), M::TABLE).await
    }

    async fn fetch_by_pk<M: Record + Clone + 'static>(
        &mut self,
        cx: &Cx,
        pk: Value,
        label: &'static str,
    ) -> Outcome<Option<M>, Error> {
        let key = ObjectKey::from_pk::<M>(&pk);
        if let Some(tracked) = self.identity_map.get(&key) {
            if let Some(obj) = tracked.downcast_ref::<M>() {
                tracing::trace!(table = M::TABLE, "Identity map hit");
                return Outcome::Ok(Some(obj.clone()));
            }
        }

        let dialect = self.connection.dialect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {} LIMIT 1",
            dialect.quote_identifier(M::TABLE),
            dialect.quote_identifier(M::PRIMARY_KEY),
            dialect.placeholder(1)
        );

        self.record_round_trip(label);
        let row = match self.connection.query_one(cx, &sql, &[pk]).await {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let Some(row) = row else {
            return Outcome::Ok(None);
        };

        let obj = match M::from_row(&row) {
            Ok(obj) => obj,
            Err(e) => return Outcome::Err(e),
        };
        self.track(&obj);
        Outcome::Ok(Some(obj))
    }

    /// Insert a record into the identity map (no-op for unsaved records).
    fn track<M: Record + Clone + 'static>(&mut self, obj: &M) {
        if let Some(key) = ObjectKey::from_record(obj) {
            self.identity_map.insert(key, Box::new(obj.clone()));
        }
    }

    // ========================================================================
    // Resolver
    // ========================================================================

    /// Resolve the through target for a single owner.
    ///
    /// An unsaved owner resolves to none without touching storage. Two
    /// queries worst case; three when the association routes through an
    /// intermediate record.
    pub async fn resolve_through<O, T>(
        &mut self,
        cx: &Cx,
        owner: &O,
        assoc: &ThroughInfo,
    ) -> Outcome<Option<T>, Error>
    where
        O: Record + 'static,
        T: Record + Clone + 'static,
    {
        let Some(owner_pk) = owner.primary_key() else {
            tracing::trace!(
                owner = O::TABLE,
                association = assoc.name,
                "Unsaved owner resolves to none"
            );
            return Outcome::Ok(None);
        };

        let row = match self.through_row(cx, owner_pk, assoc, T::KIND).await {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let Some(row) = row else {
            return Outcome::Ok(None);
        };
        if let Err(e) = check_discriminator(assoc, &row) {
            return Outcome::Err(e);
        }

        let target_key = row.value_named(assoc.target_key).cloned();
        let Some(target_key) = target_key.filter(|v| !v.is_null()) else {
            return Outcome::Ok(None);
        };

        let final_key = match self.hop_key(cx, assoc, target_key).await {
            Outcome::Ok(key) => key,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let Some(final_key) = final_key else {
            return Outcome::Ok(None);
        };

        self.fetch_by_pk::<T>(cx, final_key, assoc.name).await
    }

    /// Resolve targets for a batch of owners in a bounded number of
    /// queries (two for the direct chain, three with an intermediate hop).
    ///
    /// Returns a map keyed by owner primary-key hash; owners without a
    /// target are absent from the map.
    #[tracing::instrument(level = "debug", skip(self, cx, owners, assoc))]
    pub async fn resolve_through_batch<O, T>(
        &mut self,
        cx: &Cx,
        owners: &[O],
        assoc: &ThroughInfo,
    ) -> Outcome<HashMap<u64, T>, Error>
    where
        O: Record + 'static,
        T: Record + Clone + 'static,
    {
        let refs: Vec<&O> = owners.iter().collect();
        self.resolve_through_batch_refs(cx, &refs, assoc).await
    }

    /// Resolve one owner's association and populate its proxy.
    ///
    /// A loaded proxy is a cache hit: no query runs. Returns whether a
    /// target is present after the call.
    pub async fn load_through<O, T, F>(
        &mut self,
        cx: &Cx,
        owner: &O,
        assoc: &ThroughInfo,
        accessor: F,
    ) -> Outcome<bool, Error>
    where
        O: Record + 'static,
        T: Record + Clone + 'static,
        F: Fn(&O) -> &ThroughOne<T>,
    {
        let proxy = accessor(owner);
        if proxy.is_loaded() {
            tracing::trace!(association = assoc.name, "Proxy cache hit");
            return Outcome::Ok(proxy.get().is_some());
        }

        if let Some(counter) = &self.counter {
            counter.record_single_resolution(O::TABLE, assoc.name);
        }

        let target = match self.resolve_through::<O, T>(cx, owner, assoc).await {
            Outcome::Ok(target) => target,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let found = target.is_some();
        let _ = accessor(owner).set_loaded(target);
        Outcome::Ok(found)
    }

    /// Batch-resolve an association and populate every owner's proxy.
    ///
    /// This is the preload engine: every unloaded proxy ends up loaded
    /// (with its target or with none), so later access costs nothing.
    /// Returns the number of owners that resolved to a target.
    #[tracing::instrument(level = "debug", skip(self, cx, owners, accessor))]
    pub async fn load_through_many<O, T, F>(
        &mut self,
        cx: &Cx,
        owners: &[O],
        assoc: &ThroughInfo,
        accessor: F,
    ) -> Outcome<usize, Error>
    where
        O: Record + 'static,
        T: Record + Clone + 'static,
        F: Fn(&O) -> &ThroughOne<T>,
    {
        let pending: Vec<&O> = owners
            .iter()
            .filter(|o| !accessor(o).is_loaded())
            .collect();

        let resolved = match self
            .resolve_through_batch_refs::<O, T>(cx, &pending, assoc)
            .await
        {
            Outcome::Ok(map) => map,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut loaded = 0;
        for owner in pending {
            let target = owner
                .primary_key()
                .and_then(|pk| resolved.get(&hash_value(&pk)).cloned());
            if target.is_some() {
                loaded += 1;
            }
            let _ = accessor(owner).set_loaded(target);
        }

        tracing::debug!(
            association = assoc.name,
            owners = owners.len(),
            loaded = loaded,
            "Batch load complete"
        );
        Outcome::Ok(loaded)
    }

    // ========================================================================
    // Eager loading
    // ========================================================================

    /// Fetch owners and eagerly resolve one association for all of them.
    ///
    /// The planner picks the strategy: the decomposed preload when every
    /// caller clause references the owner's own table (at most three
    /// queries for the direct chain), or the single-query join fallback
    /// otherwise. Either way, every returned owner's proxy is populated.
    #[tracing::instrument(level = "debug", skip(self, cx, request, accessor))]
    pub async fn fetch_with<O, T, F>(
        &mut self,
        cx: &Cx,
        request: FetchRequest,
        assoc: &ThroughInfo,
        accessor: F,
    ) -> Outcome<Vec<O>, Error>
    where
        O: Record + Clone + 'static,
        T: Record + Clone + 'static,
        F: Fn(&O) -> &ThroughOne<T>,
    {
        match choose_strategy(O::TABLE, &request) {
            EagerStrategy::Preload => self.fetch_preload(cx, &request, assoc, accessor).await,
            EagerStrategy::Join => self.fetch_joined(cx, &request, assoc, accessor).await,
        }
    }

    async fn fetch_preload<O, T, F>(
        &mut self,
        cx: &Cx,
        request: &FetchRequest,
        assoc: &ThroughInfo,
        accessor: F,
    ) -> Outcome<Vec<O>, Error>
    where
        O: Record + Clone + 'static,
        T: Record + Clone + 'static,
        F: Fn(&O) -> &ThroughOne<T>,
    {
        let dialect = self.connection.dialect();
        let (sql, params) = build_owner_select(dialect, O::TABLE, request);

        self.record_round_trip(assoc.name);
        let rows = match self.connection.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut owners = Vec::with_capacity(rows.len());
        for row in &rows {
            match O::from_row(row) {
                Ok(owner) => {
                    self.track(&owner);
                    owners.push(owner);
                }
                Err(e) => return Outcome::Err(e),
            }
        }

        match self
            .load_through_many(cx, &owners, assoc, &accessor)
            .await
        {
            Outcome::Ok(_) => Outcome::Ok(owners),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn fetch_joined<O, T, F>(
        &mut self,
        cx: &Cx,
        request: &FetchRequest,
        assoc: &ThroughInfo,
        accessor: F,
    ) -> Outcome<Vec<O>, Error>
    where
        O: Record + Clone + 'static,
        T: Record + Clone + 'static,
        F: Fn(&O) -> &ThroughOne<T>,
    {
        let dialect = self.connection.dialect();
        let (sql, params) = build_join_select(
            dialect,
            O::TABLE,
            O::PRIMARY_KEY,
            O::COLUMNS,
            assoc,
            T::COLUMNS,
            T::KIND,
            request,
        );

        self.record_round_trip(assoc.name);
        let rows = match self.connection.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let target_pk_alias = format!("{}__{}", assoc.target_table, assoc.target_pk);
        let mut owners: Vec<O> = Vec::new();
        let mut positions: HashMap<u64, usize> = HashMap::new();
        let mut targets: HashMap<u64, T> = HashMap::new();

        for row in &rows {
            let owner_sub = subrow(row, O::TABLE);
            let owner = match O::from_row(&owner_sub) {
                Ok(owner) => owner,
                Err(e) => return Outcome::Err(e),
            };
            let Some(owner_pk) = owner.primary_key() else {
                continue;
            };
            let owner_hash = hash_value(&owner_pk);
            if !positions.contains_key(&owner_hash) {
                positions.insert(owner_hash, owners.len());
                self.track(&owner);
                owners.push(owner);
            }

            // First non-null target per owner in result order wins; the
            // caller's ordering (with the recency tie-break appended)
            // determined that order in the query.
            if targets.contains_key(&owner_hash) {
                continue;
            }
            let has_target = row
                .value_named(&target_pk_alias)
                .is_some_and(|v| !v.is_null());
            if !has_target {
                continue;
            }
            let target_sub = subrow(row, assoc.target_table);
            match T::from_row(&target_sub) {
                Ok(target) => {
                    self.track(&target);
                    targets.insert(owner_hash, target);
                }
                Err(e) => return Outcome::Err(e),
            }
        }

        for owner in &owners {
            let target = owner
                .primary_key()
                .and_then(|pk| targets.get(&hash_value(&pk)).cloned());
            let _ = accessor(owner).set_loaded(target);
        }

        tracing::debug!(
            association = assoc.name,
            owners = owners.len(),
            resolved = targets.len(),
            "Join fallback complete"
        );
        Outcome::Ok(owners)
    }

    // ========================================================================
    // Write-through assignment
    // ========================================================================

    /// Assign a new target, replacing the owner's through record.
    ///
    /// Delete-then-insert runs inside one transaction: a reload right after
    /// observes exactly one through record, pointing at the new target. A
    /// failed insert rolls the delete back and the prior state survives.
    #[tracing::instrument(level = "info", skip(self, cx, owner, target, accessor))]
    pub async fn assign_through<O, T, F>(
        &mut self,
        cx: &Cx,
        owner: &mut O,
        assoc: &ThroughInfo,
        target: &T,
        accessor: F,
    ) -> Outcome<(), Error>
    where
        O: Record + 'static,
        T: Record + Clone + 'static,
        F: FnOnce(&mut O) -> &mut ThroughOne<T>,
    {
        if let Err(e) = assoc.validate() {
            return Outcome::Err(e);
        }
        let Some(owner_pk) = owner.primary_key() else {
            return Outcome::Err(Error::config(format!(
                "cannot assign '{}' on an unsaved owner",
                assoc.name
            )));
        };
        let Some(target_pk) = target.primary_key() else {
            return Outcome::Err(Error::config(format!(
                "cannot assign an unsaved target to '{}'",
                assoc.name
            )));
        };

        let dialect = self.connection.dialect();
        let kind = assoc.source_type.unwrap_or(T::KIND);

        // DELETE existing through rows for this association.
        let mut delete_params = vec![owner_pk.clone()];
        let mut delete_sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            dialect.quote_identifier(assoc.through_table),
            dialect.quote_identifier(assoc.owner_key),
            dialect.placeholder(1)
        );
        if let Some(discriminator) = assoc.discriminator {
            delete_params.push(Value::Text(kind.to_string()));
            delete_sql.push_str(&format!(
                " AND {} = {}",
                dialect.quote_identifier(discriminator),
                dialect.placeholder(delete_params.len())
            ));
        }
        if let Some(scope) = assoc.scope {
            delete_params.push(scope.equals.to_value());
            delete_sql.push_str(&format!(
                " AND {} = {}",
                dialect.quote_identifier(scope.column),
                dialect.placeholder(delete_params.len())
            ));
        }

        // INSERT the replacement, carrying discriminator and scope columns
        // so the new row is found by the same lookups that found the old.
        let mut columns = vec![assoc.owner_key, assoc.target_key];
        let mut insert_params = vec![owner_pk, target_pk];
        if let Some(discriminator) = assoc.discriminator {
            columns.push(discriminator);
            insert_params.push(Value::Text(kind.to_string()));
        }
        if let Some(scope) = assoc.scope {
            columns.push(scope.column);
            insert_params.push(scope.equals.to_value());
        }
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect();
        let placeholders: Vec<String> = (1..=insert_params.len())
            .map(|i| dialect.placeholder(i))
            .collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote_identifier(assoc.through_table),
            quoted.join(", "),
            placeholders.join(", ")
        );

        let tx = match self.connection.begin(cx).await {
            Outcome::Ok(tx) => tx,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        tracing::trace!(sql = %delete_sql, "Write-through DELETE");
        let deleted = tx.execute(cx, &delete_sql, &delete_params).await;
        match deleted {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => {
                let _ = tx.rollback(cx).await;
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                let _ = tx.rollback(cx).await;
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                let _ = tx.rollback(cx).await;
                return Outcome::Panicked(p);
            }
        }

        tracing::trace!(sql = %insert_sql, "Write-through INSERT");
        let inserted = tx.execute(cx, &insert_sql, &insert_params).await;
        match inserted {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => {
                let _ = tx.rollback(cx).await;
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                let _ = tx.rollback(cx).await;
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                let _ = tx.rollback(cx).await;
                return Outcome::Panicked(p);
            }
        }

        match tx.commit(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        accessor(owner).assign(target.clone());
        tracing::info!(
            association = assoc.name,
            owner = O::TABLE,
            "Write-through assignment committed"
        );
        Outcome::Ok(())
    }

    // ========================================================================
    // Through-row lookups
    // ========================================================================

    async fn through_row(
        &mut self,
        cx: &Cx,
        owner_pk: Value,
        assoc: &ThroughInfo,
        target_kind: &'static str,
    ) -> Outcome<Option<Row>, Error> {
        let dialect = self.connection.dialect();
        let mut params = vec![owner_pk];
        let mut sql = format!(
            "SELECT * FROM {} WHERE {} = {}",
            dialect.quote_identifier(assoc.through_table),
            dialect.quote_identifier(assoc.owner_key),
            dialect.placeholder(1)
        );
        push_association_predicates(dialect, assoc, target_kind, &mut sql, &mut params);
        sql.push_str(&format!(
            " ORDER BY {} LIMIT 1",
            tie_break_sql(dialect, assoc)
        ));

        self.record_round_trip(assoc.name);
        self.connection.query_one(cx, &sql, &params).await
    }

    async fn through_rows(
        &mut self,
        cx: &Cx,
        owner_keys: &[Value],
        assoc: &ThroughInfo,
        target_kind: &'static str,
    ) -> Outcome<Vec<Row>, Error> {
        let dialect = self.connection.dialect();
        let placeholders: Vec<String> = (1..=owner_keys.len())
            .map(|i| dialect.placeholder(i))
            .collect();
        let mut params = owner_keys.to_vec();
        let mut sql = format!(
            "SELECT * FROM {} WHERE {} IN ({})",
            dialect.quote_identifier(assoc.through_table),
            dialect.quote_identifier(assoc.owner_key),
            placeholders.join(", ")
        );
        push_association_predicates(dialect, assoc, target_kind, &mut sql, &mut params);
        sql.push_str(&format!(" ORDER BY {}", tie_break_sql(dialect, assoc)));

        self.record_round_trip(assoc.name);
        self.connection.query(cx, &sql, &params).await
    }

    /// Follow the intermediate hop for one key, when configured.
    async fn hop_key(
        &mut self,
        cx: &Cx,
        assoc: &ThroughInfo,
        key: Value,
    ) -> Outcome<Option<Value>, Error> {
        let Some(hop) = assoc.intermediate else {
            return Outcome::Ok(Some(key));
        };

        let dialect = self.connection.dialect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {} LIMIT 1",
            dialect.quote_identifier(hop.table),
            dialect.quote_identifier(hop.pk),
            dialect.placeholder(1)
        );

        self.record_round_trip(assoc.name);
        let row = match self.connection.query_one(cx, &sql, &[key]).await {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        Outcome::Ok(row.and_then(|r| {
            r.value_named(hop.target_key)
                .cloned()
                .filter(|v| !v.is_null())
        }))
    }

    /// Follow the intermediate hop for a batch of keys.
    ///
    /// Returns hop-pk hash -> final target key.
    async fn hop_keys(
        &mut self,
        cx: &Cx,
        assoc: &ThroughInfo,
        keys: &[Value],
    ) -> Outcome<HashMap<u64, Value>, Error> {
        let Some(hop) = assoc.intermediate else {
            return Outcome::Ok(HashMap::new());
        };
        if keys.is_empty() {
            return Outcome::Ok(HashMap::new());
        }

        let dialect = self.connection.dialect();
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| dialect.placeholder(i)).collect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({})",
            dialect.quote_identifier(hop.table),
            dialect.quote_identifier(hop.pk),
            placeholders.join(", ")
        );

        self.record_round_trip(assoc.name);
        let rows = match self.connection.query(cx, &sql, keys).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut map = HashMap::new();
        for row in &rows {
            let Some(pk) = row.value_named(hop.pk) else {
                continue;
            };
            if let Some(target_key) = row
                .value_named(hop.target_key)
                .cloned()
                .filter(|v| !v.is_null())
            {
                map.insert(hash_value(pk), target_key);
            }
        }
        Outcome::Ok(map)
    }

    /// Reference-slice variant of [`Session::resolve_through_batch`], used
    /// internally where owners are already borrowed.
    async fn resolve_through_batch_refs<O, T>(
        &mut self,
        cx: &Cx,
        owners: &[&O],
        assoc: &ThroughInfo,
    ) -> Outcome<HashMap<u64, T>, Error>
    where
        O: Record + 'static,
        T: Record + Clone + 'static,
    {
        let mut owner_keys: Vec<Value> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for owner in owners {
            if let Some(pk) = owner.primary_key() {
                if seen.insert(hash_value(&pk)) {
                    owner_keys.push(pk);
                }
            }
        }
        if owner_keys.is_empty() {
            return Outcome::Ok(HashMap::new());
        }

        let rows = match self.through_rows(cx, &owner_keys, assoc, T::KIND).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut winners: HashMap<u64, Option<Value>> = HashMap::new();
        for row in &rows {
            let Some(owner_key) = row.value_named(assoc.owner_key) else {
                continue;
            };
            let owner_hash = hash_value(owner_key);
            if winners.contains_key(&owner_hash) {
                continue;
            }
            if let Err(e) = check_discriminator(assoc, row) {
                return Outcome::Err(e);
            }
            let target_key = row
                .value_named(assoc.target_key)
                .cloned()
                .filter(|v| !v.is_null());
            winners.insert(owner_hash, target_key);
        }

        if assoc.intermediate.is_some() {
            let hop_input: Vec<Value> = winners.values().flatten().cloned().collect();
            let hop_map = match self.hop_keys(cx, assoc, &hop_input).await {
                Outcome::Ok(map) => map,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            for slot in winners.values_mut() {
                *slot = slot
                    .take()
                    .and_then(|key| hop_map.get(&hash_value(&key)).cloned());
            }
        }

        let mut target_keys: Vec<Value> = Vec::new();
        let mut seen_targets = std::collections::HashSet::new();
        for key in winners.values().flatten() {
            if seen_targets.insert(hash_value(key)) {
                target_keys.push(key.clone());
            }
        }

        let mut lookup: HashMap<u64, T> = HashMap::new();
        if !target_keys.is_empty() {
            let dialect = self.connection.dialect();
            let placeholders: Vec<String> = (1..=target_keys.len())
                .map(|i| dialect.placeholder(i))
                .collect();
            let sql = format!(
                "SELECT * FROM {} WHERE {} IN ({})",
                dialect.quote_identifier(assoc.target_table),
                dialect.quote_identifier(assoc.target_pk),
                placeholders.join(", ")
            );

            self.record_round_trip(assoc.name);
            let rows = match self.connection.query(cx, &sql, &target_keys).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            for row in &rows {
                match T::from_row(row) {
                    Ok(obj) => {
                        if let Some(pk) = obj.primary_key() {
                            self.track(&obj);
                            lookup.insert(hash_value(&pk), obj);
                        }
                    }
                    Err(e) => return Outcome::Err(e),
                }
            }
        }

        let mut resolved: HashMap<u64, T> = HashMap::new();
        for (owner_hash, target_key) in winners {
            if let Some(target) = target_key.and_then(|key| lookup.get(&hash_value(&key)).cloned())
            {
                resolved.insert(owner_hash, target);
            }
        }
        Outcome::Ok(resolved)
    }
}

/// Append the association's discriminator and scope predicates.
///
/// Polymorphic filtering is part of the lookup predicate, never a
/// post-filter, so batch and single-access paths return identical results.
fn push_association_predicates(
    dialect: viaduct_core::Dialect,
    assoc: &ThroughInfo,
    target_kind: &str,
    sql: &mut String,
    params: &mut Vec<Value>,
) {
    if let Some(discriminator) = assoc.discriminator {
        let kind = assoc.source_type.unwrap_or(target_kind);
        params.push(Value::Text(kind.to_string()));
        sql.push_str(&format!(
            " AND {} = {}",
            dialect.quote_identifier(discriminator),
            dialect.placeholder(params.len())
        ));
    }
    if let Some(scope) = assoc.scope {
        params.push(scope.equals.to_value());
        sql.push_str(&format!(
            " AND {} = {}",
            dialect.quote_identifier(scope.column),
            dialect.placeholder(params.len())
        ));
    }
}

/// Verify a through row's discriminator names a registered kind.
///
/// Runs at target-fetch time so a stale discriminator fails loudly instead
/// of silently resolving to none.
fn check_discriminator(assoc: &ThroughInfo, row: &Row) -> Result<()> {
    let Some(column) = assoc.discriminator else {
        return Ok(());
    };
    let stored = match row.value_named(column) {
        Some(Value::Text(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.type_name().to_string(),
    };
    if assoc.kind_is_known(&stored) {
        Ok(())
    } else {
        Err(Error::TypeResolution(TypeResolutionError {
            association: assoc.name,
            stored,
            known: assoc.known_kinds,
        }))
    }
}
