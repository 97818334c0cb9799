//! Eager-load planning.
//!
//! Given a batch fetch request, the planner decides between two
//! strategies:
//!
//! - **Preload** (default): separate lookups for owners, through rows, and
//!   targets, combined in memory. Valid only while every caller clause
//!   references the owner's own table.
//! - **Join**: a single query across owner, through, and target tables.
//!   Forced when a caller condition or ordering references the through or
//!   target table, since the preload cannot apply such a clause before
//!   knowing which rows will be fetched.
//!
//! Both strategies return the same logical associations for rows
//! satisfying the combined predicate; the session layer populates proxies
//! identically for either.

use viaduct_core::{Dialect, Row, ThroughInfo, Value};

use crate::clause::{Cond, Ordering};

/// The strategy chosen for one eager-load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EagerStrategy {
    /// Decomposed multi-query loading, joined in memory.
    Preload,
    /// Single joined query across owner/through/target tables.
    Join,
}

/// A batch fetch request: owner-query parameters plus whatever extra
/// clauses the caller supplies.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub conds: Vec<Cond>,
    pub order: Vec<Ordering>,
    pub limit: Option<u64>,
}

impl FetchRequest {
    /// Create an empty request (fetch all owners).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter condition.
    #[must_use]
    pub fn filter(mut self, cond: Cond) -> Self {
        self.conds.push(cond);
        self
    }

    /// Add an ordering clause.
    #[must_use]
    pub fn order_by(mut self, order: Ordering) -> Self {
        self.order.push(order);
        self
    }

    /// Limit the number of owners fetched.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Decide the eager-load strategy for a request.
///
/// Join is required as soon as any clause references a table other than
/// the owner's own; otherwise the decomposed preload applies.
#[must_use]
pub fn choose_strategy(owner_table: &str, request: &FetchRequest) -> EagerStrategy {
    let needs_join = request
        .conds
        .iter()
        .any(|c| c.references_foreign_table(owner_table))
        || request
            .order
            .iter()
            .any(|o| o.references_foreign_table(owner_table));

    let strategy = if needs_join {
        EagerStrategy::Join
    } else {
        EagerStrategy::Preload
    };
    tracing::debug!(
        owner_table = owner_table,
        conds = request.conds.len(),
        order = request.order.len(),
        strategy = ?strategy,
        "Eager-load strategy chosen"
    );
    strategy
}

/// Build the owner-only SELECT used by the preload strategy.
///
/// Every clause must reference the owner table; [`choose_strategy`]
/// guarantees that before this is called.
#[must_use]
pub fn build_owner_select(
    dialect: Dialect,
    owner_table: &str,
    request: &FetchRequest,
) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT * FROM {}", dialect.quote_identifier(owner_table));
    let mut params = Vec::new();

    if !request.conds.is_empty() {
        let clauses: Vec<String> = request
            .conds
            .iter()
            .enumerate()
            .map(|(i, c)| c.to_sql(dialect, owner_table, i + 1))
            .collect();
        params.extend(request.conds.iter().map(|c| c.value.clone()));
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !request.order.is_empty() {
        let orders: Vec<String> = request
            .order
            .iter()
            .map(|o| o.to_sql(dialect, owner_table))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&orders.join(", "));
    }

    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    (sql, params)
}

/// Generate aliased column parts for a joined projection.
///
/// Each column is prefixed with its table name (`table__column`) so the
/// joined row can be decomposed per table afterwards.
#[must_use]
pub fn alias_column_parts(dialect: Dialect, table: &str, columns: &[&str]) -> Vec<String> {
    columns
        .iter()
        .map(|col| {
            format!(
                "{} AS {}",
                dialect.quote_qualified(table, col),
                dialect.quote_identifier(&format!("{table}__{col}"))
            )
        })
        .collect()
}

/// Extract one table's sub-row from a joined, alias-prefixed row.
///
/// Returns a row whose columns carry their plain names again, ready for
/// `Record::from_row`.
#[must_use]
pub fn subrow(row: &Row, table: &str) -> Row {
    let prefix = format!("{table}__");
    let mut names = Vec::new();
    let mut values = Vec::new();
    for (i, name) in row.columns().names().iter().enumerate() {
        if let Some(stripped) = name.strip_prefix(&prefix) {
            names.push(stripped.to_string());
            if let Some(value) = row.value_at(i) {
                values.push(value.clone());
            }
        }
    }
    Row::new(names, values)
}

/// Build the single joined SELECT for the join fallback strategy.
///
/// Through-row predicates (owner key match, discriminator, scope) live in
/// the `ON` clauses so polymorphic filtering happens in the query itself,
/// never as a post-filter. The association's tie-break is appended after
/// the caller's ordering, so the caller's ordering wins when present.
///
/// `target_kind` supplies the discriminator value for polymorphic
/// associations without an explicit source type.
#[must_use]
pub fn build_join_select(
    dialect: Dialect,
    owner_table: &str,
    owner_pk: &str,
    owner_columns: &[&str],
    assoc: &ThroughInfo,
    target_columns: &[&str],
    target_kind: &str,
    request: &FetchRequest,
) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let mut projection = alias_column_parts(dialect, owner_table, owner_columns);
    projection.extend(alias_column_parts(
        dialect,
        assoc.target_table,
        target_columns,
    ));

    // Through join: owner key match plus the association's own predicates.
    let mut through_on = format!(
        "{} = {}",
        dialect.quote_qualified(assoc.through_table, assoc.owner_key),
        dialect.quote_qualified(owner_table, owner_pk)
    );
    if let Some(discriminator) = assoc.discriminator {
        let kind = assoc.source_type.unwrap_or(target_kind);
        params.push(Value::Text(kind.to_string()));
        through_on.push_str(&format!(
            " AND {} = {}",
            dialect.quote_qualified(assoc.through_table, discriminator),
            dialect.placeholder(params.len())
        ));
    }
    if let Some(scope) = assoc.scope {
        params.push(scope.equals.to_value());
        through_on.push_str(&format!(
            " AND {} = {}",
            dialect.quote_qualified(assoc.through_table, scope.column),
            dialect.placeholder(params.len())
        ));
    }

    let mut sql = format!(
        "SELECT {} FROM {} LEFT JOIN {} ON {}",
        projection.join(", "),
        dialect.quote_identifier(owner_table),
        dialect.quote_identifier(assoc.through_table),
        through_on
    );

    // Target join, via the intermediate hop when one is configured.
    if let Some(hop) = assoc.intermediate {
        sql.push_str(&format!(
            " LEFT JOIN {} ON {} = {}",
            dialect.quote_identifier(hop.table),
            dialect.quote_qualified(hop.table, hop.pk),
            dialect.quote_qualified(assoc.through_table, assoc.target_key)
        ));
        sql.push_str(&format!(
            " LEFT JOIN {} ON {} = {}",
            dialect.quote_identifier(assoc.target_table),
            dialect.quote_qualified(assoc.target_table, assoc.target_pk),
            dialect.quote_qualified(hop.table, hop.target_key)
        ));
    } else {
        sql.push_str(&format!(
            " LEFT JOIN {} ON {} = {}",
            dialect.quote_identifier(assoc.target_table),
            dialect.quote_qualified(assoc.target_table, assoc.target_pk),
            dialect.quote_qualified(assoc.through_table, assoc.target_key)
        ));
    }

    if !request.conds.is_empty() {
        let offset = params.len();
        let clauses: Vec<String> = request
            .conds
            .iter()
            .enumerate()
            .map(|(i, c)| c.to_sql(dialect, owner_table, offset + i + 1))
            .collect();
        params.extend(request.conds.iter().map(|c| c.value.clone()));
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    let mut orders: Vec<String> = request
        .order
        .iter()
        .map(|o| o.to_sql(dialect, owner_table))
        .collect();
    orders.push(tie_break_sql(dialect, assoc));
    sql.push_str(" ORDER BY ");
    sql.push_str(&orders.join(", "));

    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    (sql, params)
}

/// The through-row tie-break: the association's explicit ordering, or
/// newest-first on the through primary key.
#[must_use]
pub fn tie_break_sql(dialect: Dialect, assoc: &ThroughInfo) -> String {
    match assoc.order_by {
        Some(order) => format!(
            "{} {}",
            dialect.quote_qualified(assoc.through_table, order.column),
            if order.descending { "DESC" } else { "ASC" }
        ),
        None => format!(
            "{} DESC",
            dialect.quote_qualified(assoc.through_table, assoc.through_pk)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::CondOp;
    use viaduct_core::ThroughOrder;

    const CLUB: ThroughInfo =
        ThroughInfo::new("club", "memberships", "member_id", "clubs", "club_id");

    const SPONSOR_CLUB: ThroughInfo =
        ThroughInfo::new("sponsor_club", "sponsorships", "backed_id", "clubs", "club_id")
            .discriminator("backed_kind")
            .source_type("member")
            .known_kinds(&["member", "club"]);

    #[test]
    fn test_owner_only_clauses_preload() {
        let request = FetchRequest::new()
            .filter(Cond::eq("name", "Groucho Marx"))
            .order_by(Ordering::asc("name"));
        assert_eq!(choose_strategy("members", &request), EagerStrategy::Preload);
    }

    #[test]
    fn test_qualified_owner_clauses_still_preload() {
        let request =
            FetchRequest::new().filter(Cond::table_col("members", "name", CondOp::Eq, "Groucho Marx"));
        assert_eq!(choose_strategy("members", &request), EagerStrategy::Preload);
    }

    #[test]
    fn test_foreign_cond_forces_join() {
        let request =
            FetchRequest::new().filter(Cond::table_col("clubs", "name", CondOp::Eq, "Marx Bros"));
        assert_eq!(choose_strategy("members", &request), EagerStrategy::Join);
    }

    #[test]
    fn test_foreign_order_forces_join() {
        let request = FetchRequest::new()
            .filter(Cond::eq("name", "Groucho Marx"))
            .order_by(Ordering::asc("name").on_table("clubs"));
        assert_eq!(choose_strategy("members", &request), EagerStrategy::Join);
    }

    #[test]
    fn test_owner_select_sql() {
        let request = FetchRequest::new()
            .filter(Cond::eq("name", "Groucho Marx"))
            .limit(10);
        let (sql, params) = build_owner_select(Dialect::Postgres, "members", &request);
        assert_eq!(
            sql,
            "SELECT * FROM \"members\" WHERE \"members\".\"name\" = $1 LIMIT 10"
        );
        assert_eq!(params, vec![Value::Text("Groucho Marx".to_string())]);
    }

    #[test]
    fn test_join_select_direct_chain() {
        let request = FetchRequest::new()
            .filter(Cond::eq("name", "Groucho Marx"))
            .order_by(Ordering::desc("name").on_table("clubs"));
        let (sql, params) = build_join_select(
            Dialect::Postgres,
            "members",
            "id",
            &["id", "name"],
            &CLUB,
            &["id", "name"],
            "club",
            &request,
        );

        assert!(sql.contains("\"members\".\"id\" AS \"members__id\""));
        assert!(sql.contains("\"clubs\".\"name\" AS \"clubs__name\""));
        assert!(sql.contains(
            "LEFT JOIN \"memberships\" ON \"memberships\".\"member_id\" = \"members\".\"id\""
        ));
        assert!(sql.contains("LEFT JOIN \"clubs\" ON \"clubs\".\"id\" = \"memberships\".\"club_id\""));
        assert!(sql.contains("WHERE \"members\".\"name\" = $1"));
        // Caller ordering first, then the recency tie-break.
        assert!(sql.contains("ORDER BY \"clubs\".\"name\" DESC, \"memberships\".\"id\" DESC"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_join_select_polymorphic_filters_in_on_clause() {
        let request = FetchRequest::new().filter(Cond::eq("name", "Groucho Marx"));
        let (sql, params) = build_join_select(
            Dialect::Postgres,
            "members",
            "id",
            &["id", "name"],
            &SPONSOR_CLUB,
            &["id", "name"],
            "club",
            &request,
        );

        // Discriminator is a join predicate, bound before caller conditions.
        assert!(sql.contains("AND \"sponsorships\".\"backed_kind\" = $1"));
        assert!(sql.contains("WHERE \"members\".\"name\" = $2"));
        assert_eq!(params[0], Value::Text("member".to_string()));
    }

    #[test]
    fn test_tie_break_respects_explicit_order() {
        let assoc = CLUB.order_by(ThroughOrder::asc("joined_on"));
        assert_eq!(
            tie_break_sql(Dialect::Postgres, &assoc),
            "\"memberships\".\"joined_on\" ASC"
        );
        assert_eq!(
            tie_break_sql(Dialect::Postgres, &CLUB),
            "\"memberships\".\"id\" DESC"
        );
    }

    #[test]
    fn test_subrow_strips_alias_prefix() {
        let row = Row::new(
            vec![
                "members__id".to_string(),
                "members__name".to_string(),
                "clubs__id".to_string(),
                "clubs__name".to_string(),
            ],
            vec![
                Value::Int(1),
                Value::Text("Groucho Marx".to_string()),
                Value::Int(2),
                Value::Text("Moustache and Eyebrow Fancier Club".to_string()),
            ],
        );

        let member = subrow(&row, "members");
        assert_eq!(member.get_named::<i64>("id").unwrap(), 1);
        let club = subrow(&row, "clubs");
        assert_eq!(
            club.get_named::<String>("name").unwrap(),
            "Moustache and Eyebrow Fancier Club"
        );
    }
}
