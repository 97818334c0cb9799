//! Caller-supplied filter and ordering clauses.
//!
//! The planner inspects these to choose an eager-loading strategy: a
//! clause qualified with a table other than the owner's own forces the
//! join fallback, because a decomposed preload cannot apply it before
//! knowing which rows will be fetched.

use viaduct_core::{Dialect, Value};

/// Comparison operator for a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl CondOp {
    #[must_use]
    const fn as_sql(self) -> &'static str {
        match self {
            CondOp::Eq => "=",
            CondOp::Ne => "<>",
            CondOp::Gt => ">",
            CondOp::Ge => ">=",
            CondOp::Lt => "<",
            CondOp::Le => "<=",
            CondOp::Like => "LIKE",
        }
    }
}

/// A single filter condition, optionally qualified with a table name.
#[derive(Debug, Clone)]
pub struct Cond {
    /// Table qualifier; unqualified conditions belong to the owner table.
    pub table: Option<String>,
    pub column: String,
    pub op: CondOp,
    pub value: Value,
}

impl Cond {
    /// An unqualified condition on the owner's own table.
    #[must_use]
    pub fn col(column: impl Into<String>, op: CondOp, value: impl Into<Value>) -> Self {
        Self {
            table: None,
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// A table-qualified condition.
    #[must_use]
    pub fn table_col(
        table: impl Into<String>,
        column: impl Into<String>,
        op: CondOp,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality shorthand on the owner's own table.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::col(column, CondOp::Eq, value)
    }

    /// Whether this condition references a table other than `owner_table`.
    #[must_use]
    pub fn references_foreign_table(&self, owner_table: &str) -> bool {
        self.table.as_deref().is_some_and(|t| t != owner_table)
    }

    /// Render as SQL with the given 1-based placeholder index.
    ///
    /// The bound value is `self.value`; callers collect it in clause order.
    #[must_use]
    pub fn to_sql(&self, dialect: Dialect, owner_table: &str, placeholder_index: usize) -> String {
        let column = match &self.table {
            Some(table) => dialect.quote_qualified(table, &self.column),
            None => dialect.quote_qualified(owner_table, &self.column),
        };
        format!(
            "{} {} {}",
            column,
            self.op.as_sql(),
            dialect.placeholder(placeholder_index)
        )
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// An ORDER BY entry, optionally qualified with a table name.
#[derive(Debug, Clone)]
pub struct Ordering {
    /// Table qualifier; unqualified orderings belong to the owner table.
    pub table: Option<String>,
    pub column: String,
    pub direction: OrderDirection,
}

impl Ordering {
    /// Ascending order on an owner-table column.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending order on an owner-table column.
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Qualify this ordering with a table name.
    #[must_use]
    pub fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Whether this ordering references a table other than `owner_table`.
    #[must_use]
    pub fn references_foreign_table(&self, owner_table: &str) -> bool {
        self.table.as_deref().is_some_and(|t| t != owner_table)
    }

    /// Render as SQL.
    #[must_use]
    pub fn to_sql(&self, dialect: Dialect, owner_table: &str) -> String {
        let column = match &self.table {
            Some(table) => dialect.quote_qualified(table, &self.column),
            None => dialect.quote_qualified(owner_table, &self.column),
        };
        let dir = match self.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        format!("{column} {dir}")
    }
}
