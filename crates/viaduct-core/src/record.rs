//! Record trait for table-mapped entities.
//!
//! `Record` is the contract between the resolution engine and the
//! application's entity structs: table/key metadata, row conversion, and
//! the registered has-one-through associations.

use crate::association::ThroughInfo;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Trait for types mapped to a database table.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Member {
///     id: Option<i64>,
///     name: String,
///     club: ThroughOne<Club>,
/// }
///
/// impl Record for Member {
///     const TABLE: &'static str = "members";
///     const PRIMARY_KEY: &'static str = "id";
///     const KIND: &'static str = "member";
///     const THROUGH: &'static [ThroughInfo] = &[CLUB];
///     // from_row / to_row / primary_key ...
/// }
/// ```
pub trait Record: Sized + Send + Sync {
    /// The name of the database table.
    const TABLE: &'static str;

    /// The primary key column name.
    const PRIMARY_KEY: &'static str = "id";

    /// Logical kind name, as stored in discriminator columns that point at
    /// this record type.
    const KIND: &'static str;

    /// Column names, in table order. Used to build stable projections
    /// (plain and aliased) without runtime reflection.
    const COLUMNS: &'static [&'static str];

    /// Has-one-through associations registered on this record.
    ///
    /// Validated by `Session::register`; records with none can rely on the
    /// default empty slice.
    const THROUGH: &'static [ThroughInfo] = &[];

    /// Construct an instance from a storage row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Convert this instance to named column values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// The persisted primary key, or `None` for an unsaved instance.
    fn primary_key(&self) -> Option<Value>;

    /// Whether this instance has never been persisted.
    fn is_new(&self) -> bool {
        self.primary_key().is_none()
    }
}

/// Find a registered association by name on a record type.
#[must_use]
pub fn find_through<M: Record>(name: &str) -> Option<&'static ThroughInfo> {
    M::THROUGH.iter().find(|a| a.name == name)
}
