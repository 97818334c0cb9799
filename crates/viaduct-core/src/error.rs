//! Error types for Viaduct operations.

use std::fmt;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all Viaduct operations.
#[derive(Debug)]
pub enum Error {
    /// Association descriptor or call-site misconfiguration (fatal, not retried)
    Config(ConfigError),
    /// Storage lookup/write failures, propagated from the connection
    Storage(StorageError),
    /// A stored discriminator names a target kind outside the registered set
    TypeResolution(TypeResolutionError),
    /// A restricted or unknown member was invoked through the ordinary call path
    Visibility(VisibilityError),
    /// Row decoding / value conversion errors
    Type(TypeError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

/// Bad descriptor at registration, or an assignment call the metadata
/// cannot support.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    /// Table the failing statement targeted, when known.
    pub table: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// A read (SELECT) failed
    Query,
    /// A write (INSERT/UPDATE/DELETE) failed
    Write,
    /// Begin/commit/rollback failed
    Transaction,
    /// The connection itself is unusable
    Connection,
}

/// Discriminator value that does not belong to the association's closed
/// set of registered target kinds.
#[derive(Debug, Clone)]
pub struct TypeResolutionError {
    /// Association name the lookup was resolving.
    pub association: &'static str,
    /// The discriminator value found in storage.
    pub stored: String,
    /// The kinds the descriptor registers.
    pub known: &'static [&'static str],
}

/// Ordinary-path invocation of a member the target does not expose.
///
/// Restricted members render exactly like unknown ones so the proxy never
/// reveals which of the two it hit.
#[derive(Debug, Clone)]
pub struct VisibilityError {
    pub member: String,
    pub target_kind: &'static str,
    pub kind: VisibilityErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityErrorKind {
    /// The member does not exist on the target (or there is no target)
    Undefined,
    /// The member exists but is restricted
    Restricted,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Shorthand for a configuration failure.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    /// Shorthand for a storage failure on a known table.
    pub fn storage(kind: StorageErrorKind, table: &str, message: impl Into<String>) -> Self {
        Error::Storage(StorageError {
            kind,
            table: Some(table.to_string()),
            message: message.into(),
            source: None,
        })
    }

    /// Is this error a retryable condition? Always false at this layer:
    /// retry policy belongs to the connection underneath.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl VisibilityError {
    /// Error for a member the target does not expose at all.
    #[must_use]
    pub fn undefined(member: &str, target_kind: &'static str) -> Self {
        Self {
            member: member.to_string(),
            target_kind,
            kind: VisibilityErrorKind::Undefined,
        }
    }

    /// Error for a restricted member hit without the escape hatch.
    #[must_use]
    pub fn restricted(member: &str, target_kind: &'static str) -> Self {
        Self {
            member: member.to_string(),
            target_kind,
            kind: VisibilityErrorKind::Restricted,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Storage(e) => {
                if let Some(table) = &e.table {
                    write!(f, "Storage error on '{}': {}", table, e.message)
                } else {
                    write!(f, "Storage error: {}", e.message)
                }
            }
            Error::TypeResolution(e) => write!(
                f,
                "Type resolution error in '{}': discriminator '{}' is not a registered kind (known: {})",
                e.association,
                e.stored,
                e.known.join(", ")
            ),
            // Both visibility kinds print the same shape: a restricted member
            // must be indistinguishable from an absent one.
            Error::Visibility(e) => write!(
                f,
                "undefined member '{}' for {}",
                e.member, e.target_kind
            ),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|s| s as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = Error::config("target relation unset");
        assert_eq!(
            err.to_string(),
            "Configuration error: target relation unset"
        );
    }

    #[test]
    fn test_storage_error_display_with_table() {
        let err = Error::storage(StorageErrorKind::Query, "memberships", "connection reset");
        assert_eq!(
            err.to_string(),
            "Storage error on 'memberships': connection reset"
        );
    }

    #[test]
    fn test_type_resolution_error_lists_known_kinds() {
        let err = Error::TypeResolution(TypeResolutionError {
            association: "sponsor_club",
            stored: "Starship".to_string(),
            known: &["member", "club"],
        });
        let msg = err.to_string();
        assert!(msg.contains("'Starship'"));
        assert!(msg.contains("member, club"));
    }

    #[test]
    fn test_visibility_kinds_render_identically() {
        let undefined = Error::Visibility(VisibilityError::undefined("secret_handshake", "club"));
        let restricted = Error::Visibility(VisibilityError::restricted("secret_handshake", "club"));
        assert_eq!(undefined.to_string(), restricted.to_string());
    }

    #[test]
    fn test_never_retryable() {
        assert!(!Error::config("x").is_retryable());
        assert!(!Error::storage(StorageErrorKind::Write, "t", "x").is_retryable());
    }
}
