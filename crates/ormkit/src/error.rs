//! Error types for ormkit
//!
//! ## Error classification
//!
//! `OrmError` variants fall into two categories:
//!
//! **Recoverable** — the caller should match on these and handle them:
//! [`RecordNotFound`](OrmError::RecordNotFound),
//! [`DuplicatedKey`](OrmError::DuplicatedKey),
//! [`ForeignKeyViolated`](OrmError::ForeignKeyViolated),
//! [`CheckConstraintViolated`](OrmError::CheckConstraintViolated).
//!
//! **Configuration / programming errors** — typically propagated with `?`:
//! everything else, from [`MissingWhereClause`](OrmError::MissingWhereClause)
//! to [`Driver`](OrmError::Driver).
//!
//! Errors accumulate on the session during a pipeline run; each subsequent
//! error wraps the previous one ([`Chained`](OrmError::Chained), most recent
//! first) so nothing observed along the way is lost.

use thiserror::Error;

/// Result type alias for ormkit operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for statement construction and execution.
#[derive(Debug, Clone, Error)]
pub enum OrmError {
    // ── Recoverable errors (match and handle) ───────────────────────────────
    /// A single-record find matched zero rows.
    #[error("record not found")]
    RecordNotFound,

    /// Unique constraint violation, translated by the dialect.
    #[error("duplicated key not allowed: {0}")]
    DuplicatedKey(String),

    /// Foreign key constraint violation, translated by the dialect.
    #[error("violates foreign key constraint: {0}")]
    ForeignKeyViolated(String),

    /// Check constraint violation, translated by the dialect.
    #[error("violates check constraint: {0}")]
    CheckConstraintViolated(String),

    // ── Configuration / programming errors ──────────────────────────────────
    /// Commit/rollback without a live transaction, or nested begin when
    /// nested transactions are disabled.
    #[error("invalid transaction")]
    InvalidTransaction,

    /// The dialect or pool lacks a capability.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// UPDATE/DELETE issued without a WHERE clause while global updates are
    /// disallowed.
    #[error("WHERE conditions required")]
    MissingWhereClause,

    /// Preload or join referring to a relationship the schema does not have.
    #[error("unsupported relation: {0}")]
    UnsupportedRelation(String),

    /// A cascade or save path needed a primary key to identify rows.
    #[error("primary key required: {0}")]
    PrimaryKeyRequired(String),

    /// The operation needed a schema but the statement has no model.
    #[error("model value required")]
    ModelValueRequired,

    /// A destination value could not be traversed.
    #[error("unsupported data: {0}")]
    InvalidData(String),

    /// A bind value could not be produced or consumed.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A column could not be mapped onto a record field.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// Duplicate plugin name.
    #[error("plugin already registered: {0}")]
    Registered(String),

    /// Untranslated driver error.
    #[error("driver error: {0}")]
    Driver(String),

    /// Accumulated errors, most recent first.
    #[error("{current}; {earlier}")]
    Chained {
        current: Box<OrmError>,
        earlier: Box<OrmError>,
    },
}

impl OrmError {
    /// Create a driver error from any displayable source.
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver(message.into())
    }

    /// Create an invalid-value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    /// Create an invalid-field error.
    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::InvalidField(message.into())
    }

    /// Create a not-implemented error naming the missing capability.
    pub fn not_implemented(capability: impl Into<String>) -> Self {
        Self::NotImplemented(capability.into())
    }

    /// Wrap `self` over an earlier error, keeping the most recent first.
    pub fn chain(self, earlier: OrmError) -> Self {
        Self::Chained {
            current: Box::new(self),
            earlier: Box::new(earlier),
        }
    }

    /// The most recent error in a chain (or `self` when unchained).
    pub fn current(&self) -> &OrmError {
        match self {
            Self::Chained { current, .. } => current.current(),
            other => other,
        }
    }

    /// Check if this is (or chains) a record-not-found error.
    pub fn is_record_not_found(&self) -> bool {
        self.any(|e| matches!(e, Self::RecordNotFound))
    }

    /// Check if this is a duplicated-key error.
    pub fn is_duplicated_key(&self) -> bool {
        self.any(|e| matches!(e, Self::DuplicatedKey(_)))
    }

    /// Check if this is a missing-WHERE error.
    pub fn is_missing_where_clause(&self) -> bool {
        self.any(|e| matches!(e, Self::MissingWhereClause))
    }

    /// Check if this is an invalid-transaction error.
    pub fn is_invalid_transaction(&self) -> bool {
        self.any(|e| matches!(e, Self::InvalidTransaction))
    }

    /// Returns `true` if this error is recoverable (the caller should handle
    /// it rather than propagate).
    pub fn is_recoverable(&self) -> bool {
        self.any(|e| {
            matches!(
                e,
                Self::RecordNotFound
                    | Self::DuplicatedKey(_)
                    | Self::ForeignKeyViolated(_)
                    | Self::CheckConstraintViolated(_)
            )
        })
    }

    fn any(&self, pred: impl Fn(&OrmError) -> bool + Copy) -> bool {
        match self {
            Self::Chained { current, earlier } => current.any(pred) || earlier.any(pred),
            other => pred(other),
        }
    }
}

/// Emit an ormkit warning through tracing.
pub(crate) fn ormkit_warn(msg: &str) {
    tracing::warn!(target: "ormkit", "{}", msg);
}
