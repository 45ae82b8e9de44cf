use docweave_core_types::{CycleId, TransactionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using DocweaveError
pub type Result<T> = std::result::Result<T, DocweaveError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Stable classification of every error raised by the reconciliation and
/// transaction loop. Each kind maps to an `ERR_*` code used in logs and in
/// tests; kinds are also nameable from configuration (`abort_on`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExErrorKind {
    // User input
    InvalidInput,
    MissingInput,

    // Store content
    NotFound,
    AlreadyExists,

    // Reconstruction outcome
    Cancelled,
    DomainWarning,

    // Transactions
    TransactionRefused,
    InvalidTransactionState,

    // Integration/IO
    Persistence,
    Serialization,
    InvalidConfig,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::MissingInput => "ERR_MISSING_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::DomainWarning => "ERR_DOMAIN_WARNING",
            ExErrorKind::TransactionRefused => "ERR_TRANSACTION_REFUSED",
            ExErrorKind::InvalidTransactionState => "ERR_INVALID_TRANSACTION_STATE",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::InvalidConfig => "ERR_INVALID_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries a classification for programmatic handling plus the document,
/// entity, and correlation context that was available where it was raised.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    document_id: Option<String>,
    entity_id: Option<u64>,
    cycle_id: Option<CycleId>,
    transaction_id: Option<TransactionId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            document_id: None,
            entity_id: None,
            cycle_id: None,
            transaction_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add document context
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document_id = Some(document.into());
        self
    }

    /// Add entity identity-token context
    pub fn with_entity(mut self, entity: u64) -> Self {
        self.entity_id = Some(entity);
        self
    }

    pub fn with_cycle_id(mut self, cycle_id: CycleId) -> Self {
        self.cycle_id = Some(cycle_id);
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn entity_id(&self) -> Option<u64> {
        self.entity_id
    }

    pub fn cycle_id(&self) -> Option<&CycleId> {
        self.cycle_id.as_ref()
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(document_id) = &self.document_id {
            write!(f, " (document_id: {})", document_id)?;
        }
        if let Some(entity_id) = self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for docweave operations
///
/// Reconstruction code raises these at the throw site; the reconciler turns
/// them into diagnostics through one exhaustive match.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocweaveError {
    // ===== User input =====
    /// A required input carried no data (null passed by the graph runtime)
    #[error("Missing input: {param}")]
    MissingInput { param: String },

    /// An input value is out of range or otherwise invalid
    #[error("Invalid input '{param}': {reason}")]
    InvalidInput { param: String, reason: String },

    // ===== Domain outcomes =====
    /// A non-fatal domain condition the user should know about
    #[error("{message}")]
    Warning { message: String },

    /// Reconstruction was cancelled deliberately
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// An untracked entity already owns the requested name
    #[error("Name already in use: {name}")]
    NameInUse { name: String },

    // ===== Store content =====
    #[error("Document not found: {document}")]
    DocumentNotFound { document: String },

    #[error("Entity {entity} not found in document {document}")]
    EntityNotFound { document: String, entity: u64 },

    // ===== Transactions =====
    /// The store refused to start a transaction
    #[error("Transaction refused on document {document}: {reason}")]
    TransactionRefused { document: String, reason: String },

    /// An operation that needs an open transaction ran outside one
    #[error("No transaction started on document {document}")]
    TransactionNotStarted { document: String },

    /// A transaction value was used after reaching a terminal state
    #[error("Transaction {transaction} is {status}, expected Started")]
    InvalidTransactionState { transaction: String, status: String },

    /// Sub-transaction commit/rollback without a matching begin
    #[error("No sub-transaction open on document {document}")]
    NoSubTransaction { document: String },

    // ===== Integration =====
    #[error("Persistence error in {op}: {message}")]
    Persistence { op: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // ===== Internal =====
    /// A programming error; aborts the whole batch
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DocweaveError {
    /// The canonical kind this error maps to
    pub fn kind(&self) -> ExErrorKind {
        match self {
            DocweaveError::MissingInput { .. } => ExErrorKind::MissingInput,
            DocweaveError::InvalidInput { .. } => ExErrorKind::InvalidInput,
            DocweaveError::Warning { .. } => ExErrorKind::DomainWarning,
            DocweaveError::Cancelled { .. } => ExErrorKind::Cancelled,
            DocweaveError::NameInUse { .. } => ExErrorKind::AlreadyExists,
            DocweaveError::DocumentNotFound { .. } | DocweaveError::EntityNotFound { .. } => {
                ExErrorKind::NotFound
            }
            DocweaveError::TransactionRefused { .. } => ExErrorKind::TransactionRefused,
            DocweaveError::TransactionNotStarted { .. }
            | DocweaveError::InvalidTransactionState { .. }
            | DocweaveError::NoSubTransaction { .. } => ExErrorKind::InvalidTransactionState,
            DocweaveError::Persistence { .. } => ExErrorKind::Persistence,
            DocweaveError::Serialization { .. } => ExErrorKind::Serialization,
            DocweaveError::InvalidConfig { .. } => ExErrorKind::InvalidConfig,
            DocweaveError::Internal { .. } => ExErrorKind::Internal,
        }
    }
}

/// Conversion from DocweaveError to ExError
impl From<DocweaveError> for ExError {
    fn from(err: DocweaveError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            DocweaveError::DocumentNotFound { document }
            | DocweaveError::TransactionRefused { document, .. }
            | DocweaveError::TransactionNotStarted { document }
            | DocweaveError::NoSubTransaction { document } => ExError::new(kind)
                .with_document(document)
                .with_message(message),

            DocweaveError::EntityNotFound { document, entity } => ExError::new(kind)
                .with_document(document)
                .with_entity(entity)
                .with_message(message),

            DocweaveError::Persistence { op, .. } => {
                ExError::new(kind).with_op(op).with_message(message)
            }

            DocweaveError::MissingInput { .. }
            | DocweaveError::InvalidInput { .. }
            | DocweaveError::Warning { .. }
            | DocweaveError::Cancelled { .. }
            | DocweaveError::NameInUse { .. }
            | DocweaveError::InvalidTransactionState { .. }
            | DocweaveError::Serialization { .. }
            | DocweaveError::InvalidConfig { .. }
            | DocweaveError::Internal { .. } => ExError::new(kind).with_message(message),
        }
    }
}

/// Conversion from serde_json::Error to DocweaveError
impl From<serde_json::Error> for DocweaveError {
    fn from(err: serde_json::Error) -> Self {
        DocweaveError::Serialization {
            message: err.to_string(),
        }
    }
}
