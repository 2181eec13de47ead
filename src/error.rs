//! Error handling for the document intelligence store.
//!
//! Mirrors the closed error-category set from the external RPC contract (§6 of
//! the spec) so that a façade sitting outside this crate can map any
//! [`DocProvError`] straight onto a protocol error without re-deriving categories.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocProvError>;

/// Closed set of error categories a façade maps onto wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ValidationError,
    DatabaseNotFound,
    DatabaseNotSelected,
    DatabaseAlreadyExists,
    DocumentNotFound,
    ProvenanceNotFound,
    ProvenanceChainBroken,
    IntegrityVerificationFailed,
    OcrApiError,
    OcrRateLimit,
    OcrTimeout,
    EmbeddingFailed,
    GpuNotAvailable,
    VlmApiError,
    VlmRateLimit,
    ImageExtractionFailed,
    ClusteringError,
    PathNotFound,
    PathNotDirectory,
    PermissionDenied,
    InternalError,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseNotSelected => "DATABASE_NOT_SELECTED",
            Self::DatabaseAlreadyExists => "DATABASE_ALREADY_EXISTS",
            Self::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            Self::ProvenanceNotFound => "PROVENANCE_NOT_FOUND",
            Self::ProvenanceChainBroken => "PROVENANCE_CHAIN_BROKEN",
            Self::IntegrityVerificationFailed => "INTEGRITY_VERIFICATION_FAILED",
            Self::OcrApiError => "OCR_API_ERROR",
            Self::OcrRateLimit => "OCR_RATE_LIMIT",
            Self::OcrTimeout => "OCR_TIMEOUT",
            Self::EmbeddingFailed => "EMBEDDING_FAILED",
            Self::GpuNotAvailable => "GPU_NOT_AVAILABLE",
            Self::VlmApiError => "VLM_API_ERROR",
            Self::VlmRateLimit => "VLM_RATE_LIMIT",
            Self::ImageExtractionFailed => "IMAGE_EXTRACTION_FAILED",
            Self::ClusteringError => "CLUSTERING_ERROR",
            Self::PathNotFound => "PATH_NOT_FOUND",
            Self::PathNotDirectory => "PATH_NOT_DIRECTORY",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Top-level error aggregating every component's error enum.
#[derive(Error, Debug)]
pub enum DocProvError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provenance error: {0}")]
    Provenance(#[from] ProvenanceError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("knowledge graph error: {0}")]
    Kg(#[from] KgError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("path is not a directory: {0}")]
    PathNotDirectory(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DocProvError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Provenance(e) => e.category(),
            Self::Pipeline(e) => e.category(),
            Self::Search(e) => e.category(),
            Self::Kg(_) => ErrorCategory::ClusteringError,
            Self::Backend(e) => e.category(),
            Self::Validation(_) => ErrorCategory::ValidationError,
            Self::PathNotFound(_) => ErrorCategory::PathNotFound,
            Self::PathNotDirectory(_) => ErrorCategory::PathNotDirectory,
            Self::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) | Self::Sqlx(_) => {
                ErrorCategory::InternalError
            }
        }
    }

    /// Whether the failure is worth retrying automatically (resource-class errors only).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::OcrRateLimit
                | ErrorCategory::OcrTimeout
                | ErrorCategory::VlmRateLimit
                | ErrorCategory::GpuNotAvailable
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("foreign key violation: {relation}")]
    ForeignKeyViolation { relation: String },

    #[error("database not selected")]
    NotSelected,

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("database already exists: {0}")]
    DatabaseAlreadyExists(String),

    #[error("malformed stored value in {field}: {value}")]
    MalformedValue { field: String, value: String },

    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DocumentNotFound(_) => ErrorCategory::DocumentNotFound,
            Self::NotSelected => ErrorCategory::DatabaseNotSelected,
            Self::DatabaseNotFound(_) => ErrorCategory::DatabaseNotFound,
            Self::DatabaseAlreadyExists(_) => ErrorCategory::DatabaseAlreadyExists,
            Self::NotFound { .. }
            | Self::ForeignKeyViolation { .. }
            | Self::MalformedValue { .. }
            | Self::MigrationFailed { .. }
            | Self::Sqlx(_) => ErrorCategory::InternalError,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvenanceError {
    #[error("provenance record not found: {0}")]
    NotFound(String),

    #[error("parent provenance record not persisted: {0}")]
    MissingParent(String),

    #[error("chain depth invariant violated: expected {expected}, got {actual}")]
    DepthInvariant { expected: i64, actual: i64 },

    #[error("integrity verification failed for {item_id}: expected {expected}, computed {computed}")]
    HashMismatch {
        item_id: String,
        expected: String,
        computed: String,
    },

    #[error("chain broken at record {0}: input_hash does not match any parent content_hash")]
    ChainBroken(String),
}

impl ProvenanceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound(_) => ErrorCategory::ProvenanceNotFound,
            Self::MissingParent(_) | Self::DepthInvariant { .. } | Self::ChainBroken(_) => {
                ErrorCategory::ProvenanceChainBroken
            }
            Self::HashMismatch { .. } => ErrorCategory::IntegrityVerificationFailed,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("document {document_id} is not eligible for stage {stage}: currently {status}")]
    InvalidState {
        document_id: String,
        stage: &'static str,
        status: String,
    },

    #[error("stage {stage} requires {dependency} which is missing for document {document_id}")]
    MissingDependency {
        document_id: String,
        stage: &'static str,
        dependency: &'static str,
    },

    #[error("stage {stage} failed for document {document_id}: {reason}")]
    StageFailed {
        document_id: String,
        stage: &'static str,
        reason: String,
    },
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidState { .. } | Self::MissingDependency { .. } => ErrorCategory::ValidationError,
            Self::StageFailed { .. } => ErrorCategory::InternalError,
        }
    }
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("empty query after tokenization")]
    EmptyQuery,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector index error: {0}")]
    VectorIndex(String),

    #[error("fts index error: {0}")]
    FtsIndex(String),

    #[error("reranker error: {0}")]
    Rerank(String),
}

impl SearchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EmptyQuery => ErrorCategory::ValidationError,
            Self::DimensionMismatch { .. } => ErrorCategory::EmbeddingFailed,
            Self::VectorIndex(_) | Self::FtsIndex(_) | Self::Rerank(_) => ErrorCategory::InternalError,
        }
    }
}

#[derive(Error, Debug)]
pub enum KgError {
    #[error("unknown entity type for resolution: {0}")]
    UnknownEntityType(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("edge weight normalization failed: {0}")]
    NormalizationFailed(String),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("OCR API error: {0}")]
    OcrApi(String),

    #[error("OCR rate limited")]
    OcrRateLimit,

    #[error("OCR timed out after {0:?}")]
    OcrTimeout(std::time::Duration),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("GPU not available")]
    GpuNotAvailable,

    #[error("VLM API error: {0}")]
    VlmApi(String),

    #[error("VLM rate limited")]
    VlmRateLimit,

    #[error("image extraction failed: {0}")]
    ImageExtractionFailed(String),

    #[error("circuit breaker open, rejecting call to {0}")]
    CircuitOpen(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BackendError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::OcrApi(_) => ErrorCategory::OcrApiError,
            Self::OcrRateLimit => ErrorCategory::OcrRateLimit,
            Self::OcrTimeout(_) => ErrorCategory::OcrTimeout,
            Self::EmbeddingFailed(_) => ErrorCategory::EmbeddingFailed,
            Self::GpuNotAvailable => ErrorCategory::GpuNotAvailable,
            Self::VlmApi(_) => ErrorCategory::VlmApiError,
            Self::VlmRateLimit => ErrorCategory::VlmRateLimit,
            Self::ImageExtractionFailed(_) => ErrorCategory::ImageExtractionFailed,
            Self::CircuitOpen(_) | Self::Http(_) => ErrorCategory::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_maps_to_wire_code() {
        let err = DocProvError::Store(StoreError::DocumentNotFound("doc-1".into()));
        assert_eq!(err.category().as_str(), "DOCUMENT_NOT_FOUND");
    }

    #[test]
    fn hash_mismatch_is_not_retryable() {
        let err = DocProvError::Provenance(ProvenanceError::HashMismatch {
            item_id: "ocr-1".into(),
            expected: "sha256:a".into(),
            computed: "sha256:b".into(),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.category().as_str(), "INTEGRITY_VERIFICATION_FAILED");
    }

    #[test]
    fn ocr_timeout_is_retryable() {
        let err = DocProvError::Backend(BackendError::OcrTimeout(std::time::Duration::from_secs(1)));
        assert!(err.is_retryable());
    }
}
