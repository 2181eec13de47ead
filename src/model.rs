//! Shared domain types for the document intelligence store.
//!
//! These mirror the relational schema owned by [`crate::store::Store`] plus the
//! read-side view types returned by search and the knowledge graph builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque identifier, unique within its entity kind.
pub type Id = String;

/// Canonical `sha256:<hex>` content hash, see [`crate::hash`].
pub type ContentHash = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = crate::error::StoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::StoreError::MalformedValue {
                field: "documents.status".into(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Id,
    pub path: String,
    pub filename: String,
    pub file_hash: ContentHash,
    pub size_bytes: i64,
    pub doc_type: String,
    pub status: DocumentStatus,
    pub page_count: Option<i64>,
    pub provenance_id: Option<Id>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    Fast,
    Balanced,
    Accurate,
}

impl std::fmt::Display for OcrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Accurate => "accurate",
        };
        write!(f, "{s}")
    }
}

/// `(page, char_start, char_end)` — half-open interval over the OCR text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOffset {
    pub page: i64,
    pub char_start: i64,
    pub char_end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: Id,
    pub document_id: Id,
    pub extracted_text: String,
    pub text_length: i64,
    pub mode: OcrMode,
    pub page_count: i64,
    pub page_offsets: Vec<PageOffset>,
    pub quality_score: f64,
    pub cost_cents: f64,
    pub content_hash: ContentHash,
    pub duration_ms: i64,
    pub provenance_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Complete,
    Failed,
}

/// A single page, or an inclusive multi-page span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageLocation {
    Single(i64),
    Range(i64, i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Id,
    pub document_id: Id,
    pub ocr_result_id: Id,
    pub chunk_index: i64,
    pub character_start: i64,
    pub character_end: i64,
    pub text: String,
    pub text_hash: ContentHash,
    pub page_location: PageLocation,
    pub overlap_with_previous: i64,
    pub overlap_with_next: i64,
    pub is_atomic: bool,
    pub embedding_status: EmbeddingStatus,
    pub provenance_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Table,
    Code,
    Figure,
    TableGroup,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VlmStatus {
    Pending,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Id,
    pub document_id: Id,
    pub ocr_result_id: Id,
    pub page_number: i64,
    pub bbox: BoundingBox,
    pub format: String,
    pub width: i64,
    pub height: i64,
    pub path: String,
    pub block_type: Option<BlockType>,
    pub is_header_footer: bool,
    pub content_hash: ContentHash,
    pub vlm_status: VlmStatus,
    pub vlm_description: Option<String>,
    pub vlm_structured_data: Option<serde_json::Value>,
    pub vlm_confidence: Option<f64>,
    pub vlm_tokens_used: Option<i64>,
    pub error_message: Option<String>,
    pub provenance_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingTask {
    Document,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingSourceKind {
    Chunk,
    Image,
    Extraction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: Id,
    pub chunk_id: Option<Id>,
    pub image_id: Option<Id>,
    pub extraction_id: Option<Id>,
    pub model: String,
    pub model_version: String,
    pub task: EmbeddingTask,
    pub device: String,
    pub source_text: String,
    pub content_hash: ContentHash,
    pub dimension: i64,
    pub provenance_id: Id,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn source_kind(&self) -> Option<EmbeddingSourceKind> {
        if self.chunk_id.is_some() {
            Some(EmbeddingSourceKind::Chunk)
        } else if self.image_id.is_some() {
            Some(EmbeddingSourceKind::Image)
        } else if self.extraction_id.is_some() {
            Some(EmbeddingSourceKind::Extraction)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Hash)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Amount,
    CaseNumber,
    Medication,
    Diagnosis,
    MedicalDevice,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Id,
    pub document_id: Id,
    pub entity_type: EntityType,
    pub raw_text: String,
    pub normalized_text: String,
    pub confidence: f64,
    pub metadata: serde_json::Value,
    pub provenance_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub id: Id,
    pub entity_id: Id,
    pub chunk_id: Id,
    pub page_number: i64,
    pub character_start: i64,
    pub character_end: i64,
    pub context_snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: Id,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub normalized_name: String,
    pub aliases: Vec<String>,
    pub document_count: i64,
    pub mention_count: i64,
    pub edge_count: i64,
    pub avg_confidence: f64,
    pub metadata: serde_json::Value,
    pub provenance_id: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Hash)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    // co-occurrence
    CoMentioned,
    CoLocated,
    // semantic
    WorksAt,
    Represents,
    PartyTo,
    LocatedIn,
    FiledIn,
    Cites,
    References,
    OccurredAt,
    Precedes,
    RelatedTo,
    // medical
    TreatedWith,
    AdministeredVia,
    ManagedBy,
    InteractsWith,
}

impl RelationshipType {
    pub fn is_semantic(self) -> bool {
        matches!(
            self,
            Self::WorksAt
                | Self::Represents
                | Self::PartyTo
                | Self::LocatedIn
                | Self::FiledIn
                | Self::Cites
                | Self::References
                | Self::OccurredAt
                | Self::Precedes
                | Self::RelatedTo
                | Self::TreatedWith
                | Self::AdministeredVia
                | Self::ManagedBy
                | Self::InteractsWith
        )
    }

    pub fn is_co_occurrence(self) -> bool {
        matches!(self, Self::CoMentioned | Self::CoLocated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub id: Id,
    pub source_node_id: Id,
    pub target_node_id: Id,
    pub relationship_type: RelationshipType,
    pub weight: f64,
    pub normalized_weight: f64,
    pub evidence_count: i64,
    pub document_ids: Vec<Id>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub contradiction_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntityLink {
    pub id: Id,
    pub node_id: Id,
    pub entity_id: Id,
    pub similarity_score: f64,
    pub resolution_method: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvenanceType {
    Document,
    OcrResult,
    Chunk,
    Image,
    Embedding,
    VlmDescription,
    EntityExtraction,
    KnowledgeGraph,
    Comparison,
    FormFill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: Id,
    pub record_type: ProvenanceType,
    pub source_type: String,
    pub root_document_id: Id,
    pub content_hash: ContentHash,
    pub input_hash: Option<ContentHash>,
    pub file_hash: Option<ContentHash>,
    pub processor: String,
    pub processor_version: String,
    pub parameters: serde_json::Value,
    pub duration_ms: Option<i64>,
    pub quality_score: Option<f64>,
    pub parent_ids: Vec<Id>,
    pub chain_depth: i64,
    pub chain_path: Vec<ProvenanceType>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagKind {
    Document,
    Chunk,
    Image,
    Extraction,
    Cluster,
}

impl TagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Chunk => "chunk",
            Self::Image => "image",
            Self::Extraction => "extraction",
            Self::Cluster => "cluster",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "document" => Self::Document,
            "chunk" => Self::Chunk,
            "image" => Self::Image,
            "extraction" => Self::Extraction,
            "cluster" => Self::Cluster,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id,
    pub kind: TagKind,
    pub target_id: Id,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub id: Id,
    pub document_a_id: Id,
    pub document_b_id: Id,
    pub similarity_ratio: f64,
    pub text_diff: serde_json::Value,
    pub structural_diff: serde_json::Value,
    pub entity_diff: serde_json::Value,
    pub summary: String,
    pub content_hash: ContentHash,
    pub provenance_id: Id,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate totals cached in `database_metadata`, refreshed on every mutation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub documents: i64,
    pub ocr_results: i64,
    pub chunks: i64,
    pub embeddings: i64,
}

/// Tagged union dispatch key used by the tag system (§9 polymorphism note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedTarget {
    pub kind: TagKind,
    pub id: Id,
}

pub type Metadata = HashMap<String, String>;
