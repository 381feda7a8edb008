
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One complete build of the reference index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IndexGeneration {
    pub generation: i64,
    pub embedding_model: String,
    pub dimension: i64,
    pub document_count: i64,
    pub passage_count: i64,
    pub created_at: NaiveDateTime,
}

impl std::fmt::Display for IndexGeneration {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "generation {} ({}, {} documents, {} passages)",
            self.generation, self.embedding_model, self.document_count, self.passage_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentRecord {
    pub generation: i64,
    pub document_id: String,
    pub title: String,
    pub content_hash: String,
    pub byte_len: i64,
    pub document_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub document_id: String,
    pub title: String,
    pub content_hash: String,
    pub byte_len: i64,
    pub document_order: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PassageRecord {
    pub id: i64,
    pub generation: i64,
    pub document_id: String,
    pub document_order: i64,
    pub passage_index: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub heading: String,
    pub raw_text: String,
    pub embedding: Vec<u8>,
}

impl PassageRecord {
    /// Decoded embedding vector
    #[inline]
    pub fn vector(&self) -> Vec<f32> {
        decode_embedding(&self.embedding)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPassage {
    pub document_id: String,
    pub document_order: i64,
    pub passage_index: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub heading: String,
    pub raw_text: String,
    pub embedding: Vec<f32>,
}

/// Little-endian f32 encoding used for the embedding BLOB column
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]; trailing partial values are ignored
#[inline]
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(chunk);
            f32::from_le_bytes(raw)
        })
        .collect()
}
