//! Request and response bodies of the two endpoints.
//!
//! Embedding endpoint:
//! - request  `{"physical_id": ["img", ...], "pt": "FLAT_SHEET"}`
//! - response `{"embeddings": [[0.1, ...], ...]}`
//!
//! Neighbor endpoint:
//! - request  `{"embedding": [[0.1, ...], ...], "pt": "FLAT_SHEET", "marketplace": "US"}`
//! - response `{"neighbor_item_ids": [["B0..", ...], ...], "neighbor_item_ids_distances": [[0.3, ...], ...]}`
//!
//! Some deployments of the neighbor endpoint wrap the response object in a
//! JSON string; both shapes decode to the same value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request body whose item count is bounded by the endpoint's batch limit.
pub trait BatchPayload: Serialize + Send + Sync {
    fn item_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub physical_id: Vec<String>,
    pub pt: String,
}

impl BatchPayload for EmbeddingRequest {
    fn item_count(&self) -> usize {
        self.physical_id.len()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborRequest {
    pub embedding: Vec<Vec<f32>>,
    pub pt: String,
    pub marketplace: String,
}

impl BatchPayload for NeighborRequest {
    fn item_count(&self) -> usize {
        self.embedding.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborResponse {
    pub neighbor_item_ids: Vec<Vec<String>>,
    pub neighbor_item_ids_distances: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct RawNeighborResponse {
    neighbor_item_ids: Vec<Vec<Value>>,
    neighbor_item_ids_distances: Vec<Vec<f32>>,
}

pub fn decode_embeddings(bytes: &[u8]) -> Result<EmbeddingResponse, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Decode a neighbor response, unwrapping one level of string encoding.
///
/// Item ids may come back as strings or numbers; both become strings.
pub fn decode_neighbors(bytes: &[u8]) -> Result<NeighborResponse, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };
    let raw: RawNeighborResponse = serde_json::from_value(value)?;

    Ok(NeighborResponse {
        neighbor_item_ids: raw
            .neighbor_item_ids
            .into_iter()
            .map(|ids| ids.into_iter().map(id_to_string).collect())
            .collect(),
        neighbor_item_ids_distances: raw.neighbor_item_ids_distances,
    })
}

fn id_to_string(id: Value) -> String {
    match id {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
