//! The wire shapes defined by the incremental delivery response format:
//! an initial payload, followed by zero or more subsequent payloads, each
//! shaped the same way regardless of transport (multipart, SSE, ...).

use serde::Serialize;

use crate::error::GraphqlError;
use crate::graph::DeliveryId;
use crate::path::PathElement;

/// The first payload sent for an operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialIncrementalExecutionResult {
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<GraphqlError>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pending: Vec<PendingResult>,
    pub has_next: bool,
}

/// Announces one deferred fragment or stream that now exists and will
/// eventually show up in a `completed` or `incremental` entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResult {
    pub id: DeliveryId,
    pub path: Vec<PathElement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One payload in the subsequent-results sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsequentIncrementalExecutionResult {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pending: Vec<PendingResult>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub incremental: Vec<IncrementalResult>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub completed: Vec<CompletedResult>,
    pub has_next: bool,
}

/// A defer and a stream result differ only in whether they carry `data` or
/// `items`; tagging is done structurally rather than with an explicit
/// discriminant field, matching how both kinds are unioned on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IncrementalResult {
    Defer(IncrementalDeferResult),
    Stream(IncrementalStreamResult),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalDeferResult {
    pub id: DeliveryId,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sub_path: Vec<PathElement>,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalStreamResult {
    pub id: DeliveryId,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sub_path: Vec<PathElement>,
    pub items: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<GraphqlError>,
}

/// A deferred fragment or stream that has fully finished: no more
/// `incremental` entries will ever reference its id again.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedResult {
    pub id: DeliveryId,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<GraphqlError>,
}
