//! Turns graph completions into the wire-shaped response sequence a
//! transport (multipart HTTP, SSE, a WebSocket frame stream, ...) sends to
//! the client.

pub mod response;

use crate::cancel::CancellableSequence;
use crate::cancel::CancellationRegistry;
use crate::cancel::IncrementalSequence;
use crate::error::GraphqlError;
use crate::graph::DeliveryGroupSnapshot;
use crate::graph::ExecutionOutcome;
use crate::graph::FragmentId;
use crate::graph::IncrementalDataRecord;
use crate::graph::IncrementalDataRecordResult;
use crate::graph::IncrementalGraph;
use crate::publisher::response::CompletedResult;
use crate::publisher::response::IncrementalDeferResult;
use crate::publisher::response::IncrementalResult;
use crate::publisher::response::IncrementalStreamResult;
use crate::publisher::response::InitialIncrementalExecutionResult;
use crate::publisher::response::PendingResult;
use crate::publisher::response::SubsequentIncrementalExecutionResult;

fn pending_result(snapshot: &DeliveryGroupSnapshot) -> PendingResult {
    PendingResult {
        id: snapshot.id,
        path: snapshot.path.to_vec(),
        label: snapshot.label.clone(),
    }
}

/// Builds the initial and subsequent payloads for one operation's
/// incremental delivery graph.
pub struct IncrementalPublisher {
    graph: IncrementalGraph,
    registry: CancellationRegistry,
}

impl IncrementalPublisher {
    pub fn new(graph: IncrementalGraph, registry: CancellationRegistry) -> Self {
        Self { graph, registry }
    }

    /// Register the root-level execution's own deferred/streamed work and
    /// build the initial response plus the sequence of subsequent ones.
    pub fn build_response(
        &self,
        data: serde_json::Value,
        errors: Vec<GraphqlError>,
        incremental_data_records: Vec<IncrementalDataRecord>,
    ) -> (InitialIncrementalExecutionResult, CancellableSequence<SubsequentResults>) {
        let pending = self.graph.get_new_root_nodes(incremental_data_records);
        let initial = InitialIncrementalExecutionResult {
            data,
            errors,
            pending: pending.iter().map(pending_result).collect(),
            has_next: self.graph.has_next(),
        };
        let sequence = CancellableSequence::new(SubsequentResults::new(self.graph.clone()), self.registry.clone());
        (initial, sequence)
    }
}

/// The async sequence of subsequent payloads. Implements
/// [`IncrementalSequence`] so it can be raced against an abort source by
/// [`CancellableSequence`].
pub struct SubsequentResults {
    graph: IncrementalGraph,
}

impl SubsequentResults {
    pub fn new(graph: IncrementalGraph) -> Self {
        Self { graph }
    }

    fn build_payload(&self, batch: Vec<IncrementalDataRecordResult>) -> SubsequentIncrementalExecutionResult {
        let mut incremental = Vec::new();
        let mut completed = Vec::new();
        let mut pending = Vec::new();

        for item in batch {
            match item {
                IncrementalDataRecordResult::Group(group) => {
                    pending.extend(group.new_pending.iter().map(pending_result));
                    // Release this group's newly-finished fragments *before*
                    // resolving its own delivery id: doing so may promote a
                    // deeper ancestor (e.g. a fragment that raced to
                    // completion alongside this group), which is then the
                    // correct, more specific delivery target.
                    self.release_completed_fragments(group.completed_fragments, &mut completed, &mut pending);
                    let (id, sub_path) = self.graph.resolve_group_delivery(group.group_id);
                    incremental.push(match group.outcome {
                        ExecutionOutcome::Success { data, .. } => {
                            IncrementalResult::Defer(IncrementalDeferResult { id, sub_path, data, errors: Vec::new() })
                        }
                        ExecutionOutcome::Failure { errors } => IncrementalResult::Defer(IncrementalDeferResult {
                            id,
                            sub_path,
                            data: serde_json::Value::Null,
                            errors,
                        }),
                    });
                }
                IncrementalDataRecordResult::StreamItems(stream_items) => {
                    pending.extend(stream_items.new_pending.iter().map(pending_result));
                    match stream_items.items {
                        Some(items) => incremental.push(IncrementalResult::Stream(IncrementalStreamResult {
                            id: stream_items.id,
                            sub_path: Vec::new(),
                            items,
                            errors: stream_items.errors.unwrap_or_default(),
                        })),
                        None => {
                            completed.push(CompletedResult {
                                id: stream_items.id,
                                errors: stream_items.errors.unwrap_or_default(),
                            });
                            self.graph.remove_stream(stream_items.stream_id);
                        }
                    }
                }
            }
        }

        SubsequentIncrementalExecutionResult {
            incremental,
            completed,
            pending,
            has_next: self.graph.has_next(),
        }
    }

    fn release_completed_fragments(
        &self,
        completed_fragments: Vec<(FragmentId, crate::graph::DeliveryId)>,
        completed: &mut Vec<CompletedResult>,
        pending: &mut Vec<PendingResult>,
    ) {
        for (fragment_id, id) in completed_fragments {
            completed.push(CompletedResult { id, errors: Vec::new() });
            let Some(released) = self.graph.complete_deferred_fragment(fragment_id) else {
                continue;
            };
            pending.extend(released.new_root_nodes.iter().map(pending_result));
            // Children the release just found already fully settled are
            // reported flat (any further nesting was already cascaded
            // inside `complete_deferred_fragment` itself) — deliver them
            // directly rather than releasing them a second time.
            for (nested_id, nested_delivery_id) in released.completed_fragments {
                completed.push(CompletedResult { id: nested_delivery_id, errors: Vec::new() });
                self.graph.remove_deferred_fragment(nested_id);
            }
            self.graph.remove_deferred_fragment(fragment_id);
        }
    }
}

impl IncrementalSequence for SubsequentResults {
    type Item = SubsequentIncrementalExecutionResult;

    async fn next(&mut self) -> Option<Self::Item> {
        let batch = self.graph.next_completed_batch().await?;
        Some(self.build_payload(batch))
    }

    async fn return_(&mut self) {
        self.graph.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defer_usage::DeferUsageArena;
    use crate::graph::NewExecutionGroup;
    use crate::lazy::Lazy;
    use crate::path::Path;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn initial_response_announces_pending_defer() {
        let mut arena = DeferUsageArena::new();
        let usage = arena.create(Path::root().push("a"), Some("l".into()), None);
        let arena = Arc::new(Mutex::new(arena));
        let graph = IncrementalGraph::new(arena);
        let publisher = IncrementalPublisher::new(graph, CancellationRegistry::new());

        let (initial, mut sequence) = publisher.build_response(
            serde_json::json!({"a": null}),
            Vec::new(),
            vec![IncrementalDataRecord::Group(NewExecutionGroup {
                defer_usages: vec![usage],
                path: Path::root().push("a"),
                result: Lazy::ready(ExecutionOutcome::Success {
                    data: serde_json::json!({"bio": "hi"}),
                    incremental_data_records: Vec::new(),
                }),
            })],
        );

        assert_eq!(initial.pending.len(), 1);
        assert!(initial.has_next);

        let next = sequence.next().await.expect("one subsequent payload");
        assert_eq!(next.incremental.len(), 1);
        assert_eq!(next.completed.len(), 1);
        assert!(!next.has_next);
    }
}
