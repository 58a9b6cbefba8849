//! Black-box scenarios against the public graph/publisher API: the literal
//! examples worked through response payloads, end to end.

use std::sync::Arc;

use incremental_delivery::DeferUsageArena;
use incremental_delivery::IncrementalGraph;
use incremental_delivery::IncrementalPublisher;
use incremental_delivery::Lazy;
use incremental_delivery::Path;
use incremental_delivery::cancel::CancellationRegistry;
use incremental_delivery::cancel::IncrementalSequence;
use incremental_delivery::error::GraphqlError;
use incremental_delivery::graph::ExecutionOutcome;
use incremental_delivery::graph::IncrementalDataRecord;
use incremental_delivery::graph::NewExecutionGroup;
use incremental_delivery::graph::NewStream;
use incremental_delivery::graph::StreamItemResult;
use incremental_delivery::graph::StreamItemSource;
use parking_lot::Mutex;

fn publisher() -> (IncrementalPublisher, Arc<Mutex<DeferUsageArena>>) {
    let arena = Arc::new(Mutex::new(DeferUsageArena::new()));
    let graph = IncrementalGraph::new(arena.clone());
    (IncrementalPublisher::new(graph, CancellationRegistry::new()), arena)
}

#[tokio::test]
async fn defer_trivial() {
    let (publisher, arena) = publisher();
    let usage = arena.lock().create(Path::root().push("b"), Some("L".into()), None);

    let (initial, mut sequence) = publisher.build_response(
        serde_json::json!({"a": 1}),
        Vec::new(),
        vec![IncrementalDataRecord::Group(NewExecutionGroup {
            defer_usages: vec![usage],
            path: Path::root().push("b"),
            result: Lazy::ready(ExecutionOutcome::Success {
                data: serde_json::json!({"c": 2}),
                incremental_data_records: Vec::new(),
            }),
        })],
    );

    assert_eq!(initial.data, serde_json::json!({"a": 1}));
    assert_eq!(initial.pending.len(), 1);
    assert_eq!(initial.pending[0].id.to_string(), "0");
    assert!(initial.has_next);

    let next = sequence.next().await.expect("one subsequent payload");
    assert_eq!(next.incremental.len(), 1);
    assert_eq!(next.completed.len(), 1);
    assert!(!next.has_next);
    assert!(sequence.next().await.is_none());
}

#[tokio::test]
async fn nested_defer_announces_inner_pending_alongside_outer_completion() {
    let (publisher, arena) = publisher();
    let outer_usage = arena.lock().create(Path::root().push("x"), None, None);
    let inner_path = Path::root().push("x").push("y");
    let inner_usage = {
        let mut arena = arena.lock();
        arena.create(inner_path.clone(), None, Some(outer_usage))
    };

    let (initial, mut sequence) = publisher.build_response(
        serde_json::json!({}),
        Vec::new(),
        vec![IncrementalDataRecord::Group(NewExecutionGroup {
            defer_usages: vec![outer_usage],
            path: Path::root().push("x"),
            result: Lazy::ready(ExecutionOutcome::Success {
                data: serde_json::json!({"inner": null}),
                incremental_data_records: vec![IncrementalDataRecord::Group(NewExecutionGroup {
                    defer_usages: vec![inner_usage],
                    path: inner_path,
                    result: Lazy::ready(ExecutionOutcome::Success {
                        data: serde_json::json!({"y": "done"}),
                        incremental_data_records: Vec::new(),
                    }),
                })],
            }),
        })],
    );
    assert_eq!(initial.pending.len(), 1);

    // The outer fragment settles first, on its own: the inner fragment it
    // nests must become visible (`pending`) in this same message, but must
    // not be delivered yet — it is still blocked behind the outer fragment's
    // release, which the publisher only performs while processing this very
    // message.
    let first = sequence.next().await.expect("outer settles on its own");
    assert_eq!(first.pending.len(), 1, "inner fragment becomes visible alongside outer's completion");
    assert_eq!(first.incremental.len(), 1, "only the outer fragment's data is delivered here");
    assert_eq!(first.completed.len(), 1, "only the outer fragment is completed here");
    assert!(first.has_next, "the inner fragment is still pending");

    // Only now, in a second message, does the inner fragment's own data
    // arrive and complete.
    let second = sequence.next().await.expect("inner settles separately");
    assert!(second.pending.is_empty());
    assert_eq!(second.incremental.len(), 1, "the inner fragment's data is delivered here");
    assert_eq!(second.completed.len(), 1, "the inner fragment completes here");
    assert!(!second.has_next);

    assert!(sequence.next().await.is_none());
}

#[tokio::test]
async fn shared_execution_group_delivers_at_the_longest_released_path() {
    let (publisher, arena) = publisher();
    let (outer_usage, inner_usage) = {
        let mut arena = arena.lock();
        let outer = arena.create(Path::root().push("a"), None, None);
        let inner = arena.create(Path::root().push("a").push("b"), None, Some(outer));
        (outer, inner)
    };

    // Two execution groups release each fragment independently; the shared
    // group referencing both only settles once both exist.
    let (initial, mut sequence) = publisher.build_response(
        serde_json::json!({}),
        Vec::new(),
        vec![
            IncrementalDataRecord::Group(NewExecutionGroup {
                defer_usages: vec![outer_usage],
                path: Path::root().push("a"),
                result: Lazy::ready(ExecutionOutcome::Success {
                    data: serde_json::json!({}),
                    incremental_data_records: Vec::new(),
                }),
            }),
            IncrementalDataRecord::Group(NewExecutionGroup {
                defer_usages: vec![outer_usage, inner_usage],
                path: Path::root().push("a").push("b"),
                result: Lazy::ready(ExecutionOutcome::Success {
                    data: serde_json::json!({"shared": true}),
                    incremental_data_records: Vec::new(),
                }),
            }),
        ],
    );
    assert_eq!(initial.pending.len(), 1, "only the outer fragment is visible up front");

    let batch = sequence.next().await.expect("batch with both groups settled");
    let shared = batch
        .incremental
        .iter()
        .find(|entry| matches!(entry, incremental_delivery::publisher::response::IncrementalResult::Defer(d) if d.data == serde_json::json!({"shared": true})))
        .expect("shared group delivered");
    if let incremental_delivery::publisher::response::IncrementalResult::Defer(defer) = shared {
        assert_eq!(defer.id.to_string(), "1", "delivered relative to the deepest released fragment");
    }
}

struct VecStream {
    items: std::vec::IntoIter<StreamItemResult>,
}

impl VecStream {
    fn new(items: Vec<StreamItemResult>) -> Self {
        Self { items: items.into_iter() }
    }
}

impl StreamItemSource for VecStream {
    fn next(&mut self) -> Lazy<StreamItemResult> {
        Lazy::ready(self.items.next().unwrap_or(StreamItemResult::EndOfStream))
    }
}

#[tokio::test]
async fn stream_with_three_items_one_erroring() {
    let (publisher, _arena) = publisher();
    let source = VecStream::new(vec![
        StreamItemResult::Item {
            item: serde_json::json!("a"),
            errors: None,
            incremental_data_records: Vec::new(),
        },
        StreamItemResult::Item {
            item: serde_json::json!("b"),
            errors: None,
            incremental_data_records: Vec::new(),
        },
        StreamItemResult::EndWithErrors {
            errors: vec![GraphqlError::new("list item failed")],
        },
    ]);

    let (initial, mut sequence) = publisher.build_response(
        serde_json::json!({"list": []}),
        Vec::new(),
        vec![IncrementalDataRecord::Stream(NewStream {
            path: Path::root().push("list"),
            label: None,
            parent: None,
            items: Box::new(source),
            early_return: None,
        })],
    );
    assert_eq!(initial.pending.len(), 1);

    let mut seen_items = Vec::new();
    let mut saw_completed_with_errors = false;
    while let Some(batch) = sequence.next().await {
        for entry in &batch.incremental {
            if let incremental_delivery::publisher::response::IncrementalResult::Stream(stream) = entry {
                seen_items.extend(stream.items.clone());
            }
        }
        for completed in &batch.completed {
            if !completed.errors.is_empty() {
                saw_completed_with_errors = true;
            }
        }
        if !batch.has_next {
            break;
        }
    }

    assert_eq!(seen_items, vec![serde_json::json!("a"), serde_json::json!("b")]);
    assert!(saw_completed_with_errors);
}

#[tokio::test]
async fn empty_incremental_data_records_finishes_immediately() {
    let (publisher, _arena) = publisher();
    let (initial, mut sequence) = publisher.build_response(serde_json::json!({"a": 1}), Vec::new(), Vec::new());
    assert!(initial.pending.is_empty());
    assert!(!initial.has_next);
    assert!(sequence.next().await.is_none());
}

struct ForeverPendingStream;

impl StreamItemSource for ForeverPendingStream {
    fn next(&mut self) -> Lazy<StreamItemResult> {
        Lazy::pending(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            StreamItemResult::EndOfStream
        })
    }
}

#[tokio::test]
async fn consumer_return_invokes_early_return_and_stops_the_sequence() {
    let (publisher, _arena) = publisher();
    let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let invoked2 = invoked.clone();

    let (_initial, mut sequence) = publisher.build_response(
        serde_json::json!({}),
        Vec::new(),
        vec![IncrementalDataRecord::Stream(NewStream {
            path: Path::root().push("list"),
            label: None,
            parent: None,
            items: Box::new(ForeverPendingStream),
            early_return: Some(Box::new(move || {
                Box::pin(async move {
                    invoked2.store(true, std::sync::atomic::Ordering::SeqCst);
                })
            })),
        })],
    );

    sequence.return_().await;
    tokio::task::yield_now().await;
    assert!(invoked.load(std::sync::atomic::Ordering::SeqCst));
    assert!(sequence.next().await.is_none());
}
