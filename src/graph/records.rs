//! The record types that make up one operation's incremental delivery
//! forest, and the producer-facing types the executor uses to hand work to
//! the graph.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use indexmap::IndexSet;

use crate::defer_usage::DeferUsageId;
use crate::error::GraphqlError;
use crate::graph::ids::DeliveryGroupId;
use crate::graph::ids::DeliveryId;
use crate::graph::ids::FragmentId;
use crate::graph::ids::GroupId;
use crate::graph::ids::StreamId;
use crate::lazy::Lazy;
use crate::path::Path;

/// One deferred fragment's lifecycle state.
pub(crate) struct FragmentRecord {
    pub path: Path,
    pub label: Option<String>,
    pub parent: Option<FragmentId>,
    pub pending_execution_groups: IndexSet<GroupId>,
    pub successful_execution_groups: IndexSet<GroupId>,
    pub children: IndexSet<DeliveryGroupId>,
    pub id: Option<DeliveryId>,
    /// Set once `complete_deferred_fragment` has run for this fragment (or,
    /// for a pure scope-wrapper, once a release cascade has passed through
    /// it). Distinct from `id.is_some()`: a fragment can sit delivered in the
    /// root set for a while before the publisher actually releases it, and
    /// its children must not be exposed to promotion until that release
    /// happens.
    pub released: bool,
}

impl FragmentRecord {
    pub fn is_complete(&self) -> bool {
        self.pending_execution_groups.is_empty()
    }

    /// True for a fragment that exists purely as `@defer` scope nesting and
    /// has never had an execution group of its own — a node like this is
    /// never promoted to root itself; promotion bubbles straight through to
    /// its children.
    pub fn has_no_work(&self) -> bool {
        self.pending_execution_groups.is_empty() && self.successful_execution_groups.is_empty()
    }
}

/// A unit of executor work: one or more fragments share it when `@defer`
/// scopes overlap.
pub(crate) struct GroupRecord {
    pub fragments: Vec<FragmentId>,
    pub path: Path,
    /// Taken the first time the group is invoked, whichever of the two
    /// trigger points (already-root at ingestion, or promoted by the
    /// end-of-batch sweep) gets there first. `None` afterwards.
    pub pending_result: Option<Lazy<ExecutionOutcome>>,
}

/// What an execution group's lazy result materialises into.
pub enum ExecutionOutcome {
    Success {
        data: serde_json::Value,
        incremental_data_records: Vec<IncrementalDataRecord>,
    },
    Failure {
        errors: Vec<GraphqlError>,
    },
}

/// A completed execution group, as drained from the graph's completed queue.
/// `id`/`path` are deliberately *not* resolved here: the best-matching
/// delivered ancestor can change the instant this batch's own fragment
/// releases run (a sibling fragment may be promoted along the way), so the
/// publisher resolves them via `IncrementalGraph::resolve_group_delivery`
/// only after it has released whichever fragments this group just finished.
pub struct CompletedExecutionGroup {
    pub group_id: GroupId,
    pub outcome: ExecutionOutcome,
    pub new_pending: Vec<DeliveryGroupSnapshot>,
    /// Fragments this group's completion just finished (every one of their
    /// execution groups has now settled), paired with their delivery id.
    pub completed_fragments: Vec<(FragmentId, DeliveryId)>,
}

/// One element of an active `@stream` list, as produced by the executor.
pub enum StreamItemResult {
    Item {
        item: serde_json::Value,
        errors: Option<Vec<GraphqlError>>,
        incremental_data_records: Vec<IncrementalDataRecord>,
    },
    EndOfStream,
    EndWithErrors {
        errors: Vec<GraphqlError>,
    },
}

/// A batch of stream deltas, as enqueued by the graph for the publisher.
/// `items.is_none()` distinguishes the two kinds of terminal result
/// (`errors.is_some()` for an abnormal end, `None` for a clean one) from a
/// normal item batch.
pub struct StreamItemsResult {
    pub stream_id: StreamId,
    pub id: DeliveryId,
    pub items: Option<Vec<serde_json::Value>>,
    pub errors: Option<Vec<GraphqlError>>,
    pub new_pending: Vec<DeliveryGroupSnapshot>,
}

/// Pulls the next lazy item out of an active stream, one at a time. The
/// executor-side analogue of popping from `stream_item_queue`.
pub trait StreamItemSource: Send {
    fn next(&mut self) -> Lazy<StreamItemResult>;
}

/// Invoked, best-effort, to tell an upstream async iterator the consumer has
/// stopped listening. Failures are swallowed: a broken early-return hook
/// should never prevent the sequence from stopping.
pub type EarlyReturnFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub(crate) struct StreamRecordSlot {
    pub path: Path,
    pub label: Option<String>,
    pub id: Option<DeliveryId>,
    pub items: Option<Box<dyn StreamItemSource>>,
    pub early_return: Option<EarlyReturnFn>,
}

/// One fragment or stream newly introduced by an `IncrementalDataRecord`.
/// The first time a given `DeferUsageId` is referenced by a record, the
/// graph materialises a `FragmentRecord` for it by reading its path/label
/// from the shared [`crate::defer_usage::DeferUsageArena`].
pub struct NewExecutionGroup {
    /// Non-empty: the `@defer` scopes this group's result satisfies.
    pub defer_usages: Vec<DeferUsageId>,
    pub path: Path,
    pub result: Lazy<ExecutionOutcome>,
}

pub struct NewStream {
    pub path: Path,
    pub label: Option<String>,
    /// `None`: exposed directly in this call's root-node batch. `Some`: only
    /// observable once that enclosing `@defer` scope has been released.
    pub parent: Option<DeferUsageId>,
    pub items: Box<dyn StreamItemSource>,
    pub early_return: Option<EarlyReturnFn>,
}

/// Producer-side work handle: what the executor hands to
/// `IncrementalGraph::get_new_root_nodes`.
pub enum IncrementalDataRecord {
    Group(NewExecutionGroup),
    Stream(NewStream),
}

/// What `current_completed_batch`/`next_completed_batch` yield: either kind
/// of completed work, in FIFO completion order.
pub enum IncrementalDataRecordResult {
    Group(CompletedExecutionGroup),
    StreamItems(StreamItemsResult),
}

/// A `DeliveryGroup`, described for the publisher: enough to build a
/// `PendingResult` without reaching back into the graph's internals.
#[derive(Debug, Clone)]
pub struct DeliveryGroupSnapshot {
    pub id: DeliveryId,
    pub group: DeliveryGroupId,
    pub path: Path,
    pub label: Option<String>,
}

/// The result of releasing a delivered fragment: whichever children were
/// waiting only on it now join the root set, and any of those children that
/// turn out to already be fully settled themselves (their own execution
/// groups finished while still waiting on this release) are reported back
/// too, so the publisher can emit their `completed` entries in the same
/// sweep instead of waiting for a release that will never come.
pub struct CompletedFragment {
    pub new_root_nodes: Vec<DeliveryGroupSnapshot>,
    pub completed_fragments: Vec<(FragmentId, DeliveryId)>,
}

pub(crate) fn drain_queue(queue: &mut VecDeque<IncrementalDataRecordResult>) -> Vec<IncrementalDataRecordResult> {
    queue.drain(..).collect()
}
