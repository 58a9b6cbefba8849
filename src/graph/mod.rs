//! The incremental delivery graph: owns the fragment/stream completion
//! forest for one operation, decides when work is newly deliverable, and
//! buffers completed batches until the publisher drains them.
//!
//! Modelled as two slab arenas (fragments, execution groups) cross-linked by
//! index rather than a tree of owned values, because a single execution
//! group can satisfy several fragments at once when their `@defer` scopes
//! overlap.
//!
//! Registration and promotion are deliberately two separate passes. A newly
//! referenced fragment is first *materialised* (parent/child links wired up)
//! without deciding anything about visibility; only once every record in a
//! batch has been materialised does a worklist sweep decide which nodes are
//! actually promoted to the root set. A fragment with no execution group of
//! its own — pure `@defer` scope nesting — is never promoted itself; the
//! sweep bubbles straight through to its children instead. Doing this in one
//! combined pass, rather than promoting each fragment the moment it is
//! created, is what keeps two sibling groups that both reference the same
//! not-yet-root fragment from racing each other.

mod ids;
mod records;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::instrument;

use crate::config::IncrementalDeliveryConfig;
use crate::defer_usage::DeferUsageArena;
use crate::defer_usage::DeferUsageId;
use crate::ensure;
use crate::error::GraphqlError;
use crate::path::Path;
use crate::path::PathElement;

pub use ids::DeliveryGroupId;
pub use ids::DeliveryId;
pub use ids::FragmentId;
pub use ids::GroupId;
pub use ids::StreamId;
pub use records::CompletedExecutionGroup;
pub use records::CompletedFragment;
pub use records::DeliveryGroupSnapshot;
pub use records::EarlyReturnFn;
pub use records::ExecutionOutcome;
pub use records::IncrementalDataRecord;
pub use records::IncrementalDataRecordResult;
pub use records::NewExecutionGroup;
pub use records::NewStream;
pub use records::StreamItemResult;
pub use records::StreamItemSource;
pub use records::StreamItemsResult;

use ids::Slab;
use records::FragmentRecord;
use records::GroupRecord;
use records::StreamRecordSlot;

/// Accumulates synchronously-resolving stream items between flush points.
#[derive(Default)]
struct StreamBatch {
    items: Vec<serde_json::Value>,
    errors: Vec<GraphqlError>,
    records: Vec<IncrementalDataRecord>,
}

struct GraphInner {
    fragments: Slab<FragmentRecord>,
    groups: Slab<GroupRecord>,
    streams: Slab<StreamRecordSlot>,
    fragment_by_defer_usage: HashMap<DeferUsageId, FragmentId>,
    root_nodes: IndexSet<DeliveryGroupId>,
    completed_queue: VecDeque<IncrementalDataRecordResult>,
    waiters: VecDeque<oneshot::Sender<Option<Vec<IncrementalDataRecordResult>>>>,
    in_flight: usize,
    aborted: bool,
    next_delivery_id: u64,
    config: IncrementalDeliveryConfig,
}

impl GraphInner {
    fn new(config: IncrementalDeliveryConfig) -> Self {
        Self {
            fragments: Slab::default(),
            groups: Slab::default(),
            streams: Slab::default(),
            fragment_by_defer_usage: HashMap::new(),
            root_nodes: IndexSet::new(),
            completed_queue: VecDeque::new(),
            waiters: VecDeque::new(),
            in_flight: 0,
            aborted: false,
            next_delivery_id: 0,
            config,
        }
    }

    fn fragment(&self, id: FragmentId) -> &FragmentRecord {
        self.fragments.get(id.0)
    }

    fn fragment_mut(&mut self, id: FragmentId) -> &mut FragmentRecord {
        self.fragments.get_mut(id.0)
    }

    /// Look up (or materialise) the fragment for `usage`, recursively
    /// materialising its ancestors first. Memoised by `fragment_by_defer_usage`:
    /// once a fragment exists its parent linkage never changes.
    ///
    /// This never decides promotion on its own — it only wires up
    /// parent/child links — except to note which node is eligible for the
    /// caller's later promotion sweep, which it adds to `working_set`.
    /// A node is eligible if it has no parent, or if its parent has already
    /// been *released* (not merely delivered: a delivered-but-not-yet-
    /// released parent is still occupying the root set, and its children
    /// must wait for `complete_deferred_fragment` to expose them instead of
    /// being promoted here).
    fn add_deferred_fragment(&mut self, arena: &DeferUsageArena, usage: DeferUsageId, working_set: &mut IndexSet<DeliveryGroupId>) -> FragmentId {
        if let Some(&id) = self.fragment_by_defer_usage.get(&usage) {
            if !self.is_delivered(DeliveryGroupId::Fragment(id)) {
                if let Some(promotable) = self.topmost_promotable_ancestor(id) {
                    working_set.insert(DeliveryGroupId::Fragment(promotable));
                }
            }
            return id;
        }

        let parent = arena
            .parent(usage)
            .map(|parent_usage| self.add_deferred_fragment(arena, parent_usage, working_set));
        let record = FragmentRecord {
            path: arena.path(usage).clone(),
            label: arena.label(usage).map(str::to_owned),
            parent,
            pending_execution_groups: IndexSet::new(),
            successful_execution_groups: IndexSet::new(),
            children: IndexSet::new(),
            id: None,
            released: false,
        };
        let id = FragmentId(self.fragments.insert(record));
        self.fragment_by_defer_usage.insert(usage, id);

        match parent {
            None => {
                working_set.insert(DeliveryGroupId::Fragment(id));
            }
            Some(parent_id) => {
                self.fragment_mut(parent_id).children.insert(DeliveryGroupId::Fragment(id));
                if self.is_released(parent_id) {
                    working_set.insert(DeliveryGroupId::Fragment(id));
                }
            }
        }
        id
    }

    /// For an existing, not-yet-delivered fragment: walk up while the parent
    /// has no delivery id yet (nothing above it could have released it), and
    /// return the ancestor reached this way. If the walk instead stops at a
    /// parent that *is* delivered, that parent's children are only eligible
    /// for promotion once it has been released — so this returns `Some` only
    /// if that parent has already been released, and `None` otherwise (the
    /// eventual release cascade will pick this fragment up on its own).
    fn topmost_promotable_ancestor(&self, id: FragmentId) -> Option<FragmentId> {
        let mut current = id;
        loop {
            match self.fragment(current).parent {
                Some(parent_id) if !self.is_delivered(DeliveryGroupId::Fragment(parent_id)) => {
                    current = parent_id;
                }
                Some(parent_id) => return self.is_released(parent_id).then_some(current),
                None => return Some(current),
            }
        }
    }

    fn assign_delivery_id(&mut self) -> DeliveryId {
        let id = DeliveryId(self.next_delivery_id);
        self.next_delivery_id += 1;
        id
    }

    /// Whether a node has ever been assigned a delivery id. Unlike root-set
    /// membership this never goes back to `false`: once a fragment or stream
    /// has been delivered and forgotten (`remove_deferred_fragment`/
    /// `remove_stream`), it must never be promoted again even if something
    /// later re-discovers it while walking the forest (e.g. releasing a
    /// parent whose child happened to finish, and be delivered, earlier in
    /// the same batch).
    fn is_delivered(&self, node: DeliveryGroupId) -> bool {
        match node {
            DeliveryGroupId::Fragment(id) => self.fragment(id).id.is_some(),
            DeliveryGroupId::Stream(id) => self.streams.get(id.0).id.is_some(),
        }
    }

    /// Whether a fragment has actually been released by
    /// `complete_deferred_fragment` (or passed through by one, if it's a
    /// pure scope wrapper) — as opposed to merely delivered. A fragment can
    /// be delivered and sit in the root set, unreleased, for a while; only
    /// once it is released are its children eligible for promotion.
    fn is_released(&self, id: FragmentId) -> bool {
        self.fragment(id).released
    }

    /// Add `group` to the root set and assign it its delivery id in the same
    /// step, per the invariant that an id is assigned exactly once, at the
    /// moment of promotion. Returns whether it was newly promoted
    /// (idempotent, keyed off `is_delivered` rather than root-set membership
    /// — see its doc comment).
    fn promote_to_root(&mut self, group: DeliveryGroupId) -> bool {
        if self.is_delivered(group) {
            return false;
        }
        self.root_nodes.insert(group);
        let id = self.assign_delivery_id();
        match group {
            DeliveryGroupId::Fragment(fragment_id) => self.fragment_mut(fragment_id).id = Some(id),
            DeliveryGroupId::Stream(stream_id) => self.streams.get_mut(stream_id.0).id = Some(id),
        }
        true
    }

    /// The piece of the group's fragment set that already has a delivered
    /// ancestor, ranked by path depth: the deepest (most specific) wins,
    /// and the returned path is the suffix beyond that ancestor. Resolved
    /// lazily by the publisher rather than cached at settle time, since a
    /// sibling fragment's release can promote a deeper ancestor in between.
    fn resolve_group_delivery(&self, group_id: GroupId) -> (DeliveryId, Vec<PathElement>) {
        let group = self.groups.get(group_id.0);
        let mut best: Option<&FragmentRecord> = None;
        for &fragment_id in &group.fragments {
            let fragment = self.fragment(fragment_id);
            if fragment.id.is_none() {
                continue;
            }
            best = match best {
                Some(current) if current.path.len() >= fragment.path.len() => Some(current),
                _ => Some(fragment),
            };
        }
        match best {
            Some(fragment) => (fragment.id.unwrap(), group.path.suffix_after(fragment.path.len())),
            None => {
                debug_assert!(false, "group queued before any of its fragments were delivered");
                (DeliveryId(0), group.path.to_vec())
            }
        }
    }

    fn snapshot(&self, group: DeliveryGroupId) -> DeliveryGroupSnapshot {
        match group {
            DeliveryGroupId::Fragment(id) => {
                let fragment = self.fragment(id);
                DeliveryGroupSnapshot {
                    id: fragment.id.expect("snapshot taken after id assignment"),
                    group,
                    path: fragment.path.clone(),
                    label: fragment.label.clone(),
                }
            }
            DeliveryGroupId::Stream(id) => {
                let stream = self.streams.get(id.0);
                DeliveryGroupSnapshot {
                    id: stream.id.expect("snapshot taken after id assignment"),
                    group,
                    path: stream.path.clone(),
                    label: stream.label.clone(),
                }
            }
        }
    }

    fn wake_one_waiter(&mut self) {
        while let Some(tx) = self.waiters.pop_front() {
            let batch = records::drain_queue(&mut self.completed_queue);
            let payload = if self.aborted && batch.is_empty() { None } else { Some(batch) };
            if tx.send(payload).is_ok() {
                return;
            }
        }
    }
}

/// A handle to one operation's incremental delivery graph. Cloning shares
/// the same underlying state; the lock is never held across an `.await`.
#[derive(Clone)]
pub struct IncrementalGraph {
    inner: Arc<Mutex<GraphInner>>,
    arena: Arc<Mutex<DeferUsageArena>>,
}

impl IncrementalGraph {
    pub fn new(arena: Arc<Mutex<DeferUsageArena>>) -> Self {
        Self::with_config(arena, IncrementalDeliveryConfig::default())
    }

    pub fn with_config(arena: Arc<Mutex<DeferUsageArena>>, config: IncrementalDeliveryConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GraphInner::new(config))),
            arena,
        }
    }

    /// Register newly produced execution groups and streams, and return
    /// whichever of them (or their existing blocked ancestors) are newly
    /// part of the root set.
    #[instrument(skip_all)]
    pub fn get_new_root_nodes(&self, records: Vec<IncrementalDataRecord>) -> Vec<DeliveryGroupSnapshot> {
        let arena = self.arena.lock();
        let mut inner = self.inner.lock();
        self.ingest(&mut inner, &arena, records)
    }

    /// Resolve a group's best-known delivery id/subPath against current
    /// graph state. Exposed so the publisher can call it after releasing
    /// whichever fragments this group's own completion just finished.
    pub fn resolve_group_delivery(&self, group_id: GroupId) -> (DeliveryId, Vec<PathElement>) {
        self.inner.lock().resolve_group_delivery(group_id)
    }

    /// Register a batch of records, then run the promotion sweep over
    /// whichever fragments/streams it touched, returning exactly the nodes
    /// promoted by *this* sweep (not ones promoted transitively by a nested
    /// call, e.g. an execution group settling synchronously and handing back
    /// more records of its own).
    fn ingest(&self, inner: &mut GraphInner, arena: &DeferUsageArena, records: Vec<IncrementalDataRecord>) -> Vec<DeliveryGroupSnapshot> {
        let mut working_set = IndexSet::new();
        for record in records {
            self.register_record(inner, arena, record, &mut working_set);
        }
        let mut new_roots = Vec::new();
        self.promote_working_set(inner, arena, working_set, &mut new_roots);
        new_roots.into_iter().map(|group| inner.snapshot(group)).collect()
    }

    fn register_record(
        &self,
        inner: &mut GraphInner,
        arena: &DeferUsageArena,
        record: IncrementalDataRecord,
        working_set: &mut IndexSet<DeliveryGroupId>,
    ) {
        match record {
            IncrementalDataRecord::Group(group) => self.register_group(inner, arena, group, working_set),
            IncrementalDataRecord::Stream(stream) => self.register_stream(inner, arena, stream, working_set),
        }
    }

    /// Materialise the group's fragments and attach it to each as a pending
    /// execution group. If any of them is *already* in the root set, there's
    /// no need to wait for the batch's promotion sweep — invoke the group
    /// right away.
    fn register_group(
        &self,
        inner: &mut GraphInner,
        arena: &DeferUsageArena,
        new_group: NewExecutionGroup,
        working_set: &mut IndexSet<DeliveryGroupId>,
    ) {
        let fragments: Vec<FragmentId> = new_group
            .defer_usages
            .iter()
            .map(|&usage| inner.add_deferred_fragment(arena, usage, working_set))
            .collect();
        let group_id = GroupId(inner.groups.insert(GroupRecord {
            fragments: fragments.clone(),
            path: new_group.path,
            pending_result: Some(new_group.result),
        }));

        let mut already_root = false;
        for &fragment_id in &fragments {
            inner.fragment_mut(fragment_id).pending_execution_groups.insert(group_id);
            if inner.is_delivered(DeliveryGroupId::Fragment(fragment_id)) {
                already_root = true;
            }
        }
        if already_root {
            self.invoke_group(inner, arena, group_id);
        }
    }

    /// Evaluate a group's lazy result, synchronously or by spawning a task
    /// to await it. A no-op if the group was already invoked (from the other
    /// trigger point — ingestion-time "already root" vs. the promotion
    /// sweep).
    fn invoke_group(&self, inner: &mut GraphInner, arena: &DeferUsageArena, group_id: GroupId) {
        let lazy = match inner.groups.get_mut(group_id.0).pending_result.take() {
            Some(lazy) => lazy,
            None => return,
        };
        inner.in_flight += 1;
        match lazy.try_into_ready() {
            Ok(outcome) => self.settle_group(inner, arena, group_id, outcome),
            Err(pending) => {
                let graph = self.clone();
                tokio::spawn(async move {
                    let outcome = pending.into_future().await;
                    let arena = graph.arena.lock();
                    let mut inner = graph.inner.lock();
                    if inner.aborted {
                        return;
                    }
                    graph.settle_group(&mut inner, &arena, group_id, outcome);
                    inner.wake_one_waiter();
                });
            }
        }
    }

    fn settle_group(&self, inner: &mut GraphInner, arena: &DeferUsageArena, group_id: GroupId, outcome: ExecutionOutcome) {
        inner.in_flight -= 1;
        let fragment_ids = inner.groups.get(group_id.0).fragments.clone();
        let mut completed_fragments = Vec::new();
        for &fragment_id in &fragment_ids {
            let fragment = inner.fragment_mut(fragment_id);
            fragment.pending_execution_groups.shift_remove(&group_id);
            fragment.successful_execution_groups.insert(group_id);
            if fragment.is_complete() {
                if let Some(id) = fragment.id {
                    completed_fragments.push((fragment_id, id));
                }
            }
        }

        let (outcome, new_pending) = match outcome {
            ExecutionOutcome::Success { data, incremental_data_records } => {
                let new_pending = self.ingest(inner, arena, incremental_data_records);
                (ExecutionOutcome::Success { data, incremental_data_records: Vec::new() }, new_pending)
            }
            failure @ ExecutionOutcome::Failure { .. } => {
                // With `failfast`, one execution group's failure tears the
                // whole operation down rather than letting unrelated sibling
                // work keep streaming in.
                if cfg!(feature = "failfast") {
                    inner.aborted = true;
                }
                (failure, Vec::new())
            }
        };

        inner.completed_queue.push_back(IncrementalDataRecordResult::Group(CompletedExecutionGroup {
            group_id,
            outcome,
            new_pending,
            completed_fragments,
        }));
    }

    /// Run the promotion worklist over `working_set`. A stream is always
    /// promoted directly. A fragment with no execution group of its own
    /// (pure scope nesting) is skipped — its children are pushed onto the
    /// worklist instead — otherwise it is promoted and every execution group
    /// still waiting on it is invoked.
    fn promote_working_set(
        &self,
        inner: &mut GraphInner,
        arena: &DeferUsageArena,
        working_set: IndexSet<DeliveryGroupId>,
        new_roots: &mut Vec<DeliveryGroupId>,
    ) {
        let mut queue: VecDeque<DeliveryGroupId> = working_set.into_iter().collect();
        while let Some(node) = queue.pop_front() {
            if inner.is_delivered(node) {
                continue;
            }
            match node {
                DeliveryGroupId::Stream(stream_id) => {
                    if inner.promote_to_root(node) {
                        new_roots.push(node);
                        inner.in_flight += 1;
                        self.spawn_stream_drain(stream_id);
                    }
                }
                DeliveryGroupId::Fragment(fragment_id) => {
                    if inner.fragment(fragment_id).has_no_work() {
                        inner.fragment_mut(fragment_id).released = true;
                        let children: Vec<DeliveryGroupId> = inner.fragment(fragment_id).children.iter().copied().collect();
                        queue.extend(children);
                        continue;
                    }
                    if inner.promote_to_root(node) {
                        new_roots.push(node);
                    }
                    let pending: Vec<GroupId> = inner.fragment(fragment_id).pending_execution_groups.iter().copied().collect();
                    for group_id in pending {
                        self.invoke_group(inner, arena, group_id);
                    }
                }
            }
        }
    }

    fn register_stream(
        &self,
        inner: &mut GraphInner,
        arena: &DeferUsageArena,
        new_stream: NewStream,
        working_set: &mut IndexSet<DeliveryGroupId>,
    ) {
        let stream_id = StreamId(inner.streams.insert(StreamRecordSlot {
            path: new_stream.path,
            label: new_stream.label,
            id: None,
            items: Some(new_stream.items),
            early_return: new_stream.early_return,
        }));

        match new_stream.parent {
            None => {
                working_set.insert(DeliveryGroupId::Stream(stream_id));
            }
            Some(usage) => {
                let parent_id = inner.add_deferred_fragment(arena, usage, working_set);
                inner.fragment_mut(parent_id).children.insert(DeliveryGroupId::Stream(stream_id));
                if inner.is_released(parent_id) {
                    working_set.insert(DeliveryGroupId::Stream(stream_id));
                }
            }
        }
    }

    /// Pull items out of a stream's source one at a time. Items that resolve
    /// synchronously (no `.await` between them) are coalesced into one
    /// batched `StreamItemsResult` rather than one message per item; the
    /// batch flushes early once it reaches
    /// `IncrementalDeliveryConfig::stream_initial_batch_size` (if nonzero),
    /// and always flushes before blocking on a still-pending item.
    fn spawn_stream_drain(&self, stream_id: StreamId) {
        let graph = self.clone();
        tokio::spawn(async move {
            let mut batch = StreamBatch::default();
            loop {
                let lazy = {
                    let mut inner = graph.inner.lock();
                    if inner.aborted {
                        return;
                    }
                    let slot = inner.streams.get_mut(stream_id.0);
                    match slot.items.as_deref_mut() {
                        Some(source) => source.next(),
                        None => return,
                    }
                };

                let result = match lazy.try_into_ready() {
                    Ok(result) => result,
                    Err(pending) => {
                        // A still-pending item means sibling work can no
                        // longer coalesce into this batch — flush it first.
                        graph.flush_stream_batch(stream_id, &mut batch);
                        let result = pending.into_future().await;
                        if graph.inner.lock().config.yield_between_stream_items {
                            tokio::task::yield_now().await;
                        }
                        result
                    }
                };

                match result {
                    StreamItemResult::Item { item, errors, incremental_data_records } => {
                        batch.items.push(item);
                        batch.errors.extend(errors.into_iter().flatten());
                        batch.records.extend(incremental_data_records);
                        let cap = graph.inner.lock().config.stream_initial_batch_size;
                        if cap != 0 && batch.items.len() >= cap {
                            graph.flush_stream_batch(stream_id, &mut batch);
                        }
                    }
                    terminal => {
                        graph.flush_stream_batch(stream_id, &mut batch);
                        let mut inner = graph.inner.lock();
                        if inner.aborted {
                            return;
                        }
                        let done = graph.on_stream_item(&mut inner, stream_id, terminal);
                        inner.wake_one_waiter();
                        drop(inner);
                        if done {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Enqueue whatever has accumulated in `batch` as one `StreamItemsResult`
    /// and clear it. A no-op if nothing has been buffered.
    fn flush_stream_batch(&self, stream_id: StreamId, batch: &mut StreamBatch) {
        if batch.items.is_empty() {
            return;
        }
        let items = std::mem::take(&mut batch.items);
        let errors = std::mem::take(&mut batch.errors);
        let records = std::mem::take(&mut batch.records);

        let arena = self.arena.lock();
        let mut inner = self.inner.lock();
        if inner.aborted {
            return;
        }
        let id = inner
            .streams
            .get(stream_id.0)
            .id
            .expect("stream is in the root set by the time items can be observed");
        let new_pending = self.ingest(&mut inner, &arena, records);
        inner.completed_queue.push_back(IncrementalDataRecordResult::StreamItems(StreamItemsResult {
            stream_id,
            id,
            items: Some(items),
            errors: if errors.is_empty() { None } else { Some(errors) },
            new_pending,
        }));
        inner.wake_one_waiter();
    }

    /// Handle a stream's terminal result. Returns `true` once the stream has
    /// produced it (normal end, or abnormal end with errors).
    fn on_stream_item(&self, inner: &mut GraphInner, stream_id: StreamId, result: StreamItemResult) -> bool {
        let id = inner
            .streams
            .get(stream_id.0)
            .id
            .expect("stream is in the root set by the time items can be observed");
        inner.in_flight -= 1;

        let errors = match result {
            StreamItemResult::Item { .. } => unreachable!("buffered by spawn_stream_drain, never reaches on_stream_item"),
            StreamItemResult::EndOfStream => {
                inner.streams.get_mut(stream_id.0).items = None;
                None
            }
            StreamItemResult::EndWithErrors { errors } => {
                inner.streams.get_mut(stream_id.0).items = None;
                Some(errors)
            }
        };
        inner.completed_queue.push_back(IncrementalDataRecordResult::StreamItems(StreamItemsResult {
            stream_id,
            id,
            items: None,
            errors,
            new_pending: Vec::new(),
        }));
        true
    }

    /// Whatever has completed but not yet been drained, taken without
    /// waiting. Empty means "nothing ready this tick" — unlike
    /// `next_completed_batch` this never resolves to a terminal `None`.
    pub fn current_completed_batch(&self) -> Vec<IncrementalDataRecordResult> {
        let mut inner = self.inner.lock();
        records::drain_queue(&mut inner.completed_queue)
    }

    /// Wait for the next non-empty completed batch, or `None` once the graph
    /// has nothing left to produce (aborted, or fully drained with no work
    /// in flight).
    pub async fn next_completed_batch(&self) -> Option<Vec<IncrementalDataRecordResult>> {
        let rx = {
            let mut inner = self.inner.lock();
            if !inner.completed_queue.is_empty() {
                return Some(records::drain_queue(&mut inner.completed_queue));
            }
            if inner.in_flight == 0 || inner.aborted {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };
        rx.await.unwrap_or(None)
    }

    /// Whether any more batches could still arrive: true iff the root set is
    /// non-empty (and the operation hasn't been aborted out from under it).
    pub fn has_next(&self) -> bool {
        let inner = self.inner.lock();
        !inner.aborted && !inner.root_nodes.is_empty()
    }

    /// Tear the graph down: no further batches will be produced, and any
    /// waiting `next_completed_batch` call resolves to `None`.
    pub fn abort(&self) {
        let early_returns: Vec<EarlyReturnFn> = {
            let mut inner = self.inner.lock();
            if inner.aborted {
                return;
            }
            inner.aborted = true;
            inner.completed_queue.clear();
            while let Some(tx) = inner.waiters.pop_front() {
                let _ = tx.send(None);
            }
            inner.streams.iter_mut().filter_map(|stream| stream.early_return.take()).collect()
        };
        for early_return in early_returns {
            tokio::spawn(early_return());
        }
    }

    /// Release a delivered fragment: mark it released (exposing its children
    /// to promotion from here on, including ones materialised later) and
    /// promote whichever of those children were only waiting on it. A child
    /// that is itself an empty scope wrapper is skipped in favour of its own
    /// children; a child that turns out to already be fully settled (its
    /// last execution group finished while still waiting on this release) is
    /// reported back via `completed_fragments` so the publisher can deliver
    /// it in the same sweep, and its own children are considered for release
    /// too. Returns `None` if `fragment_id` isn't actually complete yet — a
    /// precondition violation the caller should never trigger.
    pub fn complete_deferred_fragment(&self, fragment_id: FragmentId) -> Option<CompletedFragment> {
        let arena = self.arena.lock();
        let mut inner = self.inner.lock();
        if !inner.fragment(fragment_id).is_complete() {
            debug_assert!(false, "fragment released before its execution groups finished");
            return None;
        }
        inner.fragment_mut(fragment_id).released = true;

        let mut queue: VecDeque<DeliveryGroupId> = inner.fragment(fragment_id).children.iter().copied().collect();
        let mut new_root_nodes = Vec::new();
        let mut completed_fragments = Vec::new();
        while let Some(node) = queue.pop_front() {
            // `is_delivered` rather than root-set membership: a child may
            // have already been delivered *and removed* earlier in this same
            // batch (e.g. it settled and was released before its sibling's
            // release reached it via this cascade) — it must not be
            // rediscovered and re-promoted with a fresh id.
            if inner.is_delivered(node) {
                continue;
            }
            match node {
                DeliveryGroupId::Stream(stream_id) => {
                    if inner.promote_to_root(node) {
                        new_root_nodes.push(node);
                        inner.in_flight += 1;
                        self.spawn_stream_drain(stream_id);
                    }
                }
                DeliveryGroupId::Fragment(fid) => {
                    if inner.fragment(fid).has_no_work() {
                        inner.fragment_mut(fid).released = true;
                        queue.extend(inner.fragment(fid).children.iter().copied().collect::<Vec<_>>());
                        continue;
                    }
                    if inner.promote_to_root(node) {
                        new_root_nodes.push(node);
                    }
                    // Captured *before* invoking: a fragment can already be
                    // complete here if it shares an execution group with an
                    // already-delivered sibling that triggered that group's
                    // settlement earlier, while this one was still blocked
                    // behind its own unreleased parent — `settle_group`
                    // skipped crediting it then, since it had no id yet. A
                    // group invoked just now by this loop reports its own
                    // completion later, via its own queued result, so it
                    // must not also be captured here.
                    let already_complete = inner.fragment(fid).is_complete();
                    let pending: Vec<GroupId> = inner.fragment(fid).pending_execution_groups.iter().copied().collect();
                    for group_id in pending {
                        self.invoke_group(&mut inner, &arena, group_id);
                    }
                    if already_complete {
                        inner.fragment_mut(fid).released = true;
                        let id = inner.fragment(fid).id.expect("just promoted");
                        completed_fragments.push((fid, id));
                        queue.extend(inner.fragment(fid).children.iter().copied().collect::<Vec<_>>());
                    }
                }
            }
        }

        Some(CompletedFragment {
            new_root_nodes: new_root_nodes.into_iter().map(|group| inner.snapshot(group)).collect(),
            completed_fragments,
        })
    }

    /// Forget a fragment's bookkeeping once it has been fully delivered and
    /// its children released; the delivery id is never reused.
    pub fn remove_deferred_fragment(&self, fragment_id: FragmentId) {
        let mut inner = self.inner.lock();
        inner.root_nodes.shift_remove(&DeliveryGroupId::Fragment(fragment_id));
    }

    /// Forget a stream and fire its early-return hook, if any, so the
    /// upstream async iterator can stop producing.
    pub fn remove_stream(&self, stream_id: StreamId) {
        let early_return = {
            let mut inner = self.inner.lock();
            inner.root_nodes.shift_remove(&DeliveryGroupId::Stream(stream_id));
            inner.streams.get_mut(stream_id.0).early_return.take()
        };
        if let Some(early_return) = early_return {
            tokio::spawn(early_return());
        }
    }
}
