// Resource registry: which nodes and stations take part in allocation.
//
// The registry is single-writer. Only the owning thread registers,
// unregisters, snapshots and queries; the worker never sees the registry,
// only the snapshot rows and requests it is sent.
//
// Registration takes a `Capability` resolved once by the caller, and is
// idempotent: adding a present entity or removing an absent one reports
// `Unchanged`. Handles that no longer resolve, and stations whose owner is
// not the single supported owner, are rejected with a `warn!` and a
// `Rejected` outcome. Nothing here returns an error.
//
// Live collections are kept in registration order (a `Vec`, mirrored by an
// `FxHashSet` for membership). Snapshot enumeration follows that order,
// which is what gives ranking its deterministic tie-break. Snapshots skip
// handles whose entity has been destroyed; `prune` removes them from the
// live collections on a slower cadence.
//
// Queries carry a caller-chosen route `R` (who asked). The route stays here
// in `pending`, keyed by `QueryId`; only the request goes to the worker.
// `poll_replies` pairs replies with routes on the owning thread. If the
// worker is unavailable the query is answered synchronously with an empty
// list via `Dispatch::Answered`. If the worker dies while queries are
// pending, the next poll answers each of them empty, once.

use crate::capability::Capability;
use crate::entity::EntityArena;
use crate::query::{QueryAnswer, QueryId, QueryKind, QueryRequest, WorkerReply};
use crate::snapshot::{NodeSnapshot, SnapshotSet, SnapshotUpdate, StationSnapshot};
use crate::types::{NodeHandle, OwnerId, Point3, ResourceType, StationHandle};
use crate::worker::SnapshotWorker;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::hash::Hash;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationOp {
    Add,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The handle no longer resolves in the arena.
    Destroyed,
    /// Only one owner may register drop-off stations.
    UnsupportedOwner { owner: OwnerId, supported: OwnerId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Added,
    Removed,
    /// Add of a present entity, or remove of an absent one.
    Unchanged,
    Rejected(RejectReason),
}

/// A query answer paired with the route of whoever asked.
#[derive(Clone, Debug)]
pub struct QueryReply<R> {
    pub id: QueryId,
    pub route: R,
    pub answer: QueryAnswer,
}

/// What happened to a query when it was issued.
#[derive(Clone, Debug)]
pub enum Dispatch<R> {
    /// Enqueued for the worker; the reply arrives through `poll_replies`.
    Queued(QueryId),
    /// No worker: answered immediately, always with an empty list.
    Answered(QueryReply<R>),
}

#[derive(Clone, Debug)]
struct Pending<R> {
    route: R,
    kind: QueryKind,
}

/// Ordered set: registration order plus O(1) membership.
#[derive(Clone, Debug)]
struct LiveSet<H> {
    order: Vec<H>,
    members: FxHashSet<H>,
}

impl<H> Default for LiveSet<H> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            members: FxHashSet::default(),
        }
    }
}

impl<H: Copy + Eq + Hash> LiveSet<H> {
    fn insert(&mut self, handle: H) -> bool {
        if self.members.insert(handle) {
            self.order.push(handle);
            true
        } else {
            false
        }
    }

    fn remove(&mut self, handle: H) -> bool {
        if self.members.remove(&handle) {
            self.order.retain(|&h| h != handle);
            true
        } else {
            false
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(H) -> bool) -> usize {
        let before = self.order.len();
        let members = &mut self.members;
        self.order.retain(|&h| {
            let kept = keep(h);
            if !kept {
                members.remove(&h);
            }
            kept
        });
        before - self.order.len()
    }
}

pub struct ResourceRegistry<R> {
    supported_owner: OwnerId,
    nodes: LiveSet<NodeHandle>,
    stations: LiveSet<StationHandle>,
    worker: Option<SnapshotWorker>,
    /// Routes of queries handed to the worker and not yet answered.
    pending: BTreeMap<QueryId, Pending<R>>,
    next_query_id: u64,
}

impl<R> ResourceRegistry<R> {
    /// Registry backed by a freshly spawned worker. If the thread cannot be
    /// started the failure is logged and the registry runs without one.
    pub fn new(supported_owner: OwnerId, worker_sleep: Duration) -> Self {
        match SnapshotWorker::spawn(worker_sleep) {
            Ok(worker) => Self::with_worker(supported_owner, worker),
            Err(err) => {
                warn!("{err}; queries will be answered empty");
                Self::without_worker(supported_owner)
            }
        }
    }

    pub fn with_worker(supported_owner: OwnerId, worker: SnapshotWorker) -> Self {
        Self {
            worker: Some(worker),
            ..Self::without_worker(supported_owner)
        }
    }

    /// Registry with no worker: every query is answered synchronously with
    /// an empty list.
    pub fn without_worker(supported_owner: OwnerId) -> Self {
        Self {
            supported_owner,
            nodes: LiveSet::default(),
            stations: LiveSet::default(),
            worker: None,
            pending: BTreeMap::new(),
            next_query_id: 0,
        }
    }

    pub fn supported_owner(&self) -> OwnerId {
        self.supported_owner
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register(
        &mut self,
        capability: Capability,
        op: RegistrationOp,
        arena: &EntityArena,
    ) -> RegistrationOutcome {
        if !capability.is_live(arena) {
            warn!(?capability, ?op, "registration rejected: entity destroyed");
            return RegistrationOutcome::Rejected(RejectReason::Destroyed);
        }
        let changed = match capability {
            Capability::Resource(node) => match op {
                RegistrationOp::Add => self.nodes.insert(node),
                RegistrationOp::Remove => self.nodes.remove(node),
            },
            Capability::Storage { station, owner } => {
                if owner != self.supported_owner {
                    warn!(
                        ?station,
                        %owner,
                        supported = %self.supported_owner,
                        "registration rejected: unsupported owner"
                    );
                    return RegistrationOutcome::Rejected(RejectReason::UnsupportedOwner {
                        owner,
                        supported: self.supported_owner,
                    });
                }
                match op {
                    RegistrationOp::Add => self.stations.insert(station),
                    RegistrationOp::Remove => self.stations.remove(station),
                }
            }
        };
        match (changed, op) {
            (false, _) => RegistrationOutcome::Unchanged,
            (true, RegistrationOp::Add) => RegistrationOutcome::Added,
            (true, RegistrationOp::Remove) => RegistrationOutcome::Removed,
        }
    }

    pub fn register_resource_node(
        &mut self,
        node: NodeHandle,
        op: RegistrationOp,
        arena: &EntityArena,
    ) -> RegistrationOutcome {
        self.register(Capability::Resource(node), op, arena)
    }

    pub fn register_drop_off_station(
        &mut self,
        station: StationHandle,
        op: RegistrationOp,
        owner: OwnerId,
        arena: &EntityArena,
    ) -> RegistrationOutcome {
        self.register(Capability::Storage { station, owner }, op, arena)
    }

    pub fn contains_node(&self, node: NodeHandle) -> bool {
        self.nodes.members.contains(&node)
    }

    pub fn contains_station(&self, station: StationHandle) -> bool {
        self.stations.members.contains(&station)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.order.len()
    }

    pub fn station_count(&self) -> usize {
        self.stations.order.len()
    }

    /// Drop handles whose entity has been destroyed. Returns how many went.
    pub fn prune(&mut self, arena: &EntityArena) -> usize {
        let nodes = self.nodes.retain(|h| arena.node(h).is_some());
        let stations = self.stations.retain(|h| arena.station(h).is_some());
        if nodes + stations > 0 {
            debug!(nodes, stations, "pruned destroyed registrations");
        }
        nodes + stations
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Value copies of every live registered node, in registration order.
    pub fn build_resource_snapshot(
        &self,
        arena: &EntityArena,
        tick: u64,
    ) -> SnapshotSet<NodeSnapshot> {
        let rows = self
            .nodes
            .order
            .iter()
            .filter_map(|&h| arena.node(h).map(|node| NodeSnapshot::capture(h, node)))
            .collect();
        SnapshotSet { tick, rows }
    }

    pub fn build_drop_off_snapshot(
        &self,
        arena: &EntityArena,
        tick: u64,
    ) -> SnapshotSet<StationSnapshot> {
        let rows = self
            .stations
            .order
            .iter()
            .filter_map(|&h| {
                arena
                    .station(h)
                    .map(|station| StationSnapshot::capture(h, station))
            })
            .collect();
        SnapshotSet { tick, rows }
    }

    /// Build and publish a resource-node snapshot. Returns the row count.
    pub fn snapshot_resources(&mut self, arena: &EntityArena, tick: u64) -> usize {
        let set = self.build_resource_snapshot(arena, tick);
        let rows = set.rows.len();
        self.publish(SnapshotUpdate::Resources(set));
        debug!(tick, rows, "published resource snapshot");
        rows
    }

    /// Build and publish a drop-off snapshot. Returns the row count.
    pub fn snapshot_drop_offs(&mut self, arena: &EntityArena, tick: u64) -> usize {
        let set = self.build_drop_off_snapshot(arena, tick);
        let rows = set.rows.len();
        self.publish(SnapshotUpdate::DropOffs(set));
        debug!(tick, rows, "published drop-off snapshot");
        rows
    }

    fn publish(&self, update: SnapshotUpdate) {
        let delivered = self.worker.as_ref().is_some_and(|w| w.publish(update));
        if !delivered && self.worker.is_some() {
            debug!("snapshot dropped: worker gone");
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn query_closest_resources(
        &mut self,
        origin: Point3,
        count: usize,
        resource_type: ResourceType,
        route: R,
    ) -> Dispatch<R> {
        self.dispatch(origin, count, QueryKind::Resources { resource_type }, route)
    }

    pub fn query_closest_drop_offs(
        &mut self,
        origin: Point3,
        count: usize,
        owner: Option<OwnerId>,
        carried_amount: u32,
        resource_type: ResourceType,
        route: R,
    ) -> Dispatch<R> {
        self.dispatch(
            origin,
            count,
            QueryKind::DropOffs {
                resource_type,
                owner,
                carried_amount,
            },
            route,
        )
    }

    fn dispatch(&mut self, origin: Point3, count: usize, kind: QueryKind, route: R) -> Dispatch<R> {
        let id = QueryId(self.next_query_id);
        self.next_query_id += 1;

        let Some(worker) = &self.worker else {
            return Dispatch::Answered(QueryReply {
                id,
                route,
                answer: QueryAnswer::empty_for(&kind),
            });
        };
        let request = QueryRequest {
            id,
            origin,
            count,
            kind,
        };
        match worker.submit(request) {
            Ok(()) => {
                self.pending.insert(id, Pending { route, kind });
                Dispatch::Queued(id)
            }
            Err(request) => {
                debug!(query = id.0, "worker gone, answering empty");
                Dispatch::Answered(QueryReply {
                    id,
                    route,
                    answer: QueryAnswer::empty_for(&request.kind),
                })
            }
        }
    }

    /// Replies that have arrived since the last poll, paired with their
    /// routes. If the worker has stopped, every still-pending query is
    /// answered empty and the worker handle is released.
    pub fn poll_replies(&mut self) -> Vec<QueryReply<R>> {
        let Some(worker) = &mut self.worker else {
            return self.flush_pending();
        };
        let alive = worker.is_running();
        if !alive {
            // Join first so every reply the thread sent is in the channel.
            worker.stop();
        }
        let replies = worker.drain_replies();
        let mut out = self.pair(replies);
        if !alive {
            info!(pending = self.pending.len(), "snapshot worker lost");
            self.worker = None;
            out.extend(self.flush_pending());
        }
        out
    }

    /// Like `poll_replies`, but if nothing has arrived yet, block up to
    /// `timeout` for the first reply.
    pub fn wait_for_replies(&mut self, timeout: Duration) -> Vec<QueryReply<R>> {
        let out = self.poll_replies();
        if !out.is_empty() || self.pending.is_empty() {
            return out;
        }
        let first = match &self.worker {
            Some(worker) => worker.recv_reply_timeout(timeout),
            None => None,
        };
        let mut out = self.pair(first.into_iter().collect());
        out.extend(self.poll_replies());
        out
    }

    fn pair(&mut self, replies: Vec<WorkerReply>) -> Vec<QueryReply<R>> {
        replies
            .into_iter()
            .filter_map(|reply| match self.pending.remove(&reply.id) {
                Some(pending) => Some(QueryReply {
                    id: reply.id,
                    route: pending.route,
                    answer: reply.answer,
                }),
                None => {
                    debug!(query = reply.id.0, "reply for unknown query dropped");
                    None
                }
            })
            .collect()
    }

    fn flush_pending(&mut self) -> Vec<QueryReply<R>> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(id, pending)| QueryReply {
                id,
                answer: QueryAnswer::empty_for(&pending.kind),
                route: pending.route,
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_worker_available(&self) -> bool {
        self.worker.as_ref().is_some_and(SnapshotWorker::is_running)
    }

    /// Stop the worker. Queries still in flight come back empty on the next
    /// poll; later queries are answered synchronously.
    pub fn shutdown_worker(&mut self) {
        if let Some(worker) = &mut self.worker {
            worker.stop();
            info!("snapshot worker shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DropOffStation, ResourceNode};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn arena_with_nodes(xs: &[f32]) -> (EntityArena, Vec<NodeHandle>) {
        let mut arena = EntityArena::new();
        let handles = xs
            .iter()
            .map(|&x| {
                arena.insert_node(ResourceNode::new(
                    Point3::new(x, 0.0, 0.0),
                    ResourceType::Wood,
                    100,
                    10,
                    8,
                ))
            })
            .collect();
        (arena, handles)
    }

    /// Wait until `n` replies have come back, or panic.
    fn collect_replies<R>(registry: &mut ResourceRegistry<R>, n: usize) -> Vec<QueryReply<R>> {
        let mut out = Vec::new();
        let deadline = std::time::Instant::now() + TIMEOUT;
        while out.len() < n {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for replies");
            out.extend(registry.wait_for_replies(Duration::from_millis(50)));
        }
        out
    }

    #[test]
    fn registration_is_idempotent() {
        let (arena, nodes) = arena_with_nodes(&[1.0]);
        let mut registry: ResourceRegistry<()> = ResourceRegistry::without_worker(OwnerId(0));

        let add = |r: &mut ResourceRegistry<()>| {
            r.register_resource_node(nodes[0], RegistrationOp::Add, &arena)
        };
        assert_eq!(add(&mut registry), RegistrationOutcome::Added);
        assert_eq!(add(&mut registry), RegistrationOutcome::Unchanged);
        assert_eq!(registry.node_count(), 1);

        let remove = |r: &mut ResourceRegistry<()>| {
            r.register_resource_node(nodes[0], RegistrationOp::Remove, &arena)
        };
        assert_eq!(remove(&mut registry), RegistrationOutcome::Removed);
        assert_eq!(remove(&mut registry), RegistrationOutcome::Unchanged);
        assert_eq!(registry.node_count(), 0);
    }

    #[test]
    fn destroyed_handle_is_rejected() {
        let (mut arena, nodes) = arena_with_nodes(&[1.0]);
        arena.remove_node(nodes[0]);
        let mut registry: ResourceRegistry<()> = ResourceRegistry::without_worker(OwnerId(0));
        assert_eq!(
            registry.register_resource_node(nodes[0], RegistrationOp::Add, &arena),
            RegistrationOutcome::Rejected(RejectReason::Destroyed)
        );
        assert!(!registry.contains_node(nodes[0]));
    }

    #[test]
    fn unsupported_owner_is_rejected() {
        let mut arena = EntityArena::new();
        let station = arena.insert_station(
            DropOffStation::new(Point3::ORIGIN, OwnerId(2)).with_capacity(
                ResourceType::Wood,
                0,
                10,
            ),
        );
        let mut registry: ResourceRegistry<()> = ResourceRegistry::without_worker(OwnerId(0));
        assert_eq!(
            registry.register_drop_off_station(station, RegistrationOp::Add, OwnerId(2), &arena),
            RegistrationOutcome::Rejected(RejectReason::UnsupportedOwner {
                owner: OwnerId(2),
                supported: OwnerId(0),
            })
        );
        assert_eq!(registry.station_count(), 0);
    }

    #[test]
    fn snapshot_skips_destroyed_and_prune_removes_them() {
        let (mut arena, nodes) = arena_with_nodes(&[1.0, 2.0, 3.0]);
        let mut registry: ResourceRegistry<()> = ResourceRegistry::without_worker(OwnerId(0));
        for &h in &nodes {
            registry.register_resource_node(h, RegistrationOp::Add, &arena);
        }
        arena.remove_node(nodes[1]);

        let set = registry.build_resource_snapshot(&arena, 5);
        let handles: Vec<_> = set.rows.iter().map(|r| r.handle).collect();
        assert_eq!(handles, vec![nodes[0], nodes[2]]);
        assert_eq!(registry.node_count(), 3, "snapshot does not prune");

        assert_eq!(registry.prune(&arena), 1);
        assert_eq!(registry.node_count(), 2);
        assert!(!registry.contains_node(nodes[1]));
    }

    #[test]
    fn unregister_removes_from_next_snapshot() {
        let (arena, nodes) = arena_with_nodes(&[1.0, 2.0]);
        let mut registry: ResourceRegistry<()> = ResourceRegistry::without_worker(OwnerId(0));
        registry.register_resource_node(nodes[0], RegistrationOp::Add, &arena);
        registry.register_resource_node(nodes[1], RegistrationOp::Add, &arena);
        registry.register_resource_node(nodes[0], RegistrationOp::Remove, &arena);

        let set = registry.build_resource_snapshot(&arena, 1);
        assert_eq!(set.rows.len(), 1);
        assert_eq!(set.rows[0].handle, nodes[1]);
    }

    #[test]
    fn without_worker_answers_synchronously_empty() {
        let (arena, nodes) = arena_with_nodes(&[1.0]);
        let mut registry = ResourceRegistry::without_worker(OwnerId(0));
        registry.register_resource_node(nodes[0], RegistrationOp::Add, &arena);
        registry.snapshot_resources(&arena, 0);

        match registry.query_closest_resources(Point3::ORIGIN, 3, ResourceType::Wood, "me") {
            Dispatch::Answered(reply) => {
                assert_eq!(reply.route, "me");
                assert_eq!(reply.answer, QueryAnswer::Resources(Vec::new()));
            }
            Dispatch::Queued(_) => panic!("no worker, must answer immediately"),
        }
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn worker_reply_is_routed_back() {
        let (arena, nodes) = arena_with_nodes(&[8.0, 2.0, 5.0]);
        let mut registry = ResourceRegistry::new(OwnerId(0), Duration::from_millis(5));
        for &h in &nodes {
            registry.register_resource_node(h, RegistrationOp::Add, &arena);
        }
        registry.snapshot_resources(&arena, 0);

        let dispatch =
            registry.query_closest_resources(Point3::ORIGIN, 2, ResourceType::Wood, 42u32);
        let Dispatch::Queued(id) = dispatch else {
            panic!("worker should be available");
        };
        assert_eq!(registry.pending_count(), 1);

        let replies = collect_replies(&mut registry, 1);
        assert_eq!(replies[0].id, id);
        assert_eq!(replies[0].route, 42);
        assert_eq!(
            replies[0].answer,
            QueryAnswer::Resources(vec![nodes[1], nodes[2]])
        );
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn shutdown_answers_pending_once_then_goes_synchronous() {
        let (arena, nodes) = arena_with_nodes(&[1.0]);
        let mut registry = ResourceRegistry::new(OwnerId(0), Duration::from_millis(5));
        registry.register_resource_node(nodes[0], RegistrationOp::Add, &arena);
        registry.snapshot_resources(&arena, 0);

        for route in 0..5u32 {
            registry.query_closest_resources(Point3::ORIGIN, 1, ResourceType::Wood, route);
        }
        registry.shutdown_worker();
        assert!(!registry.is_worker_available());

        let replies = registry.poll_replies();
        let mut routes: Vec<_> = replies.iter().map(|r| r.route).collect();
        routes.sort();
        assert_eq!(routes, vec![0, 1, 2, 3, 4], "each pending query answered once");
        assert!(registry.poll_replies().is_empty());

        let late = registry.query_closest_resources(Point3::ORIGIN, 1, ResourceType::Wood, 9);
        assert!(matches!(late, Dispatch::Answered(ref r) if r.answer.is_empty()));
    }
}
