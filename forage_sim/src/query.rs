// Query wire types and the nearest-candidate ranking algorithm.
//
// A query travels main thread -> worker as a `QueryRequest` (id, origin,
// count, kind) and comes back as a `WorkerReply` carrying only candidate
// handles. Who asked, and what to do with the answer, never leaves the main
// thread: the registry keeps that keyed by `QueryId`.
//
// Ranking is the same for both kinds:
// 1. Filter rows (type match; nodes not empty and not fully occupied;
//    stations active, owner match, room for the type).
// 2. Euclidean distance from the origin.
// 3. Stable sort ascending, take the first `count`.
// Equal distances keep snapshot enumeration order, which is registration
// order, so results are reproducible. The functions here are pure and run
// on whichever thread calls them.

use crate::snapshot::{NodeSnapshot, StationSnapshot};
use crate::types::{NodeHandle, OwnerId, Point3, ResourceType, StationHandle};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueryKind {
    Resources {
        resource_type: ResourceType,
    },
    DropOffs {
        resource_type: ResourceType,
        owner: Option<OwnerId>,
        /// How much the asker carries. Advisory only: any station with room
        /// for one unit qualifies, and the remainder path handles the rest.
        carried_amount: u32,
    },
}

#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub id: QueryId,
    pub origin: Point3,
    pub count: usize,
    pub kind: QueryKind,
}

/// Ranked candidate handles, nearest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryAnswer {
    Resources(Vec<NodeHandle>),
    DropOffs(Vec<StationHandle>),
}

impl QueryAnswer {
    /// The empty answer of the right shape for `kind`.
    pub fn empty_for(kind: &QueryKind) -> Self {
        match kind {
            QueryKind::Resources { .. } => QueryAnswer::Resources(Vec::new()),
            QueryKind::DropOffs { .. } => QueryAnswer::DropOffs(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryAnswer::Resources(v) => v.len(),
            QueryAnswer::DropOffs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug)]
pub struct WorkerReply {
    pub id: QueryId,
    pub answer: QueryAnswer,
}

/// Answer one request against the given snapshot rows.
pub fn answer(
    request: &QueryRequest,
    resources: &[NodeSnapshot],
    drop_offs: &[StationSnapshot],
) -> QueryAnswer {
    match request.kind {
        QueryKind::Resources { resource_type } => QueryAnswer::Resources(rank_resources(
            resources,
            request.origin,
            request.count,
            resource_type,
        )),
        QueryKind::DropOffs {
            resource_type,
            owner,
            ..
        } => QueryAnswer::DropOffs(rank_drop_offs(
            drop_offs,
            request.origin,
            request.count,
            resource_type,
            owner,
        )),
    }
}

pub fn rank_resources(
    rows: &[NodeSnapshot],
    origin: Point3,
    count: usize,
    resource_type: ResourceType,
) -> Vec<NodeHandle> {
    nearest(
        rows,
        origin,
        count,
        |row| row.resource_type == resource_type && row.remaining > 0 && !row.fully_occupied,
        |row| (row.position, row.handle),
    )
}

pub fn rank_drop_offs(
    rows: &[StationSnapshot],
    origin: Point3,
    count: usize,
    resource_type: ResourceType,
    owner: Option<OwnerId>,
) -> Vec<StationHandle> {
    nearest(
        rows,
        origin,
        count,
        |row| {
            row.active
                && owner.is_none_or(|o| o == row.owner)
                && row.room_for(resource_type) > 0
        },
        |row| (row.position, row.handle),
    )
}

fn nearest<T, H: Copy>(
    rows: &[T],
    origin: Point3,
    count: usize,
    keep: impl Fn(&T) -> bool,
    locate: impl Fn(&T) -> (Point3, H),
) -> Vec<H> {
    if count == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(f32, H)> = rows
        .iter()
        .filter(|row| keep(row))
        .map(|row| {
            let (position, handle) = locate(row);
            (origin.distance(position), handle)
        })
        .collect();
    // `sort_by` is stable: ties keep enumeration order.
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.truncate(count);
    scored.into_iter().map(|(_, handle)| handle).collect()
}
