use std::collections::{BTreeSet, HashSet, VecDeque};
use veinmine_common::{Material, Position};

use crate::world::BlockAccess;

/// A connected set of same-material blocks, origin first, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cluster {
    positions: Vec<Position>,
    members: HashSet<Position>,
}

impl Cluster {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.members.contains(&pos)
    }

    pub fn origin(&self) -> Option<Position> {
        self.positions.first().copied()
    }

    /// All positions in breadth-first order.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Every position except the origin, which the host breaks itself.
    pub fn without_origin(&self) -> &[Position] {
        self.positions.get(1..).unwrap_or(&[])
    }

    fn push(&mut self, pos: Position) {
        if self.members.insert(pos) {
            self.positions.push(pos);
        }
    }
}

/// Flood-fill the blocks sharing the origin's material.
///
/// Empty when the origin is not in `allowed` or `max_size` is zero.
pub fn find_cluster<A>(
    access: &A,
    origin: Position,
    allowed: &BTreeSet<Material>,
    max_size: usize,
) -> Cluster
where
    A: BlockAccess + ?Sized,
{
    let Some(material) = access.material_at(origin) else {
        return Cluster::empty();
    };
    if !allowed.contains(&material) {
        return Cluster::empty();
    }
    find_cluster_matching(access, origin, max_size, |m| m == material)
}

/// Breadth-first search from `origin` over face neighbours accepted by `pred`.
///
/// The origin itself must satisfy `pred`. A position is visited at most once
/// and nothing is enqueued once the result holds `max_size` positions.
pub fn find_cluster_matching<A, F>(
    access: &A,
    origin: Position,
    max_size: usize,
    pred: F,
) -> Cluster
where
    A: BlockAccess + ?Sized,
    F: Fn(Material) -> bool,
{
    let mut cluster = Cluster::empty();
    if max_size == 0 || !access.material_at(origin).is_some_and(&pred) {
        return cluster;
    }

    let mut visited = HashSet::from([origin]);
    let mut queue = VecDeque::from([origin]);
    cluster.push(origin);

    while let Some(current) = queue.pop_front() {
        for d in Position::FACE_OFFSETS {
            if cluster.len() >= max_size {
                return cluster;
            }
            let Some(next) = access.neighbor(current, d.x, d.y, d.z) else {
                continue;
            };
            if !visited.insert(next) {
                continue;
            }
            if access.material_at(next).is_some_and(&pred) {
                cluster.push(next);
                queue.push_back(next);
            }
        }
    }
    cluster
}
