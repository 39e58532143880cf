use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use glam::{Mat4, Vec3};

use crate::bsp::{Aabb, BspTree, Contents};

#[derive(Debug, Default)]
struct VisibleSet {
    current_leaf: Option<usize>,
    leaves: Vec<usize>,
    /// Bounds and contents of each visible leaf, in `leaves` order.
    bounds: Vec<(Aabb, Contents)>,
}

/// Potentially visible leaves around one observer.
///
/// The simulation thread calls [`update`](Self::update); any other thread may
/// query the cached set at the same time.
#[derive(Debug)]
pub struct LeafTracker {
    tree: Arc<BspTree>,
    visible: RwLock<VisibleSet>,
}

impl LeafTracker {
    pub fn new(tree: Arc<BspTree>) -> Self {
        Self {
            tree,
            visible: RwLock::new(VisibleSet::default()),
        }
    }

    pub fn tree(&self) -> &Arc<BspTree> {
        &self.tree
    }

    fn read(&self) -> RwLockReadGuard<'_, VisibleSet> {
        self.visible.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the observer. The visible set is only rebuilt when the observer
    /// enters a different leaf; returns whether that happened.
    pub fn update(&self, observer: Vec3) -> bool {
        let leaf = self.tree.find_leaf(observer);
        if self.read().current_leaf == Some(leaf) {
            return false;
        }

        let mut leaves = vec![leaf];
        leaves.extend(
            (1..=self.tree.visleafs()).filter(|&other| other != leaf && self.tree.is_visible(leaf, other)),
        );
        let bounds = leaves
            .iter()
            .filter_map(|&index| {
                let contents = self.tree.leaves().get(index)?.contents;
                Some((self.tree.leaf_bounds(index)?, contents))
            })
            .collect();

        log::debug!("Observer entered leaf {leaf}, {} leaves visible", leaves.len());

        let mut visible = self.visible.write().unwrap_or_else(PoisonError::into_inner);
        *visible = VisibleSet {
            current_leaf: Some(leaf),
            leaves,
            bounds,
        };
        true
    }

    /// Forgets the current leaf so the next update rebuilds.
    pub fn reset(&self) {
        let mut visible = self.visible.write().unwrap_or_else(PoisonError::into_inner);
        *visible = VisibleSet::default();
    }

    pub fn current_leaf(&self) -> Option<usize> {
        self.read().current_leaf
    }

    /// Visible leaves, current leaf first.
    pub fn visible_leaves(&self) -> Vec<usize> {
        self.read().leaves.clone()
    }

    pub fn visible_leaf_bounds(&self) -> Vec<Aabb> {
        self.read().bounds.iter().map(|(bounds, _)| *bounds).collect()
    }

    pub fn is_leaf_visible(&self, leaf: usize) -> bool {
        self.read().leaves.contains(&leaf)
    }

    /// Whether `bounds` touches any potentially visible leaf.
    pub fn pvs_bounds_test(&self, bounds: &Aabb) -> bool {
        self.pvs_bounds_test_with(bounds, Contents::empty())
    }

    /// Like [`pvs_bounds_test`](Self::pvs_bounds_test), but only leaves whose
    /// contents intersect `required` count. An empty mask accepts any leaf.
    pub fn pvs_bounds_test_with(&self, bounds: &Aabb, required: Contents) -> bool {
        self.read().bounds.iter().any(|(leaf, contents)| {
            (required.is_empty() || contents.intersects(required)) && leaf.intersects(bounds)
        })
    }
}

/// Moves `bounds` into world space by a node's net transform.
pub fn make_net_bounds(net_transform: &Mat4, bounds: &Aabb) -> Aabb {
    if *net_transform == Mat4::IDENTITY {
        return *bounds;
    }
    bounds.transformed(net_transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keeps_bounds() {
        let bounds = Aabb::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(make_net_bounds(&Mat4::IDENTITY, &bounds), bounds);

        let moved = make_net_bounds(&Mat4::from_translation(Vec3::X * 5.0), &bounds);
        assert_eq!(moved.min, Vec3::new(4.0, -2.0, -3.0));
        assert_eq!(moved.max, Vec3::new(6.0, 2.0, 3.0));
    }
}
