use glam::Vec3;

use super::contents::Contents;
use super::tree::BspTree;

impl BspTree {
    pub fn point_contents(&self, point: Vec3) -> Contents {
        self.leaves()[self.find_leaf(point)].contents
    }

    /// Whether the segment reaches `end` without entering a solid leaf.
    pub fn trace_line(&self, start: Vec3, end: Vec3) -> bool {
        self.trace_line_mask(start, end, Contents::SOLID)
    }

    /// Whether the segment reaches `end` without entering a leaf whose
    /// contents intersect `blocking`.
    pub fn trace_line_mask(&self, start: Vec3, end: Vec3, blocking: Contents) -> bool {
        self.trace_node(self.root(), start, end, blocking, self.nodes().len() + 1)
    }

    fn trace_node(&self, index: i32, p1: Vec3, p2: Vec3, blocking: Contents, depth: usize) -> bool {
        if index < 0 {
            let leaf = &self.leaves()[(!index) as usize];
            return !leaf.contents.intersects(blocking);
        }
        if depth == 0 {
            log::warn!("Line trace exceeded the tree depth");
            return false;
        }

        let node = &self.nodes()[index as usize];
        let plane = &self.planes()[node.plane];
        let t1 = plane.distance(p1);
        let t2 = plane.distance(p2);

        if t1 >= 0.0 && t2 >= 0.0 {
            return self.trace_node(node.children[0], p1, p2, blocking, depth - 1);
        }
        if t1 < 0.0 && t2 < 0.0 {
            return self.trace_node(node.children[1], p1, p2, blocking, depth - 1);
        }

        // The segment crosses the plane: near half first, then the far half.
        let frac = t1 / (t1 - t2);
        let mid = p1 + (p2 - p1) * frac;
        let near = if t1 < 0.0 { 1 } else { 0 };

        self.trace_node(node.children[near], p1, mid, blocking, depth - 1)
            && self.trace_node(node.children[near ^ 1], mid, p2, blocking, depth - 1)
    }
}
