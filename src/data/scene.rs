//! Scene-graph attachment point.
//!
//! Data objects can carry a link into a transform lineage that is
//! independent of the execution graph. Only the attachment and the chained
//! transform lookup live in the core; rendering consumes the result.

use std::sync::Arc;

/// Column-major 4x4 transform.
pub type Transform = [[f32; 4]; 4];

/// Identity transform.
pub const IDENTITY: Transform = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// A node in the transform lineage. Immutable once created; re-attaching a
/// data object to a new node is how transforms change.
#[derive(Debug)]
pub struct SceneNode {
    transform: Transform,
    parent: Option<Arc<SceneNode>>,
}

impl SceneNode {
    pub fn root(transform: Transform) -> Arc<Self> {
        Arc::new(Self {
            transform,
            parent: None,
        })
    }

    pub fn child_of(parent: &Arc<SceneNode>, transform: Transform) -> Arc<Self> {
        Arc::new(Self {
            transform,
            parent: Some(parent.clone()),
        })
    }

    pub fn local_transform(&self) -> Transform {
        self.transform
    }

    pub fn parent(&self) -> Option<Arc<SceneNode>> {
        self.parent.clone()
    }

    /// Accumulated transform from the root down to this node.
    pub fn world_transform(&self) -> Transform {
        match &self.parent {
            None => self.transform,
            Some(parent) => multiply(&parent.world_transform(), &self.transform),
        }
    }
}

fn multiply(a: &Transform, b: &Transform) -> Transform {
    let mut out = [[0.0f32; 4]; 4];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translation(x: f32, y: f32, z: f32) -> Transform {
        let mut t = IDENTITY;
        t[0][3] = x;
        t[1][3] = y;
        t[2][3] = z;
        t
    }

    #[test]
    fn test_world_transform_chains_parents() {
        let root = SceneNode::root(translation(1.0, 0.0, 0.0));
        let child = SceneNode::child_of(&root, translation(0.0, 2.0, 0.0));
        let world = child.world_transform();
        assert_eq!(world[0][3], 1.0);
        assert_eq!(world[1][3], 2.0);
    }

    #[test]
    fn test_root_world_transform_is_local() {
        let root = SceneNode::root(IDENTITY);
        assert_eq!(root.world_transform(), IDENTITY);
    }
}
