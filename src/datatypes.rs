use nalgebra::{SMatrix, Vector3};

use crate::material::MaterialId;

/// Physical tag of primary (matrix) material triangles
pub const MATRIX_TAG: usize = 1;
/// Physical tag of secondary (fiber) material triangles
pub const FIBER_TAG: usize = 2;
/// Physical tag of fiber-matrix interface edges
pub const INTERFACE_EDGE_TAG: usize = 11;
/// Physical tag of outer boundary edges
pub const BOUNDARY_EDGE_TAG: usize = 12;

/// Degrees of freedom per node (x and y displacement)
pub const DOF: usize = 2;

/// Element stiffness, indexed [ux1, uy1, ux2, uy2, ux3, uy3]
pub type ElementStiffness = SMatrix<f64, 6, 6>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        f64::sqrt(f64::powi(self.x - other.x, 2) + f64::powi(self.y - other.y, 2))
    }
}

/// Displacement direction of a nodal degree of freedom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn offset(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }
}

/// Maps a 1-based node id to its global degree of freedom.
///
/// Node `i` owns dofs `2(i-1)` (x) and `2(i-1)+1` (y). Returns `None` for id 0.
pub fn dof_index(node_id: usize, axis: Axis) -> Option<usize> {
    node_id
        .checked_sub(1)
        .map(|index| DOF * index + axis.offset())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: usize,
    pub vertex: Vertex,
}

impl Node {
    pub fn new(id: usize, x: f64, y: f64) -> Node {
        Node {
            id,
            vertex: Vertex { x, y },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    /// Stiffness not computed yet
    Pending,
    /// Stiffness computed, contributes to assembly
    Active,
    /// Area below the degeneracy threshold, zero stiffness
    Degenerate,
    /// Physical tag without a registered material, contributes no stiffness
    MissingMaterial,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub id: usize,
    pub nodes: [usize; 3],
    pub physical_tag: usize,
    pub material: Option<MaterialId>,
    pub area: f64,
    pub stiffness: ElementStiffness,
    pub status: ElementStatus,
    /// Plane stress components (σx, σy, τxy) after a solve
    pub stress: Option<Vector3<f64>>,
}

impl Element {
    pub fn new(
        id: usize,
        nodes: [usize; 3],
        physical_tag: usize,
        material: Option<MaterialId>,
    ) -> Element {
        Element {
            id,
            nodes,
            physical_tag,
            material,
            area: 0.0,
            stiffness: ElementStiffness::zeros(),
            status: ElementStatus::Pending,
            stress: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ElementStatus::Active
    }

    /// Global dofs of the element, x then y for each node in element order
    pub fn dof_map(&self) -> Option<[usize; 6]> {
        let mut dofs = [0; 6];
        for (local, node_id) in self.nodes.iter().enumerate() {
            dofs[DOF * local] = dof_index(*node_id, Axis::X)?;
            dofs[DOF * local + 1] = dof_index(*node_id, Axis::Y)?;
        }
        Some(dofs)
    }

    /// Von Mises equivalent of the recovered plane stress state
    pub fn von_mises(&self) -> Option<f64> {
        self.stress.map(|s| {
            f64::sqrt(s[0] * s[0] - s[0] * s[1] + s[1] * s[1] + 3.0 * s[2] * s[2])
        })
    }
}

/// Boundary segment read from the mesh, stored with ordered node ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub nodes: (usize, usize),
    pub tag: usize,
}

impl Edge {
    pub fn new(n1: usize, n2: usize, tag: usize) -> Edge {
        Edge {
            nodes: (n1.min(n2), n1.max(n2)),
            tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dof_numbering_is_one_based() {
        assert_eq!(dof_index(1, Axis::X), Some(0));
        assert_eq!(dof_index(1, Axis::Y), Some(1));
        assert_eq!(dof_index(4, Axis::X), Some(6));
        assert_eq!(dof_index(4, Axis::Y), Some(7));
        assert_eq!(dof_index(0, Axis::X), None);
    }

    #[test]
    fn element_dof_map_follows_node_order() {
        let element = Element::new(1, [3, 1, 2], MATRIX_TAG, None);
        assert_eq!(element.dof_map(), Some([4, 5, 0, 1, 2, 3]));
    }

    #[test]
    fn edge_orders_its_nodes() {
        let edge = Edge::new(9, 4, BOUNDARY_EDGE_TAG);
        assert_eq!(edge.nodes, (4, 9));
        assert_eq!(edge, Edge::new(4, 9, BOUNDARY_EDGE_TAG));
    }

    #[test]
    fn von_mises_of_uniaxial_stress_is_the_stress() {
        let mut element = Element::new(1, [1, 2, 3], MATRIX_TAG, None);
        assert_eq!(element.von_mises(), None);
        element.stress = Some(Vector3::new(250.0, 0.0, 0.0));
        assert!((element.von_mises().unwrap() - 250.0).abs() < 1e-12);
    }
}
