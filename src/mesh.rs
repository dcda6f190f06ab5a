use std::collections::{BTreeMap, HashMap};

use indicatif::ProgressBar;

use crate::{
    datatypes::{Edge, Element, ElementStatus, Node, Vertex},
    error::{FemError, Result},
    material::MaterialLibrary,
};

/// Relative tolerance for boundary node queries
const GEOMETRY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn mid_height(&self) -> f64 {
        0.5 * (self.y_min + self.y_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Bottom,
    Top,
}

/// Outcome of computing every element stiffness
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementReport {
    pub active: usize,
    pub degenerate: Vec<usize>,
    pub missing_material: Vec<usize>,
    pub total_area: f64,
}

/// Nodes, triangles and tagged edges of a 2D model.
///
/// Filled once while loading, then read-mostly. Node ids are external and
/// 1-based; element ids are assigned sequentially from 1.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    nodes: Vec<Node>,
    elements: Vec<Element>,
    edges: BTreeMap<(usize, usize), usize>,
    node_index: HashMap<usize, usize>,
    element_index: HashMap<usize, usize>,
}

impl Mesh {
    pub fn new() -> Mesh {
        Mesh::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.node_index.contains_key(&node.id) {
            return Err(FemError::Mesh(format!("Duplicate node id {}", node.id)));
        }
        self.node_index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_element(&mut self, element: Element) -> Result<()> {
        if self.element_index.contains_key(&element.id) {
            return Err(FemError::Mesh(format!(
                "Duplicate element id {}",
                element.id
            )));
        }
        self.element_index.insert(element.id, self.elements.len());
        self.elements.push(element);
        Ok(())
    }

    /// Registers a tagged edge. The first tag seen for a node pair is kept.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.entry(edge.nodes).or_insert(edge.tag);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn node(&self, id: usize) -> Result<&Node> {
        self.node_index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or(FemError::NodeNotFound(id))
    }

    pub fn element(&self, id: usize) -> Result<&Element> {
        self.element_index
            .get(&id)
            .map(|&i| &self.elements[i])
            .ok_or(FemError::ElementNotFound(id))
    }

    pub fn element_mut(&mut self, id: usize) -> Result<&mut Element> {
        match self.element_index.get(&id) {
            Some(&i) => Ok(&mut self.elements[i]),
            None => Err(FemError::ElementNotFound(id)),
        }
    }

    /// The three nodes of an element, in element order
    pub fn element_nodes(&self, element: &Element) -> Result<[&Node; 3]> {
        Ok([
            self.node(element.nodes[0])?,
            self.node(element.nodes[1])?,
            self.node(element.nodes[2])?,
        ])
    }

    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges
            .iter()
            .map(|(&(n1, n2), &tag)| Edge::new(n1, n2, tag))
    }

    pub fn edges_by_tag(&self, tag: usize) -> Vec<Edge> {
        self.edges().filter(|e| e.tag == tag).collect()
    }

    /// Checks that node ids are exactly 1..=N, as the dof numbering requires
    pub fn validate_numbering(&self) -> Result<()> {
        let n = self.nodes.len();
        for node in &self.nodes {
            if node.id == 0 || node.id > n {
                return Err(FemError::Mesh(format!(
                    "Node id {} outside 1..={n}; node ids must be contiguous",
                    node.id
                )));
            }
        }
        Ok(())
    }

    /// Computes area and stiffness of every element
    ///
    /// # Arguments
    /// * `materials` - The library the element material ids point into
    /// * `bar` - Progress bar advanced once per element
    ///
    /// # Returns
    /// Counts of active elements and the ids of flagged ones
    pub fn initialize_elements_with_progress(
        &mut self,
        materials: &MaterialLibrary,
        bar: &ProgressBar,
    ) -> Result<ElementReport> {
        let mut report = ElementReport::default();

        for i in 0..self.elements.len() {
            bar.inc(1);

            let element = &self.elements[i];
            let [n1, n2, n3] = self.element_nodes(element)?;
            let (n1, n2, n3) = (n1.clone(), n2.clone(), n3.clone());

            let material = match element.material {
                Some(id) => Some(materials.get(id).ok_or_else(|| {
                    FemError::Mesh(format!(
                        "Element {} refers to unknown material {}",
                        element.id, id.0
                    ))
                })?),
                None => None,
            };

            let element = &mut self.elements[i];
            element.compute_area(&n1, &n2, &n3);
            element.compute_ke(&n1, &n2, &n3, material);

            match element.status {
                ElementStatus::Active => {
                    report.active += 1;
                    report.total_area += element.area;
                }
                ElementStatus::Degenerate => {
                    println!(
                        "warning [mesh]: element {} is degenerate (area {:e}), it contributes no stiffness",
                        element.id, element.area
                    );
                    report.degenerate.push(element.id);
                }
                ElementStatus::MissingMaterial => {
                    println!(
                        "warning [mesh]: element {} has no material for tag {}, it is treated as void",
                        element.id, element.physical_tag
                    );
                    report.missing_material.push(element.id);
                }
                ElementStatus::Pending => {}
            }
        }
        bar.finish_and_clear();

        println!(
            "info: computed {} element stiffness matrices (total area {:.6e})",
            report.active, report.total_area
        );

        Ok(report)
    }

    pub fn initialize_elements(&mut self, materials: &MaterialLibrary) -> Result<ElementReport> {
        self.initialize_elements_with_progress(materials, &ProgressBar::hidden())
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.nodes.first()?;
        let mut bbox = BoundingBox {
            x_min: first.vertex.x,
            x_max: first.vertex.x,
            y_min: first.vertex.y,
            y_max: first.vertex.y,
        };
        for node in &self.nodes[1..] {
            bbox.x_min = bbox.x_min.min(node.vertex.x);
            bbox.x_max = bbox.x_max.max(node.vertex.x);
            bbox.y_min = bbox.y_min.min(node.vertex.y);
            bbox.y_max = bbox.y_max.max(node.vertex.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.bounding_box().map(|b| b.width()).unwrap_or(0.0)
    }

    pub fn height(&self) -> f64 {
        self.bounding_box().map(|b| b.height()).unwrap_or(0.0)
    }

    fn tolerance(&self, bbox: &BoundingBox) -> f64 {
        GEOMETRY_TOLERANCE * bbox.width().max(bbox.height()).max(f64::MIN_POSITIVE)
    }

    /// Ids of the nodes lying on one side of the bounding box
    pub fn boundary_nodes(&self, side: Side) -> Vec<usize> {
        let bbox = match self.bounding_box() {
            Some(b) => b,
            None => return Vec::new(),
        };
        let tol = self.tolerance(&bbox);

        self.nodes
            .iter()
            .filter(|n| match side {
                Side::Left => (n.vertex.x - bbox.x_min).abs() < tol,
                Side::Right => (n.vertex.x - bbox.x_max).abs() < tol,
                Side::Bottom => (n.vertex.y - bbox.y_min).abs() < tol,
                Side::Top => (n.vertex.y - bbox.y_max).abs() < tol,
            })
            .map(|n| n.id)
            .collect()
    }

    /// Ids of the nodes whose y coordinate matches `y`
    pub fn nodes_at_y(&self, y: f64) -> Vec<usize> {
        let tol = match self.bounding_box() {
            Some(b) => self.tolerance(&b),
            None => return Vec::new(),
        };
        self.nodes
            .iter()
            .filter(|n| (n.vertex.y - y).abs() < tol)
            .map(|n| n.id)
            .collect()
    }

    /// Id of the node among `candidates` closest to `target`
    pub fn nearest_node(&self, candidates: &[usize], target: &Vertex) -> Option<usize> {
        candidates
            .iter()
            .filter_map(|id| self.node(*id).ok())
            .min_by(|a, b| {
                a.vertex
                    .distance(target)
                    .total_cmp(&b.vertex.distance(target))
            })
            .map(|n| n.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{BOUNDARY_EDGE_TAG, INTERFACE_EDGE_TAG, MATRIX_TAG};
    use crate::material::{Material, MaterialId};

    fn unit_square() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.add_node(Node::new(1, 0.0, 0.0)).unwrap();
        mesh.add_node(Node::new(2, 1.0, 0.0)).unwrap();
        mesh.add_node(Node::new(3, 1.0, 1.0)).unwrap();
        mesh.add_node(Node::new(4, 0.0, 1.0)).unwrap();
        mesh.add_element(Element::new(1, [1, 2, 3], MATRIX_TAG, Some(MaterialId(0))))
            .unwrap();
        mesh.add_element(Element::new(2, [1, 3, 4], MATRIX_TAG, Some(MaterialId(0))))
            .unwrap();
        mesh
    }

    fn library() -> MaterialLibrary {
        let mut library = MaterialLibrary::new();
        library.add(Material::isotropic("steel", 200e9, 0.3, 7850.0));
        library
    }

    #[test]
    fn missing_node_is_a_reference_error() {
        let mesh = unit_square();
        assert!(mesh.node(4).is_ok());
        assert!(matches!(mesh.node(5), Err(FemError::NodeNotFound(5))));
        assert!(matches!(mesh.element(3), Err(FemError::ElementNotFound(3))));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut mesh = unit_square();
        assert!(mesh.add_node(Node::new(2, 5.0, 5.0)).is_err());
        assert!(mesh
            .add_element(Element::new(1, [2, 3, 4], MATRIX_TAG, None))
            .is_err());
    }

    #[test]
    fn initialize_computes_every_element() {
        let mut mesh = unit_square();
        let report = mesh.initialize_elements(&library()).unwrap();

        assert_eq!(report.active, 2);
        assert!(report.degenerate.is_empty());
        assert!((report.total_area - 1.0).abs() < 1e-14);
        assert!(mesh.elements().iter().all(|e| e.is_active()));
    }

    #[test]
    fn initialize_fails_loudly_on_unknown_node() {
        let mut mesh = unit_square();
        mesh.add_element(Element::new(3, [2, 3, 9], MATRIX_TAG, Some(MaterialId(0))))
            .unwrap();
        let result = mesh.initialize_elements(&library());
        assert!(matches!(result, Err(FemError::NodeNotFound(9))));
    }

    #[test]
    fn initialize_flags_missing_material_and_degenerate_elements() {
        let mut mesh = unit_square();
        mesh.add_node(Node::new(5, 2.0, 2.0)).unwrap();
        mesh.add_element(Element::new(3, [1, 3, 5], MATRIX_TAG, Some(MaterialId(0))))
            .unwrap();
        mesh.add_element(Element::new(4, [2, 3, 4], 5, None)).unwrap();

        let report = mesh.initialize_elements(&library()).unwrap();
        assert_eq!(report.active, 2);
        assert_eq!(report.degenerate, vec![3]);
        assert_eq!(report.missing_material, vec![4]);
        assert_eq!(
            mesh.element(4).unwrap().status,
            ElementStatus::MissingMaterial
        );
    }

    #[test]
    fn numbering_must_be_contiguous() {
        let mut mesh = unit_square();
        assert!(mesh.validate_numbering().is_ok());
        mesh.add_node(Node::new(7, 3.0, 3.0)).unwrap();
        assert!(matches!(mesh.validate_numbering(), Err(FemError::Mesh(_))));
    }

    #[test]
    fn boundary_queries() {
        let mesh = unit_square();
        let bbox = mesh.bounding_box().unwrap();
        assert_eq!(bbox.width(), 1.0);
        assert_eq!(bbox.mid_height(), 0.5);

        let mut left = mesh.boundary_nodes(Side::Left);
        left.sort();
        assert_eq!(left, vec![1, 4]);
        let mut top = mesh.boundary_nodes(Side::Top);
        top.sort();
        assert_eq!(top, vec![3, 4]);
        assert_eq!(mesh.nodes_at_y(0.0).len(), 2);
        assert!(mesh.nodes_at_y(0.5).is_empty());
        assert_eq!(
            mesh.nearest_node(&[2, 3], &Vertex::new(1.0, 0.9)),
            Some(3)
        );
    }

    #[test]
    fn edges_keep_first_tag() {
        let mut mesh = unit_square();
        mesh.add_edge(Edge::new(1, 2, BOUNDARY_EDGE_TAG));
        mesh.add_edge(Edge::new(2, 1, INTERFACE_EDGE_TAG));
        mesh.add_edge(Edge::new(3, 1, INTERFACE_EDGE_TAG));

        assert_eq!(mesh.edges().count(), 2);
        assert_eq!(
            mesh.edges_by_tag(BOUNDARY_EDGE_TAG),
            vec![Edge::new(1, 2, BOUNDARY_EDGE_TAG)]
        );
        assert_eq!(mesh.edges_by_tag(INTERFACE_EDGE_TAG).len(), 1);
    }
}
