//! Reader for Gmsh `.msh` text files.
//!
//! Produces plain node, triangle and edge records; [`MeshRecords::into_mesh`]
//! attaches materials through a physical tag map and builds the [`Mesh`].
//! Both the legacy count layout and the block layout of the `$Nodes` and
//! `$Elements` sections are understood. In the block layout the entity tag of
//! an element block is used as its physical tag.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    str::FromStr,
};

use crate::{
    datatypes::{
        Edge, Element, Node, BOUNDARY_EDGE_TAG, FIBER_TAG, INTERFACE_EDGE_TAG, MATRIX_TAG,
    },
    error::{FemError, Result},
    material::TagMaterials,
    mesh::Mesh,
};

const GMSH_LINE: usize = 1;
const GMSH_TRIANGLE: usize = 2;

enum MeshParseState {
    Nodes,
    Elements,
    Skipped,
    Limbo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleRecord {
    pub nodes: [usize; 3],
    pub tag: usize,
}

/// Raw content of a mesh file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshRecords {
    pub nodes: Vec<Node>,
    pub triangles: Vec<TriangleRecord>,
    pub edges: Vec<Edge>,
    /// Elements of other types (points, quads, ...) that were ignored
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshStatistics {
    pub nodes: usize,
    pub matrix_triangles: usize,
    pub fiber_triangles: usize,
    pub triangles: usize,
    pub interface_edges: usize,
    pub boundary_edges: usize,
    pub edges: usize,
    pub skipped: usize,
    /// Physical tags of triangles without a registered material
    pub unassigned_tags: BTreeSet<usize>,
}

impl MeshStatistics {
    pub fn print(&self) {
        println!("info: loaded {} nodes", self.nodes);
        println!("info: triangles");
        println!("  - matrix (tag {MATRIX_TAG}): {}", self.matrix_triangles);
        println!("  - fiber (tag {FIBER_TAG}): {}", self.fiber_triangles);
        println!("  - total: {}", self.triangles);
        println!("info: edges");
        println!("  - fiber-matrix (tag {INTERFACE_EDGE_TAG}): {}", self.interface_edges);
        println!("  - boundary (tag {BOUNDARY_EDGE_TAG}): {}", self.boundary_edges);
        println!("  - total: {}", self.edges);
        if self.skipped > 0 {
            println!("info: skipped {} elements of other types", self.skipped);
        }
    }
}

struct LineCursor<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    line_no: usize,
}

impl<'a> LineCursor<'a> {
    fn new(contents: &'a str) -> LineCursor<'a> {
        LineCursor {
            lines: contents.lines().enumerate(),
            line_no: 0,
        }
    }

    /// Next non-blank line, trimmed
    fn next_line(&mut self) -> Option<&'a str> {
        for (i, line) in self.lines.by_ref() {
            self.line_no = i + 1;
            let line = line.trim();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    fn expect_line(&mut self, what: &str) -> Result<&'a str> {
        match self.next_line() {
            Some(line) => Ok(line),
            None => Err(FemError::parse(
                self.line_no + 1,
                format!("unexpected end of file, expected {what}"),
            )),
        }
    }

    fn expect_tokens<T: FromStr>(&mut self, what: &str) -> Result<Vec<T>> {
        let line = self.expect_line(what)?;
        parse_tokens(self.line_no, line, what)
    }

    fn expect_end(&mut self, marker: &str) -> Result<()> {
        let line = self.expect_line(marker)?;
        if line != marker {
            return Err(FemError::parse(
                self.line_no,
                format!("expected {marker}, found '{line}'"),
            ));
        }
        Ok(())
    }
}

fn parse_tokens<T: FromStr>(line_no: usize, line: &str, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|token| {
            token.parse().map_err(|_| {
                FemError::parse(line_no, format!("invalid value '{token}' in {what}"))
            })
        })
        .collect()
}

fn require_len<T>(values: &[T], len: usize, line_no: usize, what: &str) -> Result<()> {
    if values.len() < len {
        return Err(FemError::parse(
            line_no,
            format!("{what} needs {len} values, found {}", values.len()),
        ));
    }
    Ok(())
}

fn read_node_coords(cursor: &mut LineCursor, id: usize) -> Result<Node> {
    let coords: Vec<f64> = cursor.expect_tokens("node coordinates")?;
    require_len(&coords, 2, cursor.line_no, "node coordinates")?;
    Ok(Node::new(id, coords[0], coords[1]))
}

fn read_nodes(cursor: &mut LineCursor, records: &mut MeshRecords) -> Result<()> {
    let header: Vec<usize> = cursor.expect_tokens("$Nodes header")?;

    match header.len() {
        // legacy: count, then `id x y z`
        1 => {
            for _ in 0..header[0] {
                let line = cursor.expect_line("node")?;
                let (id, coords) = line
                    .split_once(char::is_whitespace)
                    .unwrap_or((line, ""));
                let id: Vec<usize> = parse_tokens(cursor.line_no, id, "node id")?;
                let coords: Vec<f64> = parse_tokens(cursor.line_no, coords, "node")?;
                require_len(&coords, 2, cursor.line_no, "node coordinates")?;
                records.nodes.push(Node::new(id[0], coords[0], coords[1]));
            }
        }
        // block: numEntityBlocks numNodes minTag maxTag
        4 => {
            for _ in 0..header[0] {
                let block: Vec<usize> = cursor.expect_tokens("node block header")?;
                require_len(&block, 4, cursor.line_no, "node block header")?;
                let count = block[3];

                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    let tag: Vec<usize> = cursor.expect_tokens("node tag")?;
                    require_len(&tag, 1, cursor.line_no, "node tag")?;
                    ids.push(tag[0]);
                }
                for id in ids {
                    records.nodes.push(read_node_coords(cursor, id)?);
                }
            }
        }
        n => {
            return Err(FemError::parse(
                cursor.line_no,
                format!("$Nodes header has {n} values, expected 1 or 4"),
            ))
        }
    }

    cursor.expect_end("$EndNodes")
}

fn push_element(
    records: &mut MeshRecords,
    element_type: usize,
    tag: usize,
    node_ids: &[usize],
    line_no: usize,
) -> Result<()> {
    match element_type {
        GMSH_TRIANGLE => {
            require_len(node_ids, 3, line_no, "triangle")?;
            records.triangles.push(TriangleRecord {
                nodes: [node_ids[0], node_ids[1], node_ids[2]],
                tag,
            });
        }
        GMSH_LINE => {
            require_len(node_ids, 2, line_no, "line element")?;
            records.edges.push(Edge::new(node_ids[0], node_ids[1], tag));
        }
        _ => records.skipped += 1,
    }
    Ok(())
}

fn read_elements(cursor: &mut LineCursor, records: &mut MeshRecords) -> Result<()> {
    let header: Vec<usize> = cursor.expect_tokens("$Elements header")?;

    match header.len() {
        // legacy: count, then `id type numTags tag... nodeIds...`
        1 => {
            for _ in 0..header[0] {
                let values: Vec<usize> = cursor.expect_tokens("element")?;
                require_len(&values, 3, cursor.line_no, "element")?;
                let element_type = values[1];
                let num_tags = values[2];
                require_len(&values, 3 + num_tags, cursor.line_no, "element tags")?;

                let tag = if num_tags > 0 { values[3] } else { 0 };
                push_element(
                    records,
                    element_type,
                    tag,
                    &values[3 + num_tags..],
                    cursor.line_no,
                )?;
            }
        }
        // block: numEntityBlocks numElements minTag maxTag
        4 => {
            for _ in 0..header[0] {
                let block: Vec<usize> = cursor.expect_tokens("element block header")?;
                require_len(&block, 4, cursor.line_no, "element block header")?;
                let (entity_tag, element_type, count) = (block[1], block[2], block[3]);

                for _ in 0..count {
                    let values: Vec<usize> = cursor.expect_tokens("element")?;
                    require_len(&values, 1, cursor.line_no, "element")?;
                    push_element(
                        records,
                        element_type,
                        entity_tag,
                        &values[1..],
                        cursor.line_no,
                    )?;
                }
            }
        }
        n => {
            return Err(FemError::parse(
                cursor.line_no,
                format!("$Elements header has {n} values, expected 1 or 4"),
            ))
        }
    }

    cursor.expect_end("$EndElements")
}

/// Parses the contents of a .msh file into records
///
/// # Arguments
/// * `contents` - The full text of the mesh file
///
/// # Returns
/// The nodes, triangles and edges found in the file
pub fn parse_gmsh(contents: &str) -> Result<MeshRecords> {
    let mut records = MeshRecords::default();
    let mut cursor = LineCursor::new(contents);
    let mut parser_state = MeshParseState::Limbo;

    while let Some(line) = cursor.next_line() {
        match parser_state {
            MeshParseState::Limbo => {
                if line == "$Nodes" {
                    parser_state = MeshParseState::Nodes;
                } else if line == "$Elements" {
                    parser_state = MeshParseState::Elements;
                } else if line.starts_with('$') && !line.starts_with("$End") {
                    parser_state = MeshParseState::Skipped;
                } else {
                    return Err(FemError::parse(
                        cursor.line_no,
                        format!("unexpected content outside of a section: '{line}'"),
                    ));
                }
            }
            MeshParseState::Skipped => {
                if line.starts_with("$End") {
                    parser_state = MeshParseState::Limbo;
                }
                continue;
            }
            _ => {}
        }

        match parser_state {
            MeshParseState::Nodes => {
                read_nodes(&mut cursor, &mut records)?;
                parser_state = MeshParseState::Limbo;
            }
            MeshParseState::Elements => {
                read_elements(&mut cursor, &mut records)?;
                parser_state = MeshParseState::Limbo;
            }
            _ => {}
        }
    }

    if let MeshParseState::Skipped = parser_state {
        return Err(FemError::parse(
            cursor.line_no,
            "unterminated section at end of file",
        ));
    }

    Ok(records)
}

impl MeshRecords {
    /// Builds a mesh, attaching materials by physical tag.
    ///
    /// Triangles are numbered from 1 in file order. A triangle whose tag has
    /// no material is kept with `material = None` and reported. Such triangles
    /// add no stiffness: the solve still succeeds when their nodes are shared
    /// with assigned triangles, and only fails at factorization when a node
    /// touches no assigned triangle at all.
    pub fn into_mesh(self, tag_materials: &TagMaterials) -> Result<(Mesh, MeshStatistics)> {
        let mut mesh = Mesh::new();
        let mut statistics = MeshStatistics {
            nodes: self.nodes.len(),
            skipped: self.skipped,
            ..MeshStatistics::default()
        };

        for node in self.nodes {
            mesh.add_node(node)?;
        }
        mesh.validate_numbering()?;

        let mut unassigned: BTreeMap<usize, usize> = BTreeMap::new();
        for (i, triangle) in self.triangles.into_iter().enumerate() {
            let material = tag_materials.get(&triangle.tag).copied();
            if material.is_none() {
                *unassigned.entry(triangle.tag).or_insert(0) += 1;
            }
            match triangle.tag {
                MATRIX_TAG => statistics.matrix_triangles += 1,
                FIBER_TAG => statistics.fiber_triangles += 1,
                _ => {}
            }
            mesh.add_element(Element::new(i + 1, triangle.nodes, triangle.tag, material))?;
        }
        statistics.triangles = mesh.element_count();

        for (tag, count) in &unassigned {
            println!(
                "warning [mesh]: no material registered for physical tag {tag}, {count} elements are treated as void"
            );
        }
        statistics.unassigned_tags = unassigned.into_keys().collect();

        for edge in self.edges {
            mesh.add_edge(edge);
        }
        statistics.interface_edges = mesh.edges_by_tag(INTERFACE_EDGE_TAG).len();
        statistics.boundary_edges = mesh.edges_by_tag(BOUNDARY_EDGE_TAG).len();
        statistics.edges = mesh.edges().count();

        Ok((mesh, statistics))
    }
}

/// Reads a .msh file into a mesh
///
/// # Arguments
/// * `mesh_file` - The path to the mesh file
/// * `tag_materials` - Material of each physical tag
///
/// # Returns
/// The mesh and its load statistics
pub fn read_gmsh_file(
    mesh_file: impl AsRef<Path>,
    tag_materials: &TagMaterials,
) -> Result<(Mesh, MeshStatistics)> {
    let mesh_file = mesh_file.as_ref();
    let contents =
        std::fs::read_to_string(mesh_file).map_err(|err| FemError::io(mesh_file, err))?;

    let (mesh, statistics) = parse_gmsh(&contents)?.into_mesh(tag_materials)?;
    statistics.print();

    Ok((mesh, statistics))
}
