use std::fmt::Write;

/// Writes a structured rectangle mesh in the legacy msh layout.
///
/// The rectangle `[0, length] x [0, height]` is cut into `nx * ny` cells, each
/// split into two triangles. Cells whose centre satisfies `is_fiber` get
/// physical tag 2, the others tag 1. Outer edges are written with tag 12.
pub fn rectangle_msh(
    length: f64,
    height: f64,
    nx: usize,
    ny: usize,
    is_fiber: impl Fn(f64, f64) -> bool,
) -> String {
    let node_id = |i: usize, j: usize| j * (nx + 1) + i + 1;
    let mut out = String::new();

    writeln!(out, "$MeshFormat\n2.2 0 8\n$EndMeshFormat").unwrap();

    writeln!(out, "$Nodes\n{}", (nx + 1) * (ny + 1)).unwrap();
    for j in 0..=ny {
        for i in 0..=nx {
            let x = length * i as f64 / nx as f64;
            let y = height * j as f64 / ny as f64;
            writeln!(out, "{} {x} {y} 0", node_id(i, j)).unwrap();
        }
    }
    writeln!(out, "$EndNodes").unwrap();

    let mut elements = Vec::new();
    for i in 0..nx {
        elements.push(format!("1 2 12 1 {} {}", node_id(i, 0), node_id(i + 1, 0)));
        elements.push(format!("1 2 12 3 {} {}", node_id(i, ny), node_id(i + 1, ny)));
    }
    for j in 0..ny {
        elements.push(format!("1 2 12 4 {} {}", node_id(0, j), node_id(0, j + 1)));
        elements.push(format!("1 2 12 2 {} {}", node_id(nx, j), node_id(nx, j + 1)));
    }
    for j in 0..ny {
        for i in 0..nx {
            let cx = length * (i as f64 + 0.5) / nx as f64;
            let cy = height * (j as f64 + 0.5) / ny as f64;
            let tag = if is_fiber(cx, cy) { 2 } else { 1 };
            let (a, b) = (node_id(i, j), node_id(i + 1, j));
            let (c, d) = (node_id(i + 1, j + 1), node_id(i, j + 1));
            elements.push(format!("2 2 {tag} {tag} {a} {b} {c}"));
            elements.push(format!("2 2 {tag} {tag} {a} {c} {d}"));
        }
    }

    writeln!(out, "$Elements\n{}", elements.len()).unwrap();
    for (k, element) in elements.iter().enumerate() {
        writeln!(out, "{} {element}", k + 1).unwrap();
    }
    writeln!(out, "$EndElements").unwrap();

    out
}
