//! Polygon mesh geometry and the default volume estimator.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Object-local polygon mesh. Faces index into `vertices` and may have any
/// number of corners; they are fan-triangulated when measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<Vec<usize>>,
}

impl Mesh {
    pub fn new(vertices: Vec<Point3<f64>>, faces: Vec<Vec<usize>>) -> Self {
        Self { vertices, faces }
    }

    /// Axis-aligned box centred on the origin with outward-facing quads.
    pub fn cuboid(width: f64, depth: f64, height: f64) -> Self {
        let (x, y, z) = (width / 2.0, depth / 2.0, height / 2.0);
        let vertices = vec![
            Point3::new(-x, -y, -z),
            Point3::new(x, -y, -z),
            Point3::new(x, y, -z),
            Point3::new(-x, y, -z),
            Point3::new(-x, -y, z),
            Point3::new(x, -y, z),
            Point3::new(x, y, z),
            Point3::new(-x, y, z),
        ];
        let faces = vec![
            vec![0, 3, 2, 1],
            vec![4, 5, 6, 7],
            vec![0, 1, 5, 4],
            vec![1, 2, 6, 5],
            vec![2, 3, 7, 6],
            vec![3, 0, 4, 7],
        ];
        Self { vertices, faces }
    }

    pub fn cube(size: f64) -> Self {
        Self::cuboid(size, size, size)
    }

    /// First face index that points outside `vertices`, if any.
    pub fn invalid_face(&self) -> Option<usize> {
        self.faces
            .iter()
            .position(|face| face.iter().any(|&i| i >= self.vertices.len()))
    }

    /// Enclosed volume via the divergence theorem: the sum of signed
    /// tetrahedra spanned by the origin and each fan triangle.
    ///
    /// Assumes a closed surface with consistent winding. Open or
    /// inconsistently wound meshes still return a finite, non-negative
    /// number, it just isn't meaningful.
    pub fn volume(&self) -> f64 {
        let mut volume = 0.0;
        for face in &self.faces {
            if face.len() < 3 {
                continue;
            }
            let Some(v0) = self.vertices.get(face[0]) else {
                continue;
            };
            for pair in face[1..].windows(2) {
                let (Some(v1), Some(v2)) = (self.vertices.get(pair[0]), self.vertices.get(pair[1]))
                else {
                    continue;
                };
                volume += v0.coords.dot(&v1.coords.cross(&v2.coords)) / 6.0;
            }
        }
        volume.abs()
    }
}
