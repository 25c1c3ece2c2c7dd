//! Plain data carried across the engine boundary

use serde::{Deserialize, Serialize};

/// A point in 3D space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Point3 {
    /// Create a point from coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The origin.
    pub const fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Row-major 4x4 affine transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Matrix rows
    pub m: [[f64; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity transform.
    pub const fn identity() -> Self {
        Self {
            m: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Translation by `(dx, dy, dz)`.
    pub const fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            m: [
                [1.0, 0.0, 0.0, dx],
                [0.0, 1.0, 0.0, dy],
                [0.0, 0.0, 1.0, dz],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Uniform scale about the origin.
    pub const fn scale(factor: f64) -> Self {
        Self {
            m: [
                [factor, 0.0, 0.0, 0.0],
                [0.0, factor, 0.0, 0.0],
                [0.0, 0.0, factor, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Whether this is exactly the identity.
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// `self * other`: applying the result equals applying `other`, then `self`.
    pub fn multiply(&self, other: &Transform) -> Transform {
        let mut m = [[0.0; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
        }
        Transform { m }
    }

    /// Apply to a point (homogeneous divide included).
    pub fn apply(&self, p: Point3) -> Point3 {
        let m = &self.m;
        let x = m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3];
        let y = m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3];
        let z = m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3];
        let w = m[3][0] * p.x + m[3][1] * p.y + m[3][2] * p.z + m[3][3];
        if w != 0.0 && w != 1.0 {
            Point3::new(x / w, y / w, z / w)
        } else {
            Point3::new(x, y, z)
        }
    }
}

/// Concrete curve representation behind a curve handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurveKind {
    /// Two-point line
    Line,
    /// Polyline through its points
    Polyline,
    /// Circular arc given by start, mid and end points
    Arc,
    /// NURBS curve given by its control points
    Nurbs,
}

/// Geometry payload as seen from outside the engine.
///
/// A composite curve nests its segments. Engines store those segments as
/// handles owned by the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometryData {
    /// Single point
    Point(Point3),

    /// Simple curve
    Curve {
        /// Representation
        kind: CurveKind,
        /// Defining points (control points for NURBS)
        points: Vec<Point3>,
    },

    /// Composite curve made of segments
    PolyCurve(Vec<GeometryData>),

    /// Triangle mesh
    Mesh {
        /// Vertex positions
        vertices: Vec<Point3>,
        /// Vertex indices per face
        faces: Vec<[u32; 3]>,
    },

    /// Payload of a type this crate does not model
    Opaque {
        /// Native type code
        type_code: u32,
        /// Raw bytes
        bytes: Vec<u8>,
    },
}

impl GeometryData {
    /// Line between two points.
    pub fn line(from: Point3, to: Point3) -> Self {
        GeometryData::Curve {
            kind: CurveKind::Line,
            points: vec![from, to],
        }
    }

    /// Polyline through `points`.
    pub fn polyline(points: Vec<Point3>) -> Self {
        GeometryData::Curve {
            kind: CurveKind::Polyline,
            points,
        }
    }

    /// NURBS curve with the given control points.
    pub fn nurbs(points: Vec<Point3>) -> Self {
        GeometryData::Curve {
            kind: CurveKind::Nurbs,
            points,
        }
    }

    /// Mesh from vertices and faces.
    pub fn mesh(vertices: Vec<Point3>, faces: Vec<[u32; 3]>) -> Self {
        GeometryData::Mesh { vertices, faces }
    }
}
