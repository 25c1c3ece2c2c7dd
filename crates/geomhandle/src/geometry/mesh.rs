use super::{geometry_variant, GeometryBase};
use crate::error::Result;
use crate::native::Point3;

/// Triangle mesh.
#[derive(Debug)]
pub struct Mesh {
    base: GeometryBase,
}

geometry_variant!(Mesh, Mesh);

impl Mesh {
    /// Number of vertices.
    pub fn vertex_count(&self) -> Result<usize> {
        let handle = self.resolve_read()?;
        self.context().engine().mesh_vertex_count(handle)
    }

    /// Append vertices, then re-report the grown size.
    pub fn append_vertices(&self, vertices: &[Point3]) -> Result<()> {
        self.object()
            .mutate(|engine, handle| engine.mesh_append_vertices(handle, vertices))?;
        self.report_memory_pressure()
    }
}
