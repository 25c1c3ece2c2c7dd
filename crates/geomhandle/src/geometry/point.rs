use super::{geometry_variant, GeometryBase};
use crate::error::Result;
use crate::native::Point3;

/// Point object.
#[derive(Debug)]
pub struct Point {
    base: GeometryBase,
}

geometry_variant!(Point, Point);

impl Point {
    /// Current location.
    pub fn location(&self) -> Result<Point3> {
        let handle = self.resolve_read()?;
        self.context().engine().point_location(handle)
    }

    /// Move the point.
    pub fn set_location(&self, location: Point3) -> Result<()> {
        self.object()
            .mutate(|engine, handle| engine.set_point_location(handle, location))
    }
}
