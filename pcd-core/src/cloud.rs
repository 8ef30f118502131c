//! Loaded point clouds and the renderable contract they satisfy.

use glam::{Mat4, UVec2};

use crate::types::{DataEncoding, PcdHeader, PointTable, Viewpoint};

/// How a renderer should rasterize a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One pixel per vertex
    Points,
    /// Screen-space splats sized per vertex
    Splats,
    /// Indexed triangles
    Mesh,
}

/// Data a rendering subsystem pulls from a loaded geometry.
pub trait Renderable {
    /// Embedded texture image, if the geometry carries one.
    fn texture(&self) -> Option<&[u8]>;

    /// Texture dimensions in pixels.
    fn texture_size(&self) -> UVec2;

    fn render_mode(&self) -> RenderMode;

    /// Whether lighting should be applied.
    fn shaded(&self) -> bool;

    /// Per-vertex attribute table.
    fn data_matrix(&self) -> &PointTable;

    /// Vertex indices into [`Renderable::data_matrix`].
    fn vertex_indices(&self) -> &[u32];
}

/// A fully decoded PCD point cloud.
///
/// Instances only exist after a successful load, so the table always holds
/// `width * height` points and `indices[i] == i`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    header: PcdHeader,
    width: u32,
    height: u32,
    table: PointTable,
    indices: Vec<u32>,
}

impl PointCloud {
    pub(crate) fn new(header: PcdHeader, width: u32, height: u32, table: PointTable) -> Self {
        let indices = (0..table.rows() as u32).collect();
        Self {
            header,
            width,
            height,
            table,
            indices,
        }
    }

    /// Header metadata as declared in the file.
    pub fn header(&self) -> &PcdHeader {
        &self.header
    }

    /// Grid width after defaults were applied.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height after defaults were applied.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.table.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn encoding(&self) -> DataEncoding {
        self.header.encoding
    }

    pub fn viewpoint(&self) -> &Viewpoint {
        &self.header.viewpoint
    }

    /// Sensor pose as a rigid transform. Not applied to the stored points.
    pub fn transform(&self) -> Mat4 {
        self.header.viewpoint.transform()
    }

    pub fn table(&self) -> &PointTable {
        &self.table
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

impl Renderable for PointCloud {
    fn texture(&self) -> Option<&[u8]> {
        None
    }

    fn texture_size(&self) -> UVec2 {
        UVec2::ZERO
    }

    fn render_mode(&self) -> RenderMode {
        RenderMode::Splats
    }

    fn shaded(&self) -> bool {
        true
    }

    fn data_matrix(&self) -> &PointTable {
        &self.table
    }

    fn vertex_indices(&self) -> &[u32] {
        &self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderable_defaults() {
        let mut table = PointTable::with_capacity(3);
        for i in 0..3 {
            table.push_row([i as f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        }
        let cloud = PointCloud::new(PcdHeader::default(), 3, 1, table);

        assert!(cloud.texture().is_none());
        assert_eq!(cloud.texture_size(), UVec2::ZERO);
        assert_eq!(cloud.render_mode(), RenderMode::Splats);
        assert!(cloud.shaded());
        assert_eq!(cloud.vertex_indices(), &[0, 1, 2]);
        assert_eq!(cloud.data_matrix().rows(), 3);
        assert_eq!(cloud.transform(), Mat4::IDENTITY);
    }
}
