use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

const fn vertex(x: f32, y: f32, u: f32, v: f32) -> QuadVertex {
    QuadVertex {
        position: [x, y, 0.0],
        tex_coord: [u, v],
    }
}

/// Two triangles covering clip space. UV (0, 0) is the bottom-left corner.
pub(crate) const QUAD_VERTICES: [QuadVertex; 6] = [
    vertex(-1.0, 1.0, 0.0, 1.0),
    vertex(-1.0, -1.0, 0.0, 0.0),
    vertex(1.0, -1.0, 1.0, 0.0),
    vertex(-1.0, 1.0, 0.0, 1.0),
    vertex(1.0, -1.0, 1.0, 0.0),
    vertex(1.0, 1.0, 1.0, 1.0),
];

const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

/// Vertex buffer created once per context and shared by every draw.
#[derive(Debug, Clone)]
pub(crate) struct QuadMesh {
    buffer: wgpu::Buffer,
}

impl QuadMesh {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fullscreen quad"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self { buffer }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }

    pub fn vertex_count() -> u32 {
        QUAD_VERTICES.len() as u32
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_attributes() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 20);
        assert_eq!(ATTRIBUTES[1].offset, 12);
    }

    #[test]
    fn quad_covers_clip_space() {
        let xs: Vec<f32> = QUAD_VERTICES.iter().map(|v| v.position[0]).collect();
        let ys: Vec<f32> = QUAD_VERTICES.iter().map(|v| v.position[1]).collect();
        assert!(xs.contains(&-1.0) && xs.contains(&1.0));
        assert!(ys.contains(&-1.0) && ys.contains(&1.0));
        for v in QUAD_VERTICES {
            assert_eq!(v.tex_coord[0], (v.position[0] + 1.0) / 2.0);
            assert_eq!(v.tex_coord[1], (v.position[1] + 1.0) / 2.0);
        }
    }
}
