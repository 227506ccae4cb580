use bytemuck::{Pod, Zeroable};

use crate::compile::{UniformBindings, UniformName};
use crate::types::UniformValues;

/// Host copy of the `FragreelParams` std140 block. Offsets must match
/// `UniformName::block_offset`.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ShaderParams {
    pub i_resolution: [f32; 3],
    pub i_time: f32,
    pub i_center: [f32; 2],
    pub i_zoom: f32,
    pub i_padding0: f32,
}

unsafe impl Zeroable for ShaderParams {}
unsafe impl Pod for ShaderParams {}

impl ShaderParams {
    /// Packs the values the program consumes; the rest stay zero.
    ///
    /// The resolution is always written: the injected entry point flips
    /// `gl_FragCoord` with it even when the shader never names `iResolution`.
    pub fn resolve(bindings: &UniformBindings, values: &UniformValues) -> Self {
        let mut params = Self {
            i_resolution: [values.resolution[0], values.resolution[1], 1.0],
            ..Self::zeroed()
        };
        for name in bindings.names() {
            match name {
                UniformName::Time => params.i_time = values.time,
                UniformName::Resolution => {}
                UniformName::Zoom => params.i_zoom = values.zoom,
                UniformName::Center => params.i_center = values.center,
            }
        }
        params
    }
}

/// Uniform buffer plus its bind group, shared by every program of a context.
#[derive(Debug, Clone)]
pub(crate) struct UniformBlock {
    pub layout: wgpu::BindGroupLayout,
    pub bind_group: wgpu::BindGroup,
    buffer: wgpu::Buffer,
}

impl UniformBlock {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform buffer"),
            size: std::mem::size_of::<ShaderParams>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self {
            layout,
            bind_group,
            buffer,
        }
    }

    pub fn write(&self, queue: &wgpu::Queue, params: &ShaderParams) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(params));
    }
}
