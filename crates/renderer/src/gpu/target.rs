use std::path::Path;
use std::sync::mpsc;

use anyhow::{Context, Result};

use crate::error::RenderError;
use crate::offline::FrameTarget;
use crate::program::CompiledProgram;
use crate::types::{Camera, RenderTargetDescriptor, UniformValues};

use super::context::GpuContext;
use super::pipeline::{encode_quad_pass, GpuProgram};

/// Offscreen color texture plus the staging buffer used to read it back.
///
/// The texture uses the context's color format so any program the manager
/// validated can draw into it. Readback converts the padded 4-byte rows into
/// one tightly packed RGB8 frame, reusing the same host buffer every frame.
pub struct OffscreenTarget {
    descriptor: RenderTargetDescriptor,
    format: wgpu::TextureFormat,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
    pixels: Vec<u8>,
}

impl OffscreenTarget {
    pub fn new(gpu: &GpuContext, descriptor: RenderTargetDescriptor) -> Result<Self, RenderError> {
        let RenderTargetDescriptor { width, height, .. } = descriptor;
        if width == 0 || height == 0 {
            return Err(RenderError::TargetCreationFailed(format!(
                "render target must be non-empty, got {width}x{height}"
            )));
        }
        let max_dimension = gpu.max_texture_dimension();
        if width > max_dimension || height > max_dimension {
            return Err(RenderError::TargetCreationFailed(format!(
                "GPU max texture dimension is {max_dimension}, requested target is {width}x{height}"
            )));
        }
        if channel_order(gpu.color_format).is_none() {
            return Err(RenderError::TargetCreationFailed(format!(
                "color format {:?} cannot be read back as RGB8",
                gpu.color_format
            )));
        }

        let padded_bytes_per_row = align_to(width * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: gpu.color_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(gpu.device.pop_error_scope());
        let out_of_memory = pollster::block_on(gpu.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(RenderError::TargetCreationFailed(err.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        tracing::debug!(width, height, format = ?gpu.color_format, "created offscreen target");

        Ok(Self {
            descriptor,
            format: gpu.color_format,
            texture,
            view,
            readback,
            padded_bytes_per_row,
            pixels: Vec::with_capacity(descriptor.frame_byte_size()),
        })
    }

    pub fn descriptor(&self) -> RenderTargetDescriptor {
        self.descriptor
    }

    /// Runs one draw of `program` and waits for the GPU to finish it.
    pub fn draw(
        &mut self,
        gpu: &GpuContext,
        program: &CompiledProgram<GpuProgram>,
        values: &UniformValues,
    ) -> Result<(), RenderError> {
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        gpu.write_uniforms(program.uniform_bindings(), values);
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen encoder"),
            });
        encode_quad_pass(
            &mut encoder,
            &self.view,
            &program.handle().pipeline,
            &gpu.uniforms,
            &gpu.quad,
        );
        gpu.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(RenderError::Draw(err.to_string()));
        }
        gpu.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Draw(format!("wgpu poll failed: {err}")))?;
        Ok(())
    }

    /// Copies the last drawn frame into host memory as RGB8, top row first.
    ///
    /// The returned slice stays valid until the next call.
    pub fn read_pixels(&mut self, gpu: &GpuContext) -> Result<&[u8], RenderError> {
        let RenderTargetDescriptor { width, height, .. } = self.descriptor;
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Readback(format!("wgpu poll failed: {err}")))?;
        rx.recv()
            .map_err(|_| RenderError::Readback("readback channel closed".into()))?
            .map_err(|err| RenderError::Readback(format!("buffer map failed: {err}")))?;

        let order = channel_order(self.format).ok_or_else(|| {
            RenderError::Readback(format!("unsupported color format {:?}", self.format))
        })?;
        {
            let mapped = slice.get_mapped_range();
            pack_rgb(
                &mapped,
                self.padded_bytes_per_row as usize,
                width as usize,
                height as usize,
                order,
                &mut self.pixels,
            );
        }
        self.readback.unmap();
        Ok(&self.pixels)
    }
}

/// [`FrameTarget`] adapter that pairs a target with the program it renders.
pub struct OffscreenRenderer<'a> {
    gpu: &'a GpuContext,
    program: &'a CompiledProgram<GpuProgram>,
    target: OffscreenTarget,
}

impl<'a> OffscreenRenderer<'a> {
    pub fn new(
        gpu: &'a GpuContext,
        program: &'a CompiledProgram<GpuProgram>,
        descriptor: RenderTargetDescriptor,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            gpu,
            program,
            target: OffscreenTarget::new(gpu, descriptor)?,
        })
    }
}

impl FrameTarget for OffscreenRenderer<'_> {
    fn draw(&mut self, values: &UniformValues) -> Result<(), RenderError> {
        self.target.draw(self.gpu, self.program, values)
    }

    fn read_pixels(&mut self) -> Result<&[u8], RenderError> {
        self.target.read_pixels(self.gpu)
    }
}

/// Renders a single frame at `time` and writes it as a PNG.
pub fn export_still(
    gpu: &GpuContext,
    program: &CompiledProgram<GpuProgram>,
    descriptor: RenderTargetDescriptor,
    camera: Camera,
    time: f32,
    path: &Path,
) -> Result<()> {
    let mut target = OffscreenTarget::new(gpu, descriptor)?;
    let values = UniformValues::new(time, descriptor.width, descriptor.height, camera);
    target.draw(gpu, program, &values)?;
    let pixels = target.read_pixels(gpu)?;
    image::save_buffer(
        path,
        pixels,
        descriptor.width,
        descriptor.height,
        image::ColorType::Rgb8,
    )
    .with_context(|| format!("failed to write still frame to {}", path.display()))?;
    tracing::info!(path = %path.display(), time, "exported still frame");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOrder {
    Rgba,
    Bgra,
}

fn channel_order(format: wgpu::TextureFormat) -> Option<ChannelOrder> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
            Some(ChannelOrder::Rgba)
        }
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            Some(ChannelOrder::Bgra)
        }
        _ => None,
    }
}

/// Drops row padding and alpha, swizzling BGRA to RGB when needed.
fn pack_rgb(
    mapped: &[u8],
    padded_row_bytes: usize,
    width: usize,
    height: usize,
    order: ChannelOrder,
    out: &mut Vec<u8>,
) {
    out.clear();
    out.reserve(width * height * 3);
    for row in mapped.chunks(padded_row_bytes).take(height) {
        for texel in row[..width * 4].chunks_exact(4) {
            match order {
                ChannelOrder::Rgba => out.extend_from_slice(&texel[..3]),
                ChannelOrder::Bgra => out.extend_from_slice(&[texel[2], texel[1], texel[0]]),
            }
        }
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(align_to(4 * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
        assert_eq!(align_to(3840 * 4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 3840 * 4);
        assert_eq!(align_to(257, 256), 512);
    }

    #[test]
    fn pack_strips_padding_and_alpha() {
        // 2x2 image, 12 bytes of padding per row
        let mut mapped = vec![0u8; 20 * 2];
        mapped[..8].copy_from_slice(&[1, 2, 3, 255, 4, 5, 6, 255]);
        mapped[20..28].copy_from_slice(&[7, 8, 9, 255, 10, 11, 12, 255]);

        let mut out = Vec::new();
        pack_rgb(&mapped, 20, 2, 2, ChannelOrder::Rgba, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn pack_swizzles_bgra() {
        let mapped = [30u8, 20, 10, 255];
        let mut out = vec![99; 7];
        pack_rgb(&mapped, 4, 1, 1, ChannelOrder::Bgra, &mut out);
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn only_eight_bit_formats_read_back() {
        assert_eq!(
            channel_order(wgpu::TextureFormat::Bgra8Unorm),
            Some(ChannelOrder::Bgra)
        );
        assert_eq!(channel_order(wgpu::TextureFormat::Rgba16Float), None);
    }
}
