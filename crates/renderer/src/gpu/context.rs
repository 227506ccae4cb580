use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::compile::UniformBindings;
use crate::program::CompiledProgram;
use crate::types::UniformValues;

use super::pipeline::{encode_quad_pass, GpuProgram};
use super::quad::QuadMesh;
use super::uniforms::{ShaderParams, UniformBlock};

/// Formats the offscreen readback knows how to turn into RGB8.
const READBACK_FORMATS: [wgpu::TextureFormat; 2] = [
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Bgra8Unorm,
];

/// What the selected adapter turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl AdapterProfile {
    fn from_wgpu(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
        }
    }

    pub fn is_software(&self) -> bool {
        self.device_type == wgpu::DeviceType::Cpu
    }
}

/// Device, queue, and the resources every draw shares.
///
/// A context is created once per process. Programs, the preview surface, and
/// offscreen targets all render with its color format so a program validated
/// for the preview can also drive an offline render.
pub struct GpuContext {
    _instance: wgpu::Instance,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) color_format: wgpu::TextureFormat,
    pub(crate) quad: QuadMesh,
    pub(crate) uniforms: UniformBlock,
    max_texture_dimension: u32,
    adapter_profile: AdapterProfile,
}

impl GpuContext {
    /// Context without a window, used for `--headless` renders and stills.
    pub fn headless() -> Result<Self> {
        let instance = new_instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        Self::from_adapter(instance, &adapter, wgpu::TextureFormat::Rgba8Unorm)
    }

    /// Context bound to a preview window, plus the configured surface.
    pub fn with_window(window: Arc<Window>) -> Result<(Self, PreviewSurface)> {
        let instance = new_instance();
        let size = window.inner_size();
        let surface = instance
            .create_surface(window)
            .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let surface_caps = surface.get_capabilities(&adapter);
        anyhow::ensure!(
            !surface_caps.formats.is_empty(),
            "surface is incompatible with the selected adapter"
        );
        let color_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| READBACK_FORMATS.contains(format))
            .unwrap_or_else(|| {
                let fallback = surface_caps.formats[0];
                tracing::warn!(
                    ?fallback,
                    "no 8-bit non-sRGB surface format available; offline renders may fail"
                );
                fallback
            });

        let context = Self::from_adapter(instance, &adapter, color_format)?;

        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .unwrap_or(surface_caps.present_modes[0]);
        tracing::debug!(?present_mode, ?color_format, "using present mode");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: color_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&context.device, &config);

        Ok((context, PreviewSurface { surface, config }))
    }

    fn from_adapter(
        instance: wgpu::Instance,
        adapter: &wgpu::Adapter,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let limits = adapter.limits();
        let adapter_profile = AdapterProfile::from_wgpu(&adapter.get_info());
        tracing::debug!(
            name = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            is_software = adapter_profile.is_software(),
            max_texture_dimension = limits.max_texture_dimension_2d,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("fragreel device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let quad = QuadMesh::new(&device);
        let uniforms = UniformBlock::new(&device);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            color_format,
            quad,
            uniforms,
            max_texture_dimension: limits.max_texture_dimension_2d,
            adapter_profile,
        })
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.adapter_profile
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    pub(crate) fn write_uniforms(&self, bindings: &UniformBindings, values: &UniformValues) {
        self.uniforms
            .write(&self.queue, &ShaderParams::resolve(bindings, values));
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

/// Swapchain of the preview window.
pub struct PreviewSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl PreviewSurface {
    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.config.width, self.config.height)
    }

    pub fn resize(&mut self, gpu: &GpuContext, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&gpu.device, &self.config);
    }

    pub fn reconfigure(&mut self, gpu: &GpuContext) {
        self.surface.configure(&gpu.device, &self.config);
    }

    /// Draws one frame of `program` and presents it.
    pub fn draw(
        &mut self,
        gpu: &GpuContext,
        program: &CompiledProgram<GpuProgram>,
        values: &UniformValues,
    ) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        gpu.write_uniforms(program.uniform_bindings(), values);
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("preview encoder"),
            });
        encode_quad_pass(
            &mut encoder,
            &view,
            &program.handle().pipeline,
            &gpu.uniforms,
            &gpu.quad,
        );
        gpu.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }
}
