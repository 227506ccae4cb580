use std::borrow::Cow;
use std::fmt;

use bytemuck::Zeroable;
use wgpu::naga;

use crate::error::ShaderError;
use crate::program::ProgramBackend;
use crate::types::ShaderStageKind;

use super::context::GpuContext;
use super::quad::QuadMesh;
use super::uniforms::{ShaderParams, UniformBlock};

/// A compiled shader module tagged with its stage.
#[derive(Debug)]
pub struct GpuStage {
    stage: ShaderStageKind,
    module: wgpu::ShaderModule,
}

/// Render pipeline for one vertex/fragment pair. Dropping it releases the
/// pipeline and its shader modules.
#[derive(Debug)]
pub struct GpuProgram {
    pub(crate) pipeline: wgpu::RenderPipeline,
}

/// Builds programs on a [`GpuContext`]'s device.
///
/// wgpu reports most problems asynchronously, so every step runs inside a
/// validation error scope that is popped before returning.
pub struct GpuProgramBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    quad: QuadMesh,
    uniforms: UniformBlock,
    pipeline_layout: wgpu::PipelineLayout,
    scratch_view: wgpu::TextureView,
}

impl GpuProgramBackend {
    pub fn new(gpu: &GpuContext) -> Self {
        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("shader pipeline layout"),
                bind_group_layouts: &[&gpu.uniforms.layout],
                push_constant_ranges: &[],
            });

        let scratch = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("validation target"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: gpu.color_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let scratch_view = scratch.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            device: gpu.device.clone(),
            queue: gpu.queue.clone(),
            color_format: gpu.color_format,
            quad: gpu.quad.clone(),
            uniforms: gpu.uniforms.clone(),
            pipeline_layout,
            scratch_view,
        }
    }

    fn pop_scope(&self) -> Option<String> {
        pollster::block_on(self.device.pop_error_scope()).map(|err| err.to_string())
    }
}

impl ProgramBackend for GpuProgramBackend {
    type Stage = GpuStage;
    type Program = GpuProgram;

    fn compile(&mut self, stage: ShaderStageKind, source: &str) -> Result<GpuStage, ShaderError> {
        check_glsl(stage, source)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(match stage {
                    ShaderStageKind::Vertex => "quad vertex",
                    ShaderStageKind::Fragment => "user fragment",
                }),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Owned(source.to_owned()),
                    stage: naga_stage(stage),
                    defines: &[],
                },
            });
        if let Some(diagnostic) = self.pop_scope() {
            return Err(ShaderError::Compile { stage, diagnostic });
        }
        Ok(GpuStage { stage, module })
    }

    fn link(&mut self, vertex: GpuStage, fragment: GpuStage) -> Result<GpuProgram, ShaderError> {
        if vertex.stage != ShaderStageKind::Vertex || fragment.stage != ShaderStageKind::Fragment {
            return Err(ShaderError::Link {
                diagnostic: format!(
                    "expected vertex and fragment stages, got {} and {}",
                    vertex.stage, fragment.stage
                ),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("shader pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some("main"),
                    buffers: &[QuadMesh::layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.color_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
        if let Some(diagnostic) = self.pop_scope() {
            return Err(ShaderError::Link { diagnostic });
        }
        Ok(GpuProgram { pipeline })
    }

    /// Draws the program once into a 1x1 scratch target.
    fn validate(&mut self, program: &GpuProgram) -> Result<(), ShaderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.uniforms.write(&self.queue, &ShaderParams::zeroed());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("validation draw encoder"),
            });
        encode_quad_pass(
            &mut encoder,
            &self.scratch_view,
            &program.pipeline,
            &self.uniforms,
            &self.quad,
        );
        self.queue.submit(Some(encoder.finish()));
        match self.pop_scope() {
            Some(diagnostic) => Err(ShaderError::Validate { diagnostic }),
            None => Ok(()),
        }
    }
}

/// Records a full-screen quad draw into `view`.
pub(crate) fn encode_quad_pass(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    uniforms: &UniformBlock,
    quad: &QuadMesh,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("shader pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, &uniforms.bind_group, &[]);
    render_pass.set_vertex_buffer(0, quad.buffer().slice(..));
    render_pass.draw(0..QuadMesh::vertex_count(), 0..1);
}

fn naga_stage(stage: ShaderStageKind) -> naga::ShaderStage {
    match stage {
        ShaderStageKind::Vertex => naga::ShaderStage::Vertex,
        ShaderStageKind::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Parses and validates GLSL with naga.
///
/// naga reports byte spans over the whole prepared text, so locations are
/// translated here to count from the `#line 1` marker, i.e. the author's own
/// line numbers.
fn check_glsl(stage: ShaderStageKind, source: &str) -> Result<(), ShaderError> {
    let marker_line = line_marker(source);
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(naga_stage(stage));
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| ShaderError::Compile {
            stage,
            diagnostic: errors
                .errors
                .iter()
                .map(|err| describe(source, marker_line, err.meta, &err.kind))
                .collect::<Vec<_>>()
                .join("\n"),
        })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|err| {
        let span = err
            .spans()
            .next()
            .map_or(naga::Span::UNDEFINED, |(span, _)| *span);
        ShaderError::Compile {
            stage,
            diagnostic: describe(source, marker_line, span, err.as_inner()),
        }
    })?;
    Ok(())
}

/// 1-based line of the `#line 1` marker, or 0 when there is none.
fn line_marker(source: &str) -> u32 {
    source
        .lines()
        .position(|line| line.trim() == "#line 1")
        .map_or(0, |index| index as u32 + 1)
}

fn describe(
    source: &str,
    marker_line: u32,
    span: naga::Span,
    message: &dyn fmt::Display,
) -> String {
    if !span.is_defined() {
        return message.to_string();
    }
    let location = span.location(source);
    match location.line_number.checked_sub(marker_line) {
        Some(line) if line > 0 => format!("{line}:{}: {message}", location.line_position),
        _ => format!("(generated prelude) {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{prepare_fragment, FALLBACK_FRAGMENT_GLSL, VERTEX_SHADER_GLSL};

    #[test]
    fn builtin_shaders_pass_naga() {
        check_glsl(ShaderStageKind::Vertex, VERTEX_SHADER_GLSL).unwrap();
        let fallback = prepare_fragment(FALLBACK_FRAGMENT_GLSL);
        check_glsl(ShaderStageKind::Fragment, &fallback.glsl).unwrap();
    }

    #[test]
    fn prepared_user_shader_passes_naga() {
        let source = r"#version 330 core
in vec2 fragUV;
out vec4 FragColor;
uniform float iTime;
uniform vec2 iResolution;
uniform float iZoom;
uniform vec2 iCenter;

void main() {
    vec2 uv = (gl_FragCoord.xy / iResolution - 0.5) * iZoom + iCenter;
    FragColor = vec4(uv, 0.5 + 0.5 * sin(iTime), 1.0) * vec4(fragUV, 1.0, 1.0);
}
";
        let prepared = prepare_fragment(source);
        check_glsl(ShaderStageKind::Fragment, &prepared.glsl).unwrap();
    }

    #[test]
    fn main_image_shader_passes_naga() {
        let source = "void mainImage(out vec4 fragColor, in vec2 fragCoord) {\n    fragColor = vec4(fragCoord / iResolution.xy, 0.0, 1.0);\n}\n";
        let prepared = prepare_fragment(source);
        check_glsl(ShaderStageKind::Fragment, &prepared.glsl).unwrap();
    }

    #[test]
    fn diagnostics_use_the_authors_line_numbers() {
        let source = "#version 330 core\nuniform float iTime;\nuniform vec2 iResolution;\nout vec4 c;\nvoid main() { BAD_TOKEN }\n";
        let prepared = prepare_fragment(source);
        match check_glsl(ShaderStageKind::Fragment, &prepared.glsl) {
            Err(ShaderError::Compile { diagnostic, .. }) => {
                assert!(diagnostic.starts_with("5:"), "{diagnostic}");
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn line_marker_is_found_after_the_prelude() {
        assert_eq!(line_marker("#version 450\nfoo\n#line 1\nbar\n"), 3);
        assert_eq!(line_marker(VERTEX_SHADER_GLSL), 0);
    }

    #[test]
    fn syntax_errors_become_compile_errors() {
        let prepared = prepare_fragment("out vec4 c;\nvoid main() { c = vec4(1.0) }\n");
        match check_glsl(ShaderStageKind::Fragment, &prepared.glsl) {
            Err(ShaderError::Compile { stage, diagnostic }) => {
                assert_eq!(stage, ShaderStageKind::Fragment);
                assert!(!diagnostic.is_empty());
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }
}
