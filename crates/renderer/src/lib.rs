//! Renderer crate for fragreel.
//!
//! The crate turns a GLSL fragment shader into either an interactive preview
//! window or a fixed-length video. The overall flow is:
//!
//! ```text
//!   ShaderSource ──▶ ShaderProgramManager::activate ──▶ CompiledProgram (active)
//!                                                          │
//!        ┌─────────────────────────────────────────────────┤
//!        ▼                                                 ▼
//!   PreviewSurface::draw (window.rs)          OfflineRenderPipeline::run
//!                                               FrameSequence ─▶ OffscreenTarget
//!                                                 ─▶ read_pixels ─▶ FrameSink
//! ```
//!
//! `ShaderProgramManager` owns exactly one validated program at a time and
//! only replaces it once a successor has compiled, linked, and validated. The
//! offline pipeline borrows that program for the whole render, so the preview
//! cannot swap shaders underneath it. Pixels leave the GPU as tightly packed
//! RGB8 rows (top to bottom) and are streamed to an encoder subprocess.

mod compile;
mod encoder;
mod error;
mod gpu;
mod offline;
mod program;
mod runtime;
mod sequencer;
mod types;
mod window;

pub use compile::{
    prepare_fragment, GlslType, PreparedFragment, UniformBindings, UniformName, UniformSlot,
    FALLBACK_FRAGMENT_GLSL, VERTEX_SHADER_GLSL,
};
pub use encoder::{
    EncoderConfig, EncoderSession, EncoderSettings, FrameSink, OutputTemplate, ReservedOutput,
};
pub use error::{EncodeError, RenderError, ShaderError, SourceError, Unrecoverable};
pub use gpu::{
    export_still, AdapterProfile, GpuContext, GpuProgram, GpuProgramBackend, OffscreenRenderer,
    OffscreenTarget, PreviewSurface,
};
pub use offline::{
    render_video, CancellationToken, FrameFailure, FrameTarget, OfflineRenderPipeline,
    RenderReport, RenderState, VideoRender,
};
pub use program::{ActivationReport, CompiledProgram, ProgramBackend, ShaderProgramManager};
pub use sequencer::{simulated_time, FrameJob, FrameSequence};
pub use types::{
    Camera, PixelFormat, PreviewConfig, RenderRequest, RenderTargetDescriptor, ShaderEntry,
    ShaderOrigin, ShaderSource, ShaderStageKind, UniformValues,
};
pub use window::run_preview;
