//! wgpu plumbing behind the shader manager and the render targets.
//!
//! - `context` owns the instance, device, and queue, plus the resources every
//!   draw shares (quad mesh, uniform block). It also wires the preview surface.
//! - `pipeline` implements [`crate::ProgramBackend`]: naga-checked GLSL
//!   modules, render pipelines, and a scratch draw used as validation.
//! - `quad` is the six-vertex full-screen mesh.
//! - `uniforms` mirrors the `FragreelParams` block injected by `compile`.
//! - `target` renders into an offscreen texture and reads it back as RGB8.

mod context;
mod pipeline;
mod quad;
mod target;
mod uniforms;

pub use context::{AdapterProfile, GpuContext, PreviewSurface};
pub use pipeline::{GpuProgram, GpuProgramBackend};
pub use target::{export_still, OffscreenRenderer, OffscreenTarget};
