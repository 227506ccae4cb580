use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::encoder::{EncoderConfig, EncoderSession, FrameSink, OutputTemplate};
use crate::error::{EncodeError, RenderError};
use crate::gpu::{GpuContext, GpuProgram, OffscreenRenderer};
use crate::program::CompiledProgram;
use crate::sequencer::FrameJob;
use crate::types::{Camera, RenderRequest, RenderTargetDescriptor, UniformValues};

/// Something the offline pipeline can draw into and read back from.
pub trait FrameTarget {
    fn draw(&mut self, values: &UniformValues) -> Result<(), RenderError>;
    /// Tightly packed RGB8 pixels of the last draw, top row first.
    fn read_pixels(&mut self) -> Result<&[u8], RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Preparing,
    Rendering,
    Finalizing,
    Completed,
    Aborted,
}

impl RenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RenderState::Completed | RenderState::Aborted)
    }
}

/// Shared flag that asks a running render to stop after the current frame.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A frame whose pixels did not fully reach the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub index: u32,
    pub message: String,
}

/// Outcome of one offline render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    /// Terminal state, `Completed` or `Aborted`.
    pub state: RenderState,
    /// Every state entered after `Idle`, in order.
    pub transitions: Vec<RenderState>,
    pub frames_total: u32,
    /// Frames drawn and handed to the sink, including failed writes.
    pub frames_rendered: u32,
    pub write_failures: Vec<FrameFailure>,
    pub cancelled: bool,
    /// Why the render was aborted.
    pub diagnostic: Option<String>,
}

/// Drives one render request from `Idle` to `Completed` or `Aborted`.
///
/// Frames are produced strictly in index order. A failed write is recorded
/// and the render continues; a failed draw or readback aborts it. The sink is
/// closed exactly once on every path that opened it.
pub struct OfflineRenderPipeline {
    request: RenderRequest,
    camera: Camera,
    cancel: CancellationToken,
    state: RenderState,
    report: RenderReport,
}

impl OfflineRenderPipeline {
    pub fn new(request: RenderRequest) -> Self {
        Self {
            request,
            camera: Camera::default(),
            cancel: CancellationToken::new(),
            state: RenderState::Idle,
            report: RenderReport {
                state: RenderState::Idle,
                transitions: Vec::new(),
                frames_total: request.total_frames,
                frames_rendered: 0,
                write_failures: Vec::new(),
                cancelled: false,
                diagnostic: None,
            },
        }
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Runs the render. `create_target` and `open_sink` are called at most
    /// once each, in that order, with the request's target descriptor.
    pub fn run<T, S, CreateTarget, OpenSink>(
        mut self,
        create_target: CreateTarget,
        open_sink: OpenSink,
    ) -> RenderReport
    where
        T: FrameTarget,
        S: FrameSink,
        CreateTarget: FnOnce(&RenderTargetDescriptor) -> Result<T, RenderError>,
        OpenSink: FnOnce(&RenderTargetDescriptor) -> Result<S, EncodeError>,
    {
        self.enter(RenderState::Preparing);
        if let Err(err) = self.request.validate() {
            return self.abort(err.to_string());
        }
        let descriptor = self.request.target;
        let mut target = match create_target(&descriptor) {
            Ok(target) => target,
            Err(err) => return self.abort(err.to_string()),
        };
        let mut sink = match open_sink(&descriptor) {
            Ok(sink) => sink,
            Err(err) => return self.abort(err.to_string()),
        };

        self.enter(RenderState::Rendering);
        let started = Instant::now();
        let mut fatal = None;
        for job in self.request.frames() {
            if self.cancel.is_cancelled() {
                info!(frame = job.index, "render cancelled");
                self.report.cancelled = true;
                break;
            }
            if let Err(err) = self.render_frame(&mut target, &mut sink, job) {
                warn!(frame = job.index, error = %err, "aborting render");
                fatal = Some(err.to_string());
                break;
            }
        }

        self.enter(RenderState::Finalizing);
        drop(target);
        let closed = sink.close();
        debug!(
            frames = self.report.frames_rendered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "render loop finished"
        );

        match (fatal, closed) {
            (Some(diagnostic), closed) => {
                if let Err(err) = closed {
                    warn!(error = %err, "encoder close failed after abort");
                }
                self.abort(diagnostic)
            }
            (None, Err(err)) => self.abort(err.to_string()),
            (None, Ok(())) => {
                self.enter(RenderState::Completed);
                self.report
            }
        }
    }

    fn render_frame<T: FrameTarget, S: FrameSink>(
        &mut self,
        target: &mut T,
        sink: &mut S,
        job: FrameJob,
    ) -> Result<(), RenderError> {
        let descriptor = self.request.target;
        let values = UniformValues::new(
            job.simulated_time as f32,
            descriptor.width,
            descriptor.height,
            self.camera,
        );
        target.draw(&values)?;
        let pixels = target.read_pixels()?;
        self.report.frames_rendered += 1;

        if let Err(err) = sink.write(pixels) {
            warn!(frame = job.index, error = %err, "frame write failed, continuing");
            self.report.write_failures.push(FrameFailure {
                index: job.index,
                message: err.to_string(),
            });
        } else if job.index % 60 == 0 {
            debug!(
                frame = job.index,
                total = self.request.total_frames,
                time = job.simulated_time,
                "rendered frame"
            );
        }
        Ok(())
    }

    fn enter(&mut self, state: RenderState) {
        debug!(from = ?self.state, to = ?state, "render state");
        self.state = state;
        self.report.state = state;
        self.report.transitions.push(state);
    }

    fn abort(mut self, diagnostic: String) -> RenderReport {
        warn!(%diagnostic, "render aborted");
        self.report.diagnostic = Some(diagnostic);
        self.enter(RenderState::Aborted);
        self.report
    }
}

/// Result of [`render_video`].
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRender {
    pub report: RenderReport,
    /// File the encoder wrote, when one was opened and kept.
    pub output_path: Option<PathBuf>,
}

/// Renders `request` with `program` on the GPU and encodes it to the first
/// free file name of `output`.
///
/// Playback length is `total_frames / framerate`, independent of the span of
/// shader time the frames sample.
pub fn render_video(
    gpu: &GpuContext,
    program: &CompiledProgram<GpuProgram>,
    request: RenderRequest,
    camera: Camera,
    output: &OutputTemplate,
    encoder: &EncoderConfig,
    cancel: CancellationToken,
) -> VideoRender {
    info!(
        frames = request.total_frames,
        width = request.target.width,
        height = request.target.height,
        simulated_seconds = request.simulated_span(),
        playback_seconds = f64::from(request.total_frames) / f64::from(encoder.framerate.max(1)),
        shader = %program.origin(),
        "starting offline render"
    );

    let mut output_path = None;
    let report = OfflineRenderPipeline::new(request)
        .with_camera(camera)
        .with_cancellation(cancel)
        .run(
            |descriptor| OffscreenRenderer::new(gpu, program, *descriptor),
            |descriptor| {
                let reserved = output.reserve().map_err(EncodeError::Reserve)?;
                let settings = encoder.settings(descriptor.width, descriptor.height);
                let session = EncoderSession::open(&settings, reserved)?;
                output_path = session.output_path().map(PathBuf::from);
                Ok(session)
            },
        );

    let output_path = output_path.filter(|path| path.exists());
    match (&report.state, &output_path) {
        (RenderState::Completed, Some(path)) => info!(
            output = %path.display(),
            frames = report.frames_rendered,
            write_failures = report.write_failures.len(),
            "render complete"
        ),
        _ => warn!(state = ?report.state, diagnostic = ?report.diagnostic, "render did not complete"),
    }
    VideoRender {
        report,
        output_path,
    }
}
