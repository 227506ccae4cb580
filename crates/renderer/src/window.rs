use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::encoder::{EncoderConfig, OutputTemplate};
use crate::gpu::{GpuContext, GpuProgramBackend, PreviewSurface};
use crate::offline::{render_video, CancellationToken};
use crate::program::{ActivationReport, ProgramBackend, ShaderProgramManager};
use crate::runtime::{clock_for, PreviewClock};
use crate::types::{Camera, PreviewConfig, RenderRequest, ShaderEntry, UniformValues};

/// Actions bound to keys in the preview window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviewCommand {
    Quit,
    Render,
    Next,
    Previous,
    Reload,
}

fn command_for_key(key: &Key) -> Option<PreviewCommand> {
    match key {
        Key::Named(NamedKey::Escape) => Some(PreviewCommand::Quit),
        Key::Named(NamedKey::ArrowRight) => Some(PreviewCommand::Next),
        Key::Named(NamedKey::ArrowLeft) => Some(PreviewCommand::Previous),
        Key::Named(NamedKey::Enter) => Some(PreviewCommand::Reload),
        Key::Character(value) => match value.as_str() {
            "r" | "R" => Some(PreviewCommand::Render),
            "n" | "N" => Some(PreviewCommand::Next),
            "p" | "P" => Some(PreviewCommand::Previous),
            _ => None,
        },
        _ => None,
    }
}

/// What the event loop does after a command was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviewAction {
    Continue,
    Exit,
    Render,
    /// A new program is active; preview time restarts.
    Activated,
}

/// Catalog position plus the program manager, independent of any window.
///
/// A shader that cannot be activated at all leaves the previous program and
/// entry in place; the failure only shows up in the title and the log.
struct ShaderSelection<B: ProgramBackend> {
    programs: ShaderProgramManager<B>,
    entries: Vec<ShaderEntry>,
    index: usize,
    fallback: bool,
    failed: Option<String>,
}

impl<B: ProgramBackend> ShaderSelection<B> {
    fn new(backend: B, entries: Vec<ShaderEntry>, initial: usize) -> Result<Self> {
        anyhow::ensure!(!entries.is_empty(), "shader catalog is empty");
        let index = initial.min(entries.len() - 1);
        let (source, load_error) = entries[index].load();
        let (programs, report) = ShaderProgramManager::new(backend, &source)
            .context("failed to build the initial shader program")?;
        let mut selection = Self {
            programs,
            entries,
            index,
            fallback: false,
            failed: None,
        };
        selection.record(load_error, &report);
        Ok(selection)
    }

    fn dispatch(&mut self, command: PreviewCommand) -> PreviewAction {
        match command {
            PreviewCommand::Quit => PreviewAction::Exit,
            PreviewCommand::Render => PreviewAction::Render,
            PreviewCommand::Next => self.step(1),
            PreviewCommand::Previous => self.step(-1),
            PreviewCommand::Reload => self.select(self.index),
        }
    }

    fn step(&mut self, delta: isize) -> PreviewAction {
        let len = self.entries.len() as isize;
        let next = (self.index as isize + delta).rem_euclid(len) as usize;
        self.select(next)
    }

    fn select(&mut self, index: usize) -> PreviewAction {
        let entry = &self.entries[index];
        let (source, load_error) = entry.load();
        match self.programs.activate(&source) {
            Ok(report) => {
                self.index = index;
                self.failed = None;
                self.record(load_error, &report);
                PreviewAction::Activated
            }
            Err(err) => {
                error!(
                    shader = %entry.name,
                    kept = %self.entries[self.index].name,
                    error = %err,
                    "shader could not be activated; keeping the previous program"
                );
                self.failed = Some(entry.name.clone());
                PreviewAction::Continue
            }
        }
    }

    fn record(&mut self, load_error: Option<String>, report: &ActivationReport) {
        let entry = &self.entries[self.index];
        if let Some(err) = &load_error {
            error!(shader = %entry.name, "{err}");
        }
        if let Some(diagnostic) = &report.diagnostic {
            error!(shader = %entry.name, "shader rejected, showing fallback:\n{diagnostic}");
        }
        self.fallback = load_error.is_some() || report.diagnostic.is_some();
        info!(
            shader = %entry.name,
            index = self.index,
            total = self.entries.len(),
            uniforms = %report.bindings,
            "previewing shader"
        );
    }

    fn title(&self) -> String {
        let mut title = format!("fragreel: {}", self.entries[self.index].name);
        if self.fallback {
            title.push_str(" [fallback]");
        }
        if let Some(name) = &self.failed {
            title.push_str(&format!(" [error: {name}]"));
        }
        title
    }
}

/// Everything the preview loop mutates between events.
struct PreviewState {
    window: Arc<Window>,
    gpu: GpuContext,
    surface: PreviewSurface,
    selection: ShaderSelection<GpuProgramBackend>,
    clock: Box<dyn PreviewClock>,
    camera: Camera,
    request: RenderRequest,
    output: OutputTemplate,
    encoder: EncoderConfig,
}

impl PreviewState {
    fn handle(&mut self, command: PreviewCommand) -> PreviewAction {
        let action = self.selection.dispatch(command);
        match action {
            PreviewAction::Render => self.render_offline(),
            PreviewAction::Activated => self.clock.reset(),
            PreviewAction::Continue | PreviewAction::Exit => {}
        }
        self.window.set_title(&self.selection.title());
        action
    }

    fn uniform_values(&self) -> UniformValues {
        let size = self.surface.size();
        let seconds = self.clock.sample();
        UniformValues::new(seconds, size.width, size.height, self.camera)
    }

    /// Renders the active shader to video. The preview is frozen until the
    /// render finishes.
    fn render_offline(&mut self) {
        let entry = &self.selection.entries[self.selection.index];
        info!(shader = %entry.name, "offline render requested");
        let result = render_video(
            &self.gpu,
            self.selection.programs.active(),
            self.request,
            self.camera,
            &self.output,
            &self.encoder,
            CancellationToken::new(),
        );
        if let Some(diagnostic) = &result.report.diagnostic {
            error!(shader = %entry.name, "offline render failed: {diagnostic}");
        }
        self.clock.reset();
    }
}

/// Opens the preview window and runs until it is closed or `Esc` is pressed.
///
/// Keys: `R` renders the active shader to video, `N`/`→` and `P`/`←` cycle
/// through the catalog, `Enter` reloads the current file from disk.
pub fn run_preview(config: PreviewConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let (width, height) = config.window_size;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("fragreel")
            .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
            .build(&event_loop)
            .context("failed to create preview window")?,
    );

    let (gpu, surface) = GpuContext::with_window(Arc::clone(&window))?;
    let selection = ShaderSelection::new(
        GpuProgramBackend::new(&gpu),
        config.entries,
        config.initial_entry,
    )?;
    window.set_title(&selection.title());

    let mut state = PreviewState {
        window,
        gpu,
        surface,
        selection,
        clock: clock_for(config.frozen_time),
        camera: config.camera,
        request: config.request,
        output: config.output,
        encoder: config.encoder,
    };

    let mut failure: Option<anyhow::Error> = None;
    let run_result = event_loop.run(|event, elwt| {
        elwt.set_control_flow(ControlFlow::Wait);
        match event {
            Event::WindowEvent { event, window_id } if window_id == state.window.id() => {
                match event {
                    WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                    WindowEvent::Resized(new_size) => {
                        state.surface.resize(&state.gpu, new_size);
                    }
                    WindowEvent::KeyboardInput { event, .. }
                        if event.state == ElementState::Pressed && !event.repeat =>
                    {
                        if let Some(command) = command_for_key(&event.logical_key) {
                            if state.handle(command) == PreviewAction::Exit {
                                elwt.exit();
                            }
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        let values = state.uniform_values();
                        match state.surface.draw(
                            &state.gpu,
                            state.selection.programs.active(),
                            &values,
                        ) {
                            Ok(()) => {}
                            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                                state.surface.reconfigure(&state.gpu);
                            }
                            Err(wgpu::SurfaceError::OutOfMemory) => {
                                failure = Some(anyhow!("surface out of memory"));
                                elwt.exit();
                            }
                            Err(err) => warn!(error = %err, "surface error; retrying next frame"),
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => state.window.request_redraw(),
            _ => {}
        }
    });

    if let Err(err) = run_result {
        return Err(anyhow!("window event loop error: {err}"));
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;

    use super::*;
    use crate::error::ShaderError;
    use crate::types::ShaderStageKind;

    /// Accepts every program until `broken` is set, then rejects every
    /// fragment stage including the fallback.
    struct SwitchableBackend {
        broken: Rc<Cell<bool>>,
    }

    impl ProgramBackend for SwitchableBackend {
        type Stage = ();
        type Program = ();

        fn compile(&mut self, stage: ShaderStageKind, _source: &str) -> Result<(), ShaderError> {
            if stage == ShaderStageKind::Fragment && self.broken.get() {
                return Err(ShaderError::Compile {
                    stage,
                    diagnostic: "device lost".into(),
                });
            }
            Ok(())
        }

        fn link(&mut self, _vertex: (), _fragment: ()) -> Result<(), ShaderError> {
            Ok(())
        }

        fn validate(&mut self, _program: &()) -> Result<(), ShaderError> {
            Ok(())
        }
    }

    fn selection_over(
        names: &[&str],
    ) -> (
        tempfile::TempDir,
        Rc<Cell<bool>>,
        ShaderSelection<SwitchableBackend>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let entries = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, "void main() { fragColor = vec4(1.0); }\n").unwrap();
                ShaderEntry::file(path)
            })
            .collect();
        let broken = Rc::new(Cell::new(false));
        let backend = SwitchableBackend {
            broken: Rc::clone(&broken),
        };
        let selection = ShaderSelection::new(backend, entries, 0).unwrap();
        (dir, broken, selection)
    }

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::Escape)),
            Some(PreviewCommand::Quit)
        );
        assert_eq!(
            command_for_key(&Key::Character("r".into())),
            Some(PreviewCommand::Render)
        );
        assert_eq!(
            command_for_key(&Key::Character("R".into())),
            Some(PreviewCommand::Render)
        );
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::ArrowLeft)),
            Some(PreviewCommand::Previous)
        );
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::Enter)),
            Some(PreviewCommand::Reload)
        );
        assert_eq!(command_for_key(&Key::Character("x".into())), None);
    }

    #[test]
    fn quit_and_render_do_not_touch_the_selection() {
        let (_dir, _broken, mut selection) = selection_over(&["a.txt", "b.txt"]);
        assert_eq!(selection.dispatch(PreviewCommand::Quit), PreviewAction::Exit);
        assert_eq!(selection.dispatch(PreviewCommand::Render), PreviewAction::Render);
        assert_eq!(selection.index, 0);
    }

    #[test]
    fn navigation_wraps_around_the_catalog() {
        let (_dir, _broken, mut selection) = selection_over(&["a.txt", "b.txt", "c.txt"]);
        assert_eq!(selection.dispatch(PreviewCommand::Previous), PreviewAction::Activated);
        assert_eq!(selection.index, 2);
        assert_eq!(selection.dispatch(PreviewCommand::Next), PreviewAction::Activated);
        assert_eq!(selection.index, 0);
        assert_eq!(selection.title(), "fragreel: a.txt");
    }

    #[test]
    fn failed_activation_keeps_previous_shader_and_keeps_running() {
        let (_dir, broken, mut selection) = selection_over(&["a.txt", "b.txt"]);

        broken.set(true);
        assert_eq!(selection.dispatch(PreviewCommand::Next), PreviewAction::Continue);
        assert_eq!(selection.index, 0);
        assert_eq!(selection.title(), "fragreel: a.txt [error: b.txt]");

        assert_eq!(selection.dispatch(PreviewCommand::Reload), PreviewAction::Continue);
        assert_eq!(selection.index, 0);

        broken.set(false);
        assert_eq!(selection.dispatch(PreviewCommand::Next), PreviewAction::Activated);
        assert_eq!(selection.index, 1);
        assert_eq!(selection.title(), "fragreel: b.txt");
    }
}
