use tracing::{debug, info, warn};

use crate::compile::{prepare_fragment, UniformBindings, VERTEX_SHADER_GLSL};
use crate::error::{ShaderError, Unrecoverable};
use crate::types::{ShaderOrigin, ShaderSource, ShaderStageKind};

/// Graphics API seam used by [`ShaderProgramManager`].
///
/// Implementations only build objects; ownership and replacement policy stay
/// with the manager. Dropping a `Program` releases its GPU resources.
pub trait ProgramBackend {
    type Stage;
    type Program;

    fn compile(&mut self, stage: ShaderStageKind, source: &str)
        -> Result<Self::Stage, ShaderError>;

    fn link(
        &mut self,
        vertex: Self::Stage,
        fragment: Self::Stage,
    ) -> Result<Self::Program, ShaderError>;

    fn validate(&mut self, program: &Self::Program) -> Result<(), ShaderError>;
}

/// A linked and validated program with its resolved uniform inputs.
#[derive(Debug)]
pub struct CompiledProgram<P> {
    handle: P,
    bindings: UniformBindings,
    origin: ShaderOrigin,
    is_fallback: bool,
}

impl<P> CompiledProgram<P> {
    pub fn handle(&self) -> &P {
        &self.handle
    }

    pub fn uniform_bindings(&self) -> &UniformBindings {
        &self.bindings
    }

    pub fn origin(&self) -> &ShaderOrigin {
        &self.origin
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }
}

/// Outcome of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// Origin of the source that was requested.
    pub requested: ShaderOrigin,
    /// The built-in fallback is now active, either because it was requested
    /// or because the requested source was rejected.
    pub is_fallback: bool,
    /// Compiler, linker, or validation output for the rejected source.
    pub diagnostic: Option<String>,
    pub bindings: UniformBindings,
}

/// Owns the single active program and swaps it atomically.
///
/// There is always exactly one active program. A replacement is installed only
/// after it compiled, linked, and validated, and the previous program is
/// released right after the swap.
pub struct ShaderProgramManager<B: ProgramBackend> {
    backend: B,
    active: CompiledProgram<B::Program>,
}

impl<B: ProgramBackend> ShaderProgramManager<B> {
    /// Builds the first program, falling back to the built-in shader when
    /// `source` is rejected.
    pub fn new(
        mut backend: B,
        source: &ShaderSource,
    ) -> Result<(Self, ActivationReport), Unrecoverable> {
        let (active, report) = build_with_fallback(&mut backend, source)?;
        Ok((Self { backend, active }, report))
    }

    /// Replaces the active program with one built from `source`.
    ///
    /// Any recoverable failure activates the fallback shader and reports the
    /// diagnostic. If the fallback also fails the previous program stays active.
    pub fn activate(&mut self, source: &ShaderSource) -> Result<ActivationReport, Unrecoverable> {
        let (replacement, report) = build_with_fallback(&mut self.backend, source)?;
        let previous = std::mem::replace(&mut self.active, replacement);
        drop(previous);
        info!(
            origin = %report.requested,
            fallback = report.is_fallback,
            uniforms = %report.bindings,
            "activated shader program"
        );
        Ok(report)
    }

    pub fn active(&self) -> &CompiledProgram<B::Program> {
        &self.active
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn build_with_fallback<B: ProgramBackend>(
    backend: &mut B,
    source: &ShaderSource,
) -> Result<(CompiledProgram<B::Program>, ActivationReport), Unrecoverable> {
    let rejected = match build_program(backend, source) {
        Ok(program) => {
            let report = ActivationReport {
                requested: source.origin.clone(),
                is_fallback: program.is_fallback,
                diagnostic: None,
                bindings: program.bindings.clone(),
            };
            return Ok((program, report));
        }
        Err(err) if source.is_fallback() => {
            return Err(Unrecoverable {
                cause: err,
                rejected: None,
            })
        }
        Err(err) => err,
    };

    warn!(origin = %source.origin, error = %rejected, "shader rejected, activating fallback");
    let fallback = ShaderSource::fallback_fragment();
    match build_program(backend, &fallback) {
        Ok(program) => {
            let report = ActivationReport {
                requested: source.origin.clone(),
                is_fallback: true,
                diagnostic: Some(rejected.to_string()),
                bindings: program.bindings.clone(),
            };
            Ok((program, report))
        }
        Err(cause) => Err(Unrecoverable {
            cause,
            rejected: Some(rejected),
        }),
    }
}

fn build_program<B: ProgramBackend>(
    backend: &mut B,
    source: &ShaderSource,
) -> Result<CompiledProgram<B::Program>, ShaderError> {
    if source.stage != ShaderStageKind::Fragment {
        return Err(ShaderError::Compile {
            stage: source.stage,
            diagnostic: "expected a fragment shader".into(),
        });
    }

    let prepared = prepare_fragment(&source.text);
    debug!(origin = %source.origin, uniforms = %prepared.bindings, "building program");

    let vertex = backend.compile(ShaderStageKind::Vertex, VERTEX_SHADER_GLSL)?;
    let fragment = backend.compile(ShaderStageKind::Fragment, &prepared.glsl)?;
    let handle = backend.link(vertex, fragment)?;
    // Dropping `handle` on failure releases the half-built program.
    backend.validate(&handle)?;

    Ok(CompiledProgram {
        handle,
        bindings: prepared.bindings,
        origin: source.origin.clone(),
        is_fallback: source.is_fallback(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use std::rc::Rc;

    use super::*;
    use crate::compile::UniformName;

    #[derive(Default)]
    struct Ledger {
        released: Cell<usize>,
        fragment_compiles: Cell<usize>,
    }

    struct ScriptedProgram {
        id: usize,
        fragment: String,
        ledger: Rc<Ledger>,
    }

    impl Drop for ScriptedProgram {
        fn drop(&mut self) {
            self.ledger.released.set(self.ledger.released.get() + 1);
        }
    }

    struct ScriptedBackend {
        ledger: Rc<Ledger>,
        next_id: usize,
        reject_everything: bool,
        log: RefCell<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                ledger: Rc::new(Ledger::default()),
                next_id: 0,
                reject_everything: false,
                log: RefCell::new(Vec::new()),
            }
        }
    }

    impl ProgramBackend for ScriptedBackend {
        type Stage = (ShaderStageKind, String);
        type Program = ScriptedProgram;

        fn compile(
            &mut self,
            stage: ShaderStageKind,
            source: &str,
        ) -> Result<Self::Stage, ShaderError> {
            if stage == ShaderStageKind::Fragment {
                self.ledger
                    .fragment_compiles
                    .set(self.ledger.fragment_compiles.get() + 1);
                if self.reject_everything || source.contains("// fail-compile") {
                    return Err(ShaderError::Compile {
                        stage,
                        diagnostic: "0:3: syntax error".into(),
                    });
                }
            }
            Ok((stage, source.to_string()))
        }

        fn link(
            &mut self,
            _vertex: Self::Stage,
            fragment: Self::Stage,
        ) -> Result<Self::Program, ShaderError> {
            if fragment.1.contains("// fail-link") {
                return Err(ShaderError::Link {
                    diagnostic: "interface mismatch".into(),
                });
            }
            self.next_id += 1;
            self.log.borrow_mut().push(format!("link {}", self.next_id));
            Ok(ScriptedProgram {
                id: self.next_id,
                fragment: fragment.1,
                ledger: Rc::clone(&self.ledger),
            })
        }

        fn validate(&mut self, program: &Self::Program) -> Result<(), ShaderError> {
            if program.fragment.contains("// fail-validate") {
                return Err(ShaderError::Validate {
                    diagnostic: "validation draw failed".into(),
                });
            }
            Ok(())
        }
    }

    fn user_source(body: &str) -> ShaderSource {
        ShaderSource {
            stage: ShaderStageKind::Fragment,
            text: body.to_string(),
            origin: ShaderOrigin::File(PathBuf::from("shaders/test.txt")),
        }
    }

    const GOOD: &str = "uniform float iTime;\nout vec4 c;\nvoid main() { c = vec4(iTime); }\n";

    #[test]
    fn good_source_replaces_previous_and_releases_it_once() {
        let (mut manager, report) =
            ShaderProgramManager::new(ScriptedBackend::new(), &user_source(GOOD)).unwrap();
        assert!(!report.is_fallback);
        assert_eq!(manager.active().handle().id, 1);

        let report = manager.activate(&user_source(GOOD)).unwrap();
        assert!(!report.is_fallback);
        assert!(report.diagnostic.is_none());
        assert_eq!(manager.active().handle().id, 2);
        assert_eq!(manager.backend().ledger.released.get(), 1);
    }

    #[test]
    fn compile_failure_activates_fallback_with_diagnostic() {
        let (mut manager, _) =
            ShaderProgramManager::new(ScriptedBackend::new(), &user_source(GOOD)).unwrap();

        let report = manager
            .activate(&user_source("// fail-compile\nvoid main() {}\n"))
            .unwrap();
        assert!(report.is_fallback);
        assert!(report.diagnostic.unwrap().contains("syntax error"));
        assert!(manager.active().is_fallback());
        assert_eq!(manager.active().origin(), &ShaderOrigin::Builtin);
        assert_eq!(manager.backend().ledger.released.get(), 1);
    }

    #[test]
    fn link_and_validate_failures_fall_back() {
        let (mut manager, _) =
            ShaderProgramManager::new(ScriptedBackend::new(), &user_source(GOOD)).unwrap();

        let report = manager
            .activate(&user_source("// fail-link\nvoid main() {}\n"))
            .unwrap();
        assert!(report.is_fallback);
        assert!(report.diagnostic.unwrap().contains("linking"));

        let report = manager
            .activate(&user_source("// fail-validate\nvoid main() {}\n"))
            .unwrap();
        assert!(report.is_fallback);
        assert!(report.diagnostic.unwrap().contains("validation"));
        assert!(manager.active().is_fallback());
        // initial + first fallback replaced, plus the program that failed validation
        assert_eq!(manager.backend().ledger.released.get(), 3);
    }

    #[test]
    fn failing_fallback_keeps_previous_program_active() {
        let (mut manager, _) =
            ShaderProgramManager::new(ScriptedBackend::new(), &user_source(GOOD)).unwrap();
        manager.backend.reject_everything = true;
        let compiles_before = manager.backend().ledger.fragment_compiles.get();

        let err = manager.activate(&user_source(GOOD)).unwrap_err();
        assert!(err.rejected.is_some());
        assert_eq!(manager.active().handle().id, 1);
        assert!(!manager.active().is_fallback());
        assert_eq!(manager.backend().ledger.released.get(), 0);
        // one attempt for the source, one retry with the fallback
        assert_eq!(
            manager.backend().ledger.fragment_compiles.get() - compiles_before,
            2
        );
    }

    #[test]
    fn rejected_fallback_source_is_not_retried() {
        let mut backend = ScriptedBackend::new();
        backend.reject_everything = true;
        let err = match ShaderProgramManager::new(backend, &ShaderSource::fallback_fragment()) {
            Ok(_) => panic!("fallback should have been rejected"),
            Err(err) => err,
        };
        assert!(err.rejected.is_none());
    }

    #[test]
    fn bindings_follow_the_active_program() {
        let (mut manager, report) =
            ShaderProgramManager::new(ScriptedBackend::new(), &user_source(GOOD)).unwrap();
        assert!(report.bindings.contains(UniformName::Time));
        assert!(!report.bindings.contains(UniformName::Zoom));

        manager
            .activate(&user_source("// fail-compile\nvoid main() {}\n"))
            .unwrap();
        assert!(manager.active().uniform_bindings().is_empty());
        assert_eq!(manager.backend().log.borrow().len(), 2);
    }
}
