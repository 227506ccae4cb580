use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::types::ShaderStageKind;

/// Recoverable failure while building a program. Triggers the fallback shader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    #[error("shader compilation failed ({stage}):\n{diagnostic}")]
    Compile {
        stage: ShaderStageKind,
        diagnostic: String,
    },
    #[error("program linking failed:\n{diagnostic}")]
    Link { diagnostic: String },
    #[error("program validation failed:\n{diagnostic}")]
    Validate { diagnostic: String },
}

/// The built-in fallback could not be built either, which points at a broken
/// graphics context rather than a user mistake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("built-in fallback shader failed to build: {cause}")]
pub struct Unrecoverable {
    /// Why the fallback failed.
    pub cause: ShaderError,
    /// Why the requested shader was rejected, when it was not the fallback itself.
    pub rejected: Option<ShaderError>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open shader file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("shader file is empty: {}", .0.display())]
    Empty(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("invalid render request: {0}")]
    InvalidRequest(String),
    #[error("failed to create render target: {0}")]
    TargetCreationFailed(String),
    #[error("draw failed: {0}")]
    Draw(String),
    #[error("pixel readback failed: {0}")]
    Readback(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("frame has {actual} bytes, encoder expects {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("encoder accepted {written} of {expected} bytes of frame #{frames_attempted}")]
    PartialWrite {
        frames_attempted: u32,
        written: usize,
        expected: usize,
        #[source]
        source: Option<io::Error>,
    },
    #[error("encoder process '{program}' is unavailable: {source}")]
    ProcessUnavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid encoder settings: {0}")]
    InvalidSettings(String),
    #[error("failed to reserve output file: {0}")]
    Reserve(#[source] io::Error),
    #[error("failed waiting for encoder to finish: {0}")]
    Wait(#[source] io::Error),
    #[error("encoder exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
}
