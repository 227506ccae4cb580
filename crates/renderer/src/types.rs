use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::compile::FALLBACK_FRAGMENT_GLSL;
use crate::encoder::{EncoderConfig, OutputTemplate};
use crate::error::{RenderError, SourceError};
use crate::sequencer::FrameSequence;

/// Pipeline stage a piece of GLSL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStageKind::Vertex => f.write_str("vertex"),
            ShaderStageKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Where a shader's text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderOrigin {
    File(PathBuf),
    Builtin,
}

impl fmt::Display for ShaderOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderOrigin::File(path) => write!(f, "{}", path.display()),
            ShaderOrigin::Builtin => f.write_str("built-in fallback"),
        }
    }
}

/// Immutable shader text plus its stage and origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub stage: ShaderStageKind,
    pub text: String,
    pub origin: ShaderOrigin,
}

impl ShaderSource {
    /// Reads a fragment shader from disk, rejecting empty files.
    pub fn read_fragment(path: &Path) -> Result<Self, SourceError> {
        let text = fs::read_to_string(path).map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Err(SourceError::Empty(path.to_path_buf()));
        }
        tracing::debug!(path = %path.display(), bytes = text.len(), "loaded shader");
        Ok(Self {
            stage: ShaderStageKind::Fragment,
            text,
            origin: ShaderOrigin::File(path.to_path_buf()),
        })
    }

    /// The solid red fragment shader substituted when user code fails to build.
    pub fn fallback_fragment() -> Self {
        Self {
            stage: ShaderStageKind::Fragment,
            text: FALLBACK_FRAGMENT_GLSL.to_string(),
            origin: ShaderOrigin::Builtin,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == ShaderOrigin::Builtin && self.text == FALLBACK_FRAGMENT_GLSL
    }
}

/// One selectable item of the shader catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderEntry {
    pub name: String,
    pub origin: ShaderOrigin,
}

impl ShaderEntry {
    pub fn file(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            origin: ShaderOrigin::File(path),
        }
    }

    pub fn builtin() -> Self {
        Self {
            name: "Fallback Shader".to_string(),
            origin: ShaderOrigin::Builtin,
        }
    }

    /// Reads the entry's text. Unreadable or empty files yield the fallback
    /// shader together with the reason, so the caller always gets something
    /// to activate.
    pub fn load(&self) -> (ShaderSource, Option<String>) {
        match &self.origin {
            ShaderOrigin::Builtin => (ShaderSource::fallback_fragment(), None),
            ShaderOrigin::File(path) => match ShaderSource::read_fragment(path) {
                Ok(source) => (source, None),
                Err(err) => {
                    tracing::warn!(error = %err, "using fallback shader");
                    (ShaderSource::fallback_fragment(), Some(err.to_string()))
                }
            },
        }
    }
}

/// Only pixel layout the encoder pipe understands: interleaved 8-bit RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// Dimensions and pixel layout of an offscreen render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl RenderTargetDescriptor {
    pub fn rgb8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Rgb8,
        }
    }

    /// Size in bytes of one tightly packed frame.
    pub fn frame_byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// Parameters of one offline render. Immutable for the render's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub total_frames: u32,
    pub desired_duration_seconds: f64,
    pub slowdown_factor: f64,
    pub target: RenderTargetDescriptor,
}

impl RenderRequest {
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.total_frames == 0 {
            return Err(RenderError::InvalidRequest(
                "total frame count must be at least 1".into(),
            ));
        }
        if self.target.width == 0 || self.target.height == 0 {
            return Err(RenderError::InvalidRequest(format!(
                "render target must be non-empty, got {}x{}",
                self.target.width, self.target.height
            )));
        }
        if !self.desired_duration_seconds.is_finite() || self.desired_duration_seconds < 0.0 {
            return Err(RenderError::InvalidRequest(format!(
                "duration must be a non-negative number of seconds, got {}",
                self.desired_duration_seconds
            )));
        }
        if !self.slowdown_factor.is_finite() || self.slowdown_factor < 0.0 {
            return Err(RenderError::InvalidRequest(format!(
                "slowdown factor must be non-negative, got {}",
                self.slowdown_factor
            )));
        }
        Ok(())
    }

    /// Frame jobs in render order.
    pub fn frames(&self) -> FrameSequence {
        FrameSequence::new(
            self.total_frames,
            self.desired_duration_seconds,
            self.slowdown_factor,
        )
    }

    /// Span of simulated time covered by the render.
    pub fn simulated_span(&self) -> f64 {
        self.desired_duration_seconds * self.slowdown_factor
    }
}

/// Optional camera inputs exposed as `iZoom` / `iCenter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub zoom: f32,
    pub center: [f32; 2],
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            center: [0.0, 0.0],
        }
    }
}

/// Host-side values for one draw call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformValues {
    pub time: f32,
    pub resolution: [f32; 2],
    pub zoom: f32,
    pub center: [f32; 2],
}

impl UniformValues {
    pub fn new(time: f32, width: u32, height: u32, camera: Camera) -> Self {
        Self {
            time,
            resolution: [width as f32, height as f32],
            zoom: camera.zoom,
            center: camera.center,
        }
    }
}

/// Everything the interactive preview needs at start-up.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Window size in physical pixels.
    pub window_size: (u32, u32),
    /// Catalog entries the user can cycle through.
    pub entries: Vec<ShaderEntry>,
    /// Entry activated first.
    pub initial_entry: usize,
    pub camera: Camera,
    /// Freeze preview time at this value instead of following the wall clock.
    pub frozen_time: Option<f32>,
    /// Render started with the `R` key.
    pub request: RenderRequest,
    pub output: OutputTemplate,
    pub encoder: EncoderConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(total_frames: u32, width: u32, height: u32) -> RenderRequest {
        RenderRequest {
            total_frames,
            desired_duration_seconds: 2.0,
            slowdown_factor: 1.0,
            target: RenderTargetDescriptor::rgb8(width, height),
        }
    }

    #[test]
    fn frame_byte_size_is_three_bytes_per_pixel() {
        assert_eq!(RenderTargetDescriptor::rgb8(4, 4).frame_byte_size(), 48);
        assert_eq!(
            RenderTargetDescriptor::rgb8(3840, 2160).frame_byte_size(),
            3840 * 2160 * 3
        );
    }

    #[test]
    fn validate_rejects_empty_requests() {
        assert!(request(0, 4, 4).validate().is_err());
        assert!(request(1, 0, 4).validate().is_err());
        assert!(request(1, 4, 0).validate().is_err());
        assert!(request(1, 4, 4).validate().is_ok());

        let mut bad_duration = request(3, 4, 4);
        bad_duration.desired_duration_seconds = f64::NAN;
        assert!(bad_duration.validate().is_err());
    }

    #[test]
    fn entry_load_falls_back_for_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "  \n").unwrap();

        let (source, diagnostic) = ShaderEntry::file(empty).load();
        assert!(source.is_fallback());
        assert!(diagnostic.unwrap().contains("empty"));

        let (source, diagnostic) = ShaderEntry::file(dir.path().join("missing.txt")).load();
        assert!(source.is_fallback());
        assert!(diagnostic.is_some());
    }

    #[test]
    fn entry_load_reads_fragment_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.txt");
        fs::write(&path, "void main() {}\n").unwrap();

        let entry = ShaderEntry::file(path.clone());
        assert_eq!(entry.name, "wave.txt");
        let (source, diagnostic) = entry.load();
        assert!(diagnostic.is_none());
        assert_eq!(source.origin, ShaderOrigin::File(path));
        assert_eq!(source.stage, ShaderStageKind::Fragment);
    }
}
