use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use renderer::{Camera, EncoderConfig, OutputTemplate, RenderRequest, RenderTargetDescriptor};
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// Settings file contents. Every key is optional; missing keys keep the
/// built-in defaults and command-line flags override both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub shader_dir: PathBuf,
    pub preview: PreviewSettings,
    pub render: RenderSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewSettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub duration: f64,
    pub slowdown: f64,
    pub fps: u32,
    pub zoom: f32,
    pub center: [f32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub name: String,
    pub extension: String,
    pub encoder: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            preview: PreviewSettings::default(),
            render: RenderSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
            frames: 1800,
            duration: 30.0,
            slowdown: 1.0,
            fps: 60,
            zoom: 1.0,
            center: [0.0, 0.0],
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        let template = OutputTemplate::default();
        Self {
            directory: template.directory,
            name: template.base_name,
            extension: template.extension,
            encoder: EncoderConfig::default().program,
        }
    }
}

impl Settings {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reads a file the user pointed at explicitly; a missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file at {}", path.display()))?;
        let settings: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse settings file at {}", path.display()))?;
        Ok(settings)
    }

    pub fn apply_args(&mut self, args: &RunArgs) {
        if let Some(dir) = &args.shader_dir {
            self.shader_dir = dir.clone();
        }
        if let Some((width, height)) = args.window_size {
            self.preview.width = width;
            self.preview.height = height;
        }
        if let Some((width, height)) = args.size {
            self.render.width = width;
            self.render.height = height;
        }
        let render = &mut self.render;
        render.frames = args.frames.unwrap_or(render.frames);
        render.duration = args.duration.unwrap_or(render.duration);
        render.slowdown = args.slowdown.unwrap_or(render.slowdown);
        render.fps = args.fps.unwrap_or(render.fps);
        render.zoom = args.zoom.unwrap_or(render.zoom);
        render.center = args.center.unwrap_or(render.center);

        let output = &mut self.output;
        if let Some(dir) = &args.output_dir {
            output.directory = dir.clone();
        }
        if let Some(name) = &args.output_name {
            output.name = name.clone();
        }
        if let Some(extension) = &args.output_ext {
            output.extension = extension.clone();
        }
        if let Some(encoder) = &args.encoder {
            output.encoder = encoder.clone();
        }
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.preview.width, self.preview.height)
    }

    pub fn target(&self) -> RenderTargetDescriptor {
        RenderTargetDescriptor::rgb8(self.render.width, self.render.height)
    }

    pub fn request(&self) -> RenderRequest {
        RenderRequest {
            total_frames: self.render.frames,
            desired_duration_seconds: self.render.duration,
            slowdown_factor: self.render.slowdown,
            target: self.target(),
        }
    }

    pub fn camera(&self) -> Camera {
        Camera {
            zoom: self.render.zoom,
            center: self.render.center,
        }
    }

    pub fn output_template(&self) -> OutputTemplate {
        OutputTemplate {
            directory: self.output.directory.clone(),
            base_name: self.output.name.clone(),
            extension: self.output.extension.clone(),
        }
    }

    pub fn encoder(&self) -> EncoderConfig {
        EncoderConfig {
            program: self.output.encoder.clone(),
            framerate: self.render.fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());

        let request = settings.request();
        assert_eq!(request.total_frames, 1800);
        assert_eq!(request.desired_duration_seconds, 30.0);
        assert_eq!((request.target.width, request.target.height), (3840, 2160));
        assert_eq!(settings.encoder().framerate, 60);
        assert_eq!(
            settings.output_template().candidate(0),
            PathBuf::from("./output.mp4")
        );
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "shader_dir = \"glsl\"\n[render]\nframes = 90\ncenter = [0.5, -0.25]\n",
        )
        .unwrap();

        let settings = Settings::load_or_default(&path).unwrap();
        assert_eq!(settings.shader_dir, PathBuf::from("glsl"));
        assert_eq!(settings.render.frames, 90);
        assert_eq!(settings.camera().center, [0.5, -0.25]);
        assert_eq!(settings.render.fps, 60);
        assert_eq!(settings.output, OutputSettings::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[render]\nframez = 3\n").unwrap();
        let err = Settings::load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse settings file"));
    }

    #[test]
    fn flags_override_file_values() {
        let mut settings = Settings::default();
        settings.render.frames = 90;
        settings.render.zoom = 2.0;

        let args = RunArgs {
            frames: Some(3),
            size: Some((4, 4)),
            output_name: Some("clip".into()),
            ..RunArgs::default()
        };
        settings.apply_args(&args);

        assert_eq!(settings.render.frames, 3);
        assert_eq!(settings.render.zoom, 2.0);
        assert_eq!(settings.target().frame_byte_size(), 48);
        assert_eq!(settings.output_template().base_name, "clip");
    }
}
