use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "fragreel",
    author,
    version,
    about = "Preview GLSL fragment shaders and render them to video",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Shader to open first: a catalog name (`plasma.txt`, `plasma`) or a file path.
    #[arg(value_name = "SHADER")]
    pub shader: Option<String>,

    /// Directory scanned for `.txt` fragment shaders.
    #[arg(long, value_name = "DIR", global = true)]
    pub shader_dir: Option<PathBuf>,

    /// Settings file; defaults to `config.toml` in the user config directory.
    #[arg(long, value_name = "FILE", env = "FRAGREEL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Preview window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub window_size: Option<(u32, u32)>,

    /// Offscreen render resolution (e.g. `3840x2160`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Number of frames in the rendered video.
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u32>,

    /// Seconds of shader time the video spans before slowdown.
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Multiplier applied to the simulated time span.
    #[arg(long, value_name = "FACTOR")]
    pub slowdown: Option<f64>,

    /// Framerate of the encoded video.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Value fed to the `iZoom` uniform.
    #[arg(long, value_name = "ZOOM")]
    pub zoom: Option<f32>,

    /// Value fed to the `iCenter` uniform (e.g. `-0.5,0.25`).
    #[arg(long, value_name = "X,Y", value_parser = parse_center, allow_hyphen_values = true)]
    pub center: Option<[f32; 2]>,

    /// Directory the video is written to.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Base file name of the video; `_1`, `_2`, ... are appended when taken.
    #[arg(long, value_name = "NAME")]
    pub output_name: Option<String>,

    /// Container extension of the video.
    #[arg(long, value_name = "EXT")]
    pub output_ext: Option<String>,

    /// Encoder executable fed with raw RGB frames on stdin.
    #[arg(long, value_name = "PROGRAM", env = "FRAGREEL_ENCODER")]
    pub encoder: Option<PathBuf>,

    /// Render the video without opening a window, then exit.
    #[arg(long, conflicts_with = "still")]
    pub headless: bool,

    /// Render a single frame to the provided PNG path, then exit.
    #[arg(long, value_name = "PATH")]
    pub still: Option<PathBuf>,

    /// Shader time in seconds for `--still`; freezes the preview clock otherwise.
    #[arg(long, value_name = "SECONDS")]
    pub time: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the shader catalog.
    List,
    /// Compile, link, and validate a shader without opening a window.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Catalog name or file path of the shader to check.
    #[arg(value_name = "SHADER")]
    pub shader: String,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{w}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

fn parse_center(value: &str) -> Result<[f32; 2], String> {
    let (x, y) = value
        .trim()
        .split_once(',')
        .ok_or_else(|| "expected X,Y".to_string())?;
    let x = x
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("invalid x coordinate '{x}'"))?;
    let y = y
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("invalid y coordinate '{y}'"))?;
    if !x.is_finite() || !y.is_finite() {
        return Err("center must be finite".into());
    }
    Ok([x, y])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1920x1080").unwrap(), (1920, 1080));
        assert_eq!(parse_size(" 4 X 4 ").unwrap(), (4, 4));
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("wide x tall").is_err());
    }

    #[test]
    fn parses_centers() {
        assert_eq!(parse_center("-0.5,0.25").unwrap(), [-0.5, 0.25]);
        assert!(parse_center("1;2").is_err());
        assert!(parse_center("inf,0").is_err());
    }

    #[test]
    fn render_flags_and_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "fragreel",
            "plasma",
            "--headless",
            "--size",
            "640x360",
            "--center",
            "-1,2",
        ])
        .unwrap();
        assert_eq!(cli.run.shader.as_deref(), Some("plasma"));
        assert!(cli.run.headless);
        assert_eq!(cli.run.size, Some((640, 360)));
        assert_eq!(cli.run.center, Some([-1.0, 2.0]));
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["fragreel", "list", "--shader-dir", "shaders"]).unwrap();
        assert!(matches!(cli.command, Some(Command::List)));
        assert_eq!(cli.run.shader_dir, Some(PathBuf::from("shaders")));

        assert!(Cli::try_parse_from(["fragreel", "--headless", "--still", "a.png"]).is_err());
    }
}
