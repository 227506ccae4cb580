use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::EncodeError;
use crate::types::PixelFormat;

/// Destination for rendered frames.
///
/// Every `write` receives exactly one tightly packed frame. `close` consumes
/// the sink so it runs exactly once.
pub trait FrameSink {
    fn write(&mut self, pixels: &[u8]) -> Result<(), EncodeError>;
    fn close(self) -> Result<(), EncodeError>;
}

/// Encoder binary and output framerate, independent of any one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub program: PathBuf,
    pub framerate: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            framerate: 60,
        }
    }
}

impl EncoderConfig {
    pub fn settings(&self, width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            program: self.program.clone(),
            width,
            height,
            framerate: self.framerate,
        }
    }
}

/// Parameters of one encoder session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub program: PathBuf,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl EncoderSettings {
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.width == 0 || self.height == 0 {
            return Err(EncodeError::InvalidSettings(
                "width/height must be non-zero".into(),
            ));
        }
        if self.framerate == 0 {
            return Err(EncodeError::InvalidSettings(
                "framerate must be non-zero".into(),
            ));
        }
        // yuv420p subsamples chroma 2x2.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(EncodeError::InvalidSettings(format!(
                "width/height must be even for yuv420p output, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn frame_byte_size(&self) -> usize {
        self.width as usize * self.height as usize * PixelFormat::Rgb8.bytes_per_pixel()
    }

    fn command(&self, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", self.width, self.height),
            "-r",
            &self.framerate.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ])
        .arg(output);
        cmd
    }
}

/// Bytes of encoder stderr kept for the exit diagnostic.
const STDERR_TAIL_BYTES: usize = 16 * 1024;

struct EncoderProcess {
    child: Child,
    stdin: ChildStdin,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl EncoderProcess {
    /// Closes stdin, waits for the child, then joins the stderr reader.
    fn finish(self) -> io::Result<(ExitStatus, String)> {
        let Self {
            mut child,
            stdin,
            stderr,
        } = self;
        drop(stdin);
        let status = child.wait()?;
        let stderr = match stderr.map(JoinHandle::join) {
            Some(Ok(tail)) => String::from_utf8_lossy(&tail).trim().to_string(),
            Some(Err(_)) => "encoder stderr reader panicked".to_string(),
            None => String::new(),
        };
        Ok((status, stderr))
    }
}

/// Reads the child's stderr until EOF so the encoder never blocks on a full
/// pipe while we block writing frames. Keeps only the last
/// [`STDERR_TAIL_BYTES`].
fn drain_stderr<R: Read + Send + 'static>(mut stderr: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut tail = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => {
                    tail.extend_from_slice(&chunk[..count]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        tail
    })
}

/// Streams raw RGB8 frames into an encoder subprocess.
///
/// Owns the child process and the reserved output file. If the session is
/// dropped without [`FrameSink::close`] the child is reaped and the reserved
/// file removed.
pub struct EncoderSession {
    program: String,
    output: Option<ReservedOutput>,
    process: Option<EncoderProcess>,
    expected_frame_bytes: usize,
    frames_attempted: u32,
}

impl EncoderSession {
    pub fn open(settings: &EncoderSettings, output: ReservedOutput) -> Result<Self, EncodeError> {
        settings.validate()?;
        let program = settings.program.display().to_string();

        let mut child = settings
            .command(output.path())
            .spawn()
            .map_err(|source| EncodeError::ProcessUnavailable {
                program: program.clone(),
                source,
            })?;
        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EncodeError::ProcessUnavailable {
                program,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "encoder stdin is not piped"),
            });
        };

        let stderr = child.stderr.take().map(drain_stderr);

        info!(
            program = %program,
            output = %output.path().display(),
            width = settings.width,
            height = settings.height,
            framerate = settings.framerate,
            "started encoder"
        );

        Ok(Self {
            program,
            output: Some(output),
            process: Some(EncoderProcess {
                child,
                stdin,
                stderr,
            }),
            expected_frame_bytes: settings.frame_byte_size(),
            frames_attempted: 0,
        })
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_ref().map(ReservedOutput::path)
    }

    pub fn expected_frame_bytes(&self) -> usize {
        self.expected_frame_bytes
    }

    pub fn frames_attempted(&self) -> u32 {
        self.frames_attempted
    }
}

impl FrameSink for EncoderSession {
    fn write(&mut self, pixels: &[u8]) -> Result<(), EncodeError> {
        check_frame_size(self.expected_frame_bytes, pixels.len())?;
        self.frames_attempted += 1;
        let Some(process) = self.process.as_mut() else {
            return Err(EncodeError::PartialWrite {
                frames_attempted: self.frames_attempted,
                written: 0,
                expected: pixels.len(),
                source: None,
            });
        };
        write_frame(&mut process.stdin, pixels, self.frames_attempted)
    }

    fn close(mut self) -> Result<(), EncodeError> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let (status, stderr) = process.finish().map_err(EncodeError::Wait)?;
        if !status.success() {
            return Err(EncodeError::Exit { status, stderr });
        }

        if let Some(reserved) = self.output.take() {
            let path = reserved.commit();
            info!(
                program = %self.program,
                output = %path.display(),
                frames = self.frames_attempted,
                "encoder finished"
            );
        }
        Ok(())
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            warn!(program = %self.program, "encoder session dropped without close");
            if let Err(err) = process.finish() {
                warn!(error = %err, "failed to reap encoder process");
            }
        }
    }
}

fn check_frame_size(expected: usize, actual: usize) -> Result<(), EncodeError> {
    if expected != actual {
        return Err(EncodeError::FrameSize { expected, actual });
    }
    Ok(())
}

/// Writes one frame, treating a zero-length write or an I/O error as a
/// partial write with the number of bytes that made it through.
fn write_frame<W: Write>(
    writer: &mut W,
    pixels: &[u8],
    frames_attempted: u32,
) -> Result<(), EncodeError> {
    let mut written = 0;
    while written < pixels.len() {
        match writer.write(&pixels[written..]) {
            Ok(0) => {
                return Err(EncodeError::PartialWrite {
                    frames_attempted,
                    written,
                    expected: pixels.len(),
                    source: None,
                })
            }
            Ok(count) => written += count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(EncodeError::PartialWrite {
                    frames_attempted,
                    written,
                    expected: pixels.len(),
                    source: Some(err),
                })
            }
        }
    }
    Ok(())
}

/// How rendered videos are named: `<base>.<ext>`, then `<base>_1.<ext>`,
/// `<base>_2.<ext>` and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    pub directory: PathBuf,
    pub base_name: String,
    pub extension: String,
}

impl Default for OutputTemplate {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            base_name: "output".to_string(),
            extension: "mp4".to_string(),
        }
    }
}

impl OutputTemplate {
    /// Candidate path for the given attempt; attempt 0 has no suffix.
    pub fn candidate(&self, attempt: u32) -> PathBuf {
        let extension = self.extension.trim_start_matches('.');
        let file_name = match attempt {
            0 => format!("{}.{}", self.base_name, extension),
            n => format!("{}_{}.{}", self.base_name, n, extension),
        };
        self.directory.join(file_name)
    }

    /// First candidate that does not exist yet. Advisory only: use
    /// [`OutputTemplate::reserve`] when the path is about to be written.
    pub fn select(&self) -> PathBuf {
        (0..u32::MAX)
            .map(|attempt| self.candidate(attempt))
            .find(|path| !path.exists())
            .unwrap_or_else(|| self.candidate(u32::MAX))
    }

    /// Atomically claims the first free candidate by creating it.
    pub fn reserve(&self) -> io::Result<ReservedOutput> {
        fs::create_dir_all(&self.directory)?;
        for attempt in 0..u32::MAX {
            let path = self.candidate(attempt);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), "reserved output file");
                    return Ok(ReservedOutput {
                        path,
                        committed: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free output file name left",
        ))
    }
}

/// An output path claimed on disk. Removed on drop unless committed.
#[derive(Debug)]
pub struct ReservedOutput {
    path: PathBuf,
    committed: bool,
}

impl ReservedOutput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the file and hands back its path.
    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        self.path.clone()
    }
}

impl Drop for ReservedOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove unused output file");
            }
        }
    }
}
