//! Raw-frame encoding through the system `ffmpeg` binary.
//!
//! Opaque RGB frames are muxed to an H.264 MP4 (the overlay is keyed out
//! downstream), alpha-preserving RGBA frames to a QuickTime Animation
//! (`qtrle`) MOV, the only broadly supported container for straight-alpha
//! overlays. We deliberately pipe raw frames to the system binary rather
//! than link FFmpeg libraries.

use std::{
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{
    error::{OsdError, OsdResult},
    raster::{PixelFormat, RenderedFrame},
    sink::{FrameSink, SinkConfig},
};

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Output container path (`.mp4` for opaque, `.mov` for alpha output).
    pub out_path: PathBuf,
    /// Whether to overwrite `out_path` if it already exists.
    pub overwrite: bool,
}

impl FfmpegSinkOpts {
    /// Options writing to `out_path`, overwriting any existing file.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
        }
    }
}

/// Check whether `ffmpeg` is invocable on `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn ensure_parent_dir(path: &Path) -> OsdResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// A [`FrameSink`] piping raw frames into a spawned `ffmpeg` process.
///
/// Writes to the child's stdin block when the encoder falls behind, which is
/// the pipeline's backpressure.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,
    cfg: Option<SinkConfig>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegSink {
    /// Create a sink; `ffmpeg` is not spawned until `begin`.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            cfg: None,
            child: None,
            stdin: None,
        }
    }

    fn validate(cfg: &SinkConfig) -> OsdResult<()> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(OsdError::validation("encode width/height must be non-zero"));
        }
        if !(cfg.fps > 0.0) {
            return Err(OsdError::validation("encode fps must be positive"));
        }
        if cfg.format == PixelFormat::Rgb8
            && (cfg.width % 2 != 0 || cfg.height % 2 != 0)
        {
            // Opaque output targets yuv420p, which needs even dimensions.
            return Err(OsdError::validation(
                "encode width/height must be even for yuv420p mp4 output",
            ));
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> OsdResult<()> {
        Self::validate(&cfg)?;
        ensure_parent_dir(&self.opts.out_path)?;

        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(OsdError::validation(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(OsdError::encode(
                "ffmpeg is required for video output, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if self.opts.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            match cfg.format {
                PixelFormat::Rgb8 => "rgb24",
                PixelFormat::Rgba8 => "rgba",
            },
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}", cfg.fps),
            "-i",
            "pipe:0",
            "-an",
        ]);
        match cfg.format {
            PixelFormat::Rgb8 => {
                cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"]);
            }
            PixelFormat::Rgba8 => {
                cmd.args(["-c:v", "qtrle", "-pix_fmt", "rgba"]);
            }
        }
        cmd.arg(&self.opts.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            OsdError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OsdError::encode("failed to open ffmpeg stdin (unexpected)"))?;

        tracing::debug!(
            out = %self.opts.out_path.display(),
            total = cfg.total_frames,
            "spawned ffmpeg encoder"
        );
        self.cfg = Some(cfg);
        self.child = Some(child);
        self.stdin = Some(stdin);
        Ok(())
    }

    fn push_frame(&mut self, _tick: u64, frame: &RenderedFrame) -> OsdResult<()> {
        let Some(cfg) = self.cfg.as_ref() else {
            return Err(OsdError::encode("push_frame called before begin"));
        };
        if frame.width != cfg.width || frame.height != cfg.height || frame.format != cfg.format
        {
            return Err(OsdError::validation(format!(
                "frame mismatch: got {}x{} {:?}, expected {}x{} {:?}",
                frame.width, frame.height, frame.format, cfg.width, cfg.height, cfg.format
            )));
        }
        let expected = (frame.width * frame.height) as usize * frame.format.channels();
        if frame.data.len() != expected {
            return Err(OsdError::validation(
                "frame data size mismatch with width*height*channels",
            ));
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(OsdError::encode("ffmpeg encoder is already finalized"));
        };
        use std::io::Write as _;
        stdin
            .write_all(&frame.data)
            .map_err(|e| OsdError::encode(format!("failed to write frame to ffmpeg stdin: {e}")))
    }

    fn end(&mut self) -> OsdResult<()> {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Err(OsdError::encode("end called before begin"));
        };

        let output = child
            .wait_with_output()
            .map_err(|e| OsdError::encode(format!("failed to wait for ffmpeg to finish: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OsdError::encode(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
