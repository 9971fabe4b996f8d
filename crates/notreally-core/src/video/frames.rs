//! Decoded RGB frames streamed from an `ffmpeg` child process.
//!
//! `ffmpeg` applies the container's display rotation before scaling, so the
//! requested size is the display size (see
//! [`ContainerMetadata::display_dimensions`](crate::probe::ContainerMetadata::display_dimensions)).
//! Frames are scaled down to at most [`MAX_ANALYSIS_EDGE`] on the longer side
//! and decoded into one reused buffer.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use image::RgbImage;
use thiserror::Error;

/// Largest source width or height accepted from container metadata.
pub const MAX_SOURCE_DIMENSION: u32 = 16_384;

/// Longer edge of the frames handed to landmark detection.
pub const MAX_ANALYSIS_EDGE: u32 = 1280;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("frame read failed: {0}")]
    Read(#[source] io::Error),
}

fn acceptable(width: u32, height: u32) -> bool {
    (1..=MAX_SOURCE_DIMENSION).contains(&width) && (1..=MAX_SOURCE_DIMENSION).contains(&height)
}

/// Size frames are decoded at for a `width`x`height` source: aspect ratio
/// kept, longer edge capped at [`MAX_ANALYSIS_EDGE`].
pub fn analysis_size(width: u32, height: u32) -> Result<(u32, u32), FrameError> {
    if !acceptable(width, height) {
        return Err(FrameError::InvalidDimensions { width, height });
    }
    let longest = width.max(height);
    if longest <= MAX_ANALYSIS_EDGE {
        return Ok((width, height));
    }
    let scale = MAX_ANALYSIS_EDGE as f64 / longest as f64;
    let fit = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, MAX_ANALYSIS_EDGE);
    Ok((fit(width), fit(height)))
}

/// A stream of frames lent out one at a time.
pub trait FrameSource {
    /// The next frame and its decode index. The image is only valid until the
    /// following call.
    fn next_frame(&mut self) -> Option<Result<(u64, &RgbImage), FrameError>>;
}

/// Raw `rgb24` frames read from a byte stream, usually an `ffmpeg` pipe.
///
/// A decoder process is killed and reaped when the reader is dropped,
/// including when iteration stops early.
pub struct FrameReader {
    child: Option<Child>,
    source: Box<dyn Read + Send>,
    frame: RgbImage,
    index: u64,
    finished: bool,
}

impl FrameReader {
    /// Spawn `ffmpeg` decoding `path` to raw `rgb24`. `width`x`height` is the
    /// display size of the source; frames come out at [`analysis_size`].
    pub fn open(ffmpeg: &str, path: &Path, width: u32, height: u32) -> Result<Self, FrameError> {
        let (out_w, out_h) = analysis_size(width, height)?;

        let mut child = Command::new(ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-nostdin")
            .arg("-i")
            .arg(path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-vf")
            .arg(format!("scale={out_w}:{out_h}"))
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| FrameError::Spawn {
                program: ffmpeg.to_string(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FrameError::Read(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "decoder stdout unavailable",
            )));
        };

        let mut reader = Self::from_reader(stdout, out_w, out_h)?;
        reader.child = Some(child);
        Ok(reader)
    }

    /// Frames of exactly `width`x`height` read back to back from `source`.
    pub fn from_reader(
        source: impl Read + Send + 'static,
        width: u32,
        height: u32,
    ) -> Result<Self, FrameError> {
        if !acceptable(width, height) {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        Ok(Self {
            child: None,
            source: Box::new(source),
            frame: RgbImage::new(width, height),
            index: 0,
            finished: false,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}

/// Fill `buf` completely. Returns `false` at end of stream; a trailing
/// partial frame is discarded.
fn read_frame<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled == buf.len())
}

impl FrameSource for FrameReader {
    fn next_frame(&mut self) -> Option<Result<(u64, &RgbImage), FrameError>> {
        if self.finished {
            return None;
        }
        match read_frame(&mut self.source, &mut self.frame) {
            Ok(true) => {
                let index = self.index;
                self.index += 1;
                Some(Ok((index, &self.frame)))
            }
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(FrameError::Read(e)))
            }
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
