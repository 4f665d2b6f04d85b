//! Decoder seam.
//!
//! The daemon treats the decoder as an external collaborator: anything
//! that can report stream metadata, seek near a frame index, and yield
//! RGB24 frames in order satisfies [`Decoder`]. The production
//! implementation drives the ffmpeg binary through `ffmpeg-sidecar`;
//! [`PatternDecoder`] generates synthetic color-bar frames so the whole
//! pipeline can run without media files.

use std::path::{Path, PathBuf};
use std::process::Command;

use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::OutputVideoFrame;
use ffmpeg_sidecar::ffprobe::ffprobe_path;
use log::debug;

use crate::error::{Result, VtsError};
use crate::formats::Rational;

/// Stream metadata reported by a decoder after opening a file.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub frame_rate: Rational,
    pub codec: String,
}

/// One decoded RGB24 frame with its index in the stream.
pub struct DecodedFrame {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A seekable producer of RGB24 frames.
pub trait Decoder: Send {
    fn info(&self) -> &StreamInfo;

    /// Position so the next decoded frame is at (or before) `index`.
    fn seek(&mut self, index: u32) -> Result<()>;

    /// Index of the next frame [`Decoder::decode_next`] will yield.
    fn position(&self) -> u32;

    /// Decode the next frame, or `None` at end of stream.
    fn decode_next(&mut self) -> Result<Option<DecodedFrame>>;
}

/// Factory used by the video source to open a decoder for a path.
pub type DecoderOpener = Box<dyn Fn(&Path) -> Result<Box<dyn Decoder>> + Send>;

/// The default opener: ffmpeg via sidecar.
pub fn sidecar_opener() -> DecoderOpener {
    Box::new(|path| Ok(Box::new(SidecarDecoder::open(path)?) as Box<dyn Decoder>))
}

/// Decoder backed by an ffmpeg subprocess streaming rawvideo RGB24.
///
/// Seeking kills the subprocess and respawns it with an input-side `-ss`
/// just before the target frame's timestamp; ffmpeg lands on the
/// preceding keyframe and rolls forward, so the first emitted frame is
/// the requested one.
pub struct SidecarDecoder {
    path: PathBuf,
    info: StreamInfo,
    child: Option<FfmpegChild>,
    frames: Option<Box<dyn Iterator<Item = OutputVideoFrame> + Send>>,
    next_index: u32,
}

impl SidecarDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let info = probe(path)?;
        debug!(
            "Probed {}: {} frames, {}x{}, {} fps, {}",
            path.display(),
            info.frame_count,
            info.width,
            info.height,
            info.frame_rate,
            info.codec
        );
        Ok(Self {
            path: path.to_path_buf(),
            info,
            child: None,
            frames: None,
            next_index: 0,
        })
    }

    fn spawn_at(&mut self, index: u32) -> Result<()> {
        self.stop();

        let mut cmd = FfmpegCommand::new();
        if index > 0 {
            // Half a frame early so rounding never lands us one frame late.
            let ts = (index as f64 - 0.5).max(0.0) / self.info.frame_rate.as_f64();
            let ts = format!("{:.6}", ts);
            cmd.args(["-ss", ts.as_str()]);
        }
        let mut child = cmd
            .input(self.path.to_string_lossy())
            .args(["-an"])
            .rawvideo()
            .spawn()
            .map_err(|e| VtsError::Internal(format!("ffmpeg spawn failed: {}", e)))?;
        let iter = child
            .iter()
            .map_err(|e| VtsError::Internal(format!("ffmpeg pipe failed: {}", e)))?;

        self.frames = Some(Box::new(iter.filter_frames()));
        self.child = Some(child);
        self.next_index = index;
        Ok(())
    }

    fn stop(&mut self) {
        self.frames = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Decoder for SidecarDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn seek(&mut self, index: u32) -> Result<()> {
        self.spawn_at(index)
    }

    fn position(&self) -> u32 {
        self.next_index
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        if self.frames.is_none() {
            self.spawn_at(self.next_index)?;
        }
        match self.frames.as_mut().unwrap().next() {
            Some(frame) => {
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(DecodedFrame {
                    index,
                    width: frame.width,
                    height: frame.height,
                    data: frame.data,
                }))
            }
            None => Ok(None),
        }
    }
}

impl Drop for SidecarDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn probe(path: &Path) -> Result<StreamInfo> {
    let output = Command::new(ffprobe_path())
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height,r_frame_rate,nb_frames",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| VtsError::Internal(format!("ffprobe failed to start: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VtsError::Internal(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `key=value` lines from ffprobe's default writer.
fn parse_probe_output(text: &str) -> Result<StreamInfo> {
    let mut codec = None;
    let mut width = None;
    let mut height = None;
    let mut frame_rate = None;
    let mut nb_frames = None;
    let mut duration = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "codec_name" => codec = Some(value.to_string()),
            "width" => width = value.parse::<u32>().ok(),
            "height" => height = value.parse::<u32>().ok(),
            "r_frame_rate" => frame_rate = parse_rate(value),
            "nb_frames" => nb_frames = value.parse::<u32>().ok(),
            "duration" => duration = value.parse::<f64>().ok(),
            _ => {}
        }
    }

    let width = width.ok_or_else(|| VtsError::Internal("probe: no width".into()))?;
    let height = height.ok_or_else(|| VtsError::Internal("probe: no height".into()))?;
    let frame_rate =
        frame_rate.ok_or_else(|| VtsError::Internal("probe: no frame rate".into()))?;

    let frame_count = match nb_frames {
        Some(n) if n > 0 => n,
        _ => match duration {
            Some(secs) if secs > 0.0 => (secs * frame_rate.as_f64()).round() as u32,
            _ => {
                return Err(VtsError::Internal(
                    "probe: cannot determine frame count".into(),
                ))
            }
        },
    };

    Ok(StreamInfo {
        width,
        height,
        frame_count,
        frame_rate,
        codec: codec.unwrap_or_else(|| "unknown".to_string()),
    })
}

fn parse_rate(value: &str) -> Option<Rational> {
    let (num, den) = match value.split_once('/') {
        Some((n, d)) => (n.parse().ok()?, d.parse().ok()?),
        None => (value.parse().ok()?, 1),
    };
    if num == 0 || den == 0 {
        return None;
    }
    Some(Rational::new(num, den))
}

/// Synthetic source: color bars with a per-frame tint.
///
/// Every frame is a deterministic function of its index, which is what
/// the pipeline and protocol tests key on.
pub struct PatternDecoder {
    info: StreamInfo,
    next_index: u32,
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

impl PatternDecoder {
    pub fn new(width: u32, height: u32, frame_count: u32, frame_rate: Rational) -> Self {
        Self {
            info: StreamInfo {
                width,
                height,
                frame_count,
                frame_rate,
                codec: "pattern".to_string(),
            },
            next_index: 0,
        }
    }

    /// An opener that ignores the path and yields this synthetic source.
    pub fn opener(
        width: u32,
        height: u32,
        frame_count: u32,
        frame_rate: Rational,
    ) -> DecoderOpener {
        Box::new(move |_path| {
            Ok(Box::new(PatternDecoder::new(width, height, frame_count, frame_rate))
                as Box<dyn Decoder>)
        })
    }

    fn render(&self, index: u32) -> Vec<u8> {
        let (w, h) = (self.info.width as usize, self.info.height as usize);
        let mut data = Vec::with_capacity(w * h * 3);
        for _y in 0..h {
            for x in 0..w {
                let bar = BARS[x * 8 / w];
                data.push(bar[0]);
                data.push(bar[1] ^ (index as u8));
                data.push(bar[2].wrapping_add(index as u8));
            }
        }
        data
    }
}

impl Decoder for PatternDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn seek(&mut self, index: u32) -> Result<()> {
        self.next_index = index;
        Ok(())
    }

    fn position(&self) -> u32 {
        self.next_index
    }

    fn decode_next(&mut self) -> Result<Option<DecodedFrame>> {
        if self.next_index >= self.info.frame_count {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(DecodedFrame {
            index,
            width: self.info.width,
            height: self.info.height,
            data: self.render(index),
        }))
    }
}
