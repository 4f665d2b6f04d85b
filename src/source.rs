//! The shared video source.
//!
//! Owns the decoder and all mutating playback state. Exactly one
//! instance is shared by every connection (one switcher, many
//! observers), so everything here is plain synchronous code that runs
//! inside the server's mutual-exclusion region.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{debug, info};

use crate::cache::{FrameCache, DEFAULT_CACHE_SIZE};
use crate::colorspace;
use crate::decode::{sidecar_opener, DecodedFrame, Decoder, DecoderOpener};
use crate::error::{Result, VtsError};
use crate::formats::{ColorSpace, OutputFormat, Rational, VideoStandard};
use crate::protocol::{flags, FrameBuffer, FrameHeader};
use crate::scale;

/// File extensions `list_videos` recognizes.
pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mov", "avi", "mkv", "m4v", "webm"];

/// Roll forward at most this many frames before re-seeking the decoder.
const SEEK_AHEAD_LIMIT: u32 = 32;

/// Advisory playback state; the daemon never ticks frames on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayState::Stopped => write!(f, "STOPPED"),
            PlayState::Playing => write!(f, "PLAYING"),
            PlayState::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Metadata of the currently loaded file.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub codec: String,
}

impl SourceInfo {
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 * self.frame_rate.den as f64 / self.frame_rate.num as f64
    }
}

/// Outcome of a single-frame navigation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Frame(u32),
    End,
    Start,
}

pub struct VideoSource {
    output_format: OutputFormat,
    cache: FrameCache,
    open_decoder: DecoderOpener,
    decoder: Option<Box<dyn Decoder>>,
    info: Option<SourceInfo>,
    state: PlayState,
    current_frame: u32,
    loop_mode: bool,
}

impl VideoSource {
    pub fn new(output_format: OutputFormat) -> Self {
        Self::with_opener(output_format, sidecar_opener())
    }

    /// Construct with a custom decoder factory (tests, synthetic sources).
    pub fn with_opener(output_format: OutputFormat, opener: DecoderOpener) -> Self {
        Self {
            output_format,
            cache: FrameCache::new(DEFAULT_CACHE_SIZE),
            open_decoder: opener,
            decoder: None,
            info: None,
            state: PlayState::Stopped,
            current_frame: 0,
            loop_mode: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn info(&self) -> Option<&SourceInfo> {
        self.info.as_ref()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn loop_mode(&self) -> bool {
        self.loop_mode
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_mode = enabled;
    }

    pub fn status(&self) -> (PlayState, u32, u32) {
        let total = self.info.as_ref().map_or(0, |i| i.frame_count);
        (self.state, self.current_frame, total)
    }

    /// Open `path`, replacing any prior source.
    ///
    /// Resets the current frame, playback state, and cache whether or
    /// not the same path was already loaded.
    pub fn load(&mut self, path: &Path) -> Result<&SourceInfo> {
        self.close();

        if !path.exists() {
            return Err(VtsError::FileNotFound(path.display().to_string()));
        }
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let decoder = (self.open_decoder)(&canonical)?;
        let stream = decoder.info().clone();
        if stream.frame_count == 0 {
            return Err(VtsError::Internal("Source contains no video frames".into()));
        }

        info!(
            "Loaded: {} ({} frames, {}x{})",
            canonical.display(),
            stream.frame_count,
            stream.width,
            stream.height
        );

        self.info = Some(SourceInfo {
            path: canonical,
            frame_count: stream.frame_count,
            width: stream.width,
            height: stream.height,
            frame_rate: stream.frame_rate,
            codec: stream.codec,
        });
        self.decoder = Some(decoder);
        Ok(self.info.as_ref().unwrap())
    }

    /// Release the decoder and all per-source state. Idempotent.
    pub fn close(&mut self) {
        self.decoder = None;
        self.info = None;
        self.state = PlayState::Stopped;
        self.current_frame = 0;
        self.cache.clear();
    }

    pub fn play(&mut self) -> Result<()> {
        self.require_loaded()?;
        self.state = PlayState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require_loaded()?;
        self.state = PlayState::Paused;
        Ok(())
    }

    /// Stop playback and rewind to frame 0.
    pub fn stop(&mut self) -> Result<()> {
        self.require_loaded()?;
        self.state = PlayState::Stopped;
        self.current_frame = 0;
        Ok(())
    }

    /// Atomically switch the output format and flush the cache.
    pub fn set_format(&mut self, standard: VideoStandard, colorspace: ColorSpace) {
        self.output_format = OutputFormat::new(standard, colorspace);
        self.cache.clear();
    }

    /// Move the current frame without decoding anything.
    pub fn seek(&mut self, key: u32) -> Result<u32> {
        let key = self.resolve_key(Some(key))?;
        self.current_frame = key;
        Ok(key)
    }

    /// Advance one frame; at the end, wrap (loop on) or report `End`.
    /// With nothing loaded there is no next frame, which is also `End`.
    pub fn advance(&mut self) -> Step {
        match self.info.as_ref() {
            Some(info) if self.current_frame + 1 < info.frame_count => {
                self.current_frame += 1;
                Step::Frame(self.current_frame)
            }
            Some(_) if self.loop_mode => {
                self.current_frame = 0;
                Step::Frame(0)
            }
            _ => Step::End,
        }
    }

    /// Go back one frame; at frame 0, wrap (loop on) or report `Start`.
    /// With nothing loaded there is no previous frame, which is `Start`.
    pub fn retreat(&mut self) -> Step {
        if self.current_frame > 0 {
            self.current_frame -= 1;
            return Step::Frame(self.current_frame);
        }
        match self.info.as_ref() {
            Some(info) if self.loop_mode => {
                self.current_frame = info.frame_count - 1;
                Step::Frame(self.current_frame)
            }
            _ => Step::Start,
        }
    }

    /// Frame metadata without pixels; does not move the current frame.
    pub fn frame_info(&self, key: Option<u32>) -> Result<FrameHeader> {
        let key = self.resolve_key(key)?;
        Ok(FrameHeader {
            sequence: key,
            timestamp_ms: self.timestamp_ms(key),
            width: self.output_format.width(),
            height: self.output_format.height(),
            colorspace: self.output_format.colorspace.code(),
            flags: self.flags_for(key),
        })
    }

    /// Produce a frame in the active output format.
    ///
    /// `None` means the current frame. On a cache miss this seeks the
    /// decoder, rolls forward to the exact index, scales to the output
    /// geometry, and converts colorspace. The current frame follows the
    /// request.
    pub fn get_frame(&mut self, key: Option<u32>) -> Result<FrameBuffer> {
        let key = self.resolve_key(key)?;

        if let Some(cached) = self.cache.get(key) {
            self.current_frame = key;
            return Ok(cached);
        }

        let decoded = self.decode_at(key)?;
        let fmt = self.output_format;
        let scaled = scale::scale_rgb24(
            decoded.data,
            decoded.width,
            decoded.height,
            fmt.width() as u32,
            fmt.height() as u32,
        )?;
        let converted = colorspace::convert(
            scaled,
            fmt.width() as usize,
            fmt.height() as usize,
            fmt.colorspace,
        )?;

        let buffer = FrameBuffer {
            sequence: key,
            timestamp_ms: self.timestamp_ms(key),
            width: fmt.width(),
            height: fmt.height(),
            colorspace: fmt.colorspace,
            flags: self.flags_for(key),
            data: Bytes::from(converted),
        };
        self.cache.put(key, buffer.clone());
        self.current_frame = key;
        Ok(buffer)
    }

    fn require_loaded(&self) -> Result<&SourceInfo> {
        self.info.as_ref().ok_or(VtsError::NotLoaded)
    }

    /// Validate a frame key against the loaded source.
    ///
    /// Out-of-range keys are rejected, unless loop mode is on, in which
    /// case they wrap modulo the frame count.
    fn resolve_key(&self, key: Option<u32>) -> Result<u32> {
        let info = self.require_loaded()?;
        let key = key.unwrap_or(self.current_frame);
        if key < info.frame_count {
            Ok(key)
        } else if self.loop_mode {
            Ok(key % info.frame_count)
        } else {
            Err(VtsError::InvalidArgument(format!(
                "Frame out of range: {}",
                key
            )))
        }
    }

    fn timestamp_ms(&self, key: u32) -> u32 {
        let rate = self.info.as_ref().map_or(Rational::new(30, 1), |i| i.frame_rate);
        (key as u64 * 1000 * rate.den as u64 / rate.num as u64) as u32
    }

    fn flags_for(&self, key: u32) -> u8 {
        let count = self.info.as_ref().map_or(0, |i| i.frame_count);
        let mut f = 0;
        if key == 0 {
            f |= flags::KEYFRAME;
        }
        if key + 1 == count {
            f |= flags::END_OF_STREAM;
        }
        f
    }

    /// Decode exactly frame `key`, seeking when rolling forward would be
    /// slower, and discarding any frames the decoder yields out of order.
    fn decode_at(&mut self, key: u32) -> Result<DecodedFrame> {
        let decoder = self.decoder.as_mut().ok_or(VtsError::NotLoaded)?;

        let pos = decoder.position();
        if key < pos || key > pos + SEEK_AHEAD_LIMIT {
            debug!("Seeking decoder to frame {} (was at {})", key, pos);
            decoder.seek(key)?;
        }

        loop {
            match decoder.decode_next()? {
                Some(frame) if frame.index == key => return Ok(frame),
                Some(frame) if frame.index < key => {
                    debug!("Discarding frame {} while rolling to {}", frame.index, key);
                }
                Some(frame) => {
                    return Err(VtsError::Internal(format!(
                        "Decoder overshot: got frame {}, wanted {}",
                        frame.index, key
                    )))
                }
                None => {
                    return Err(VtsError::Internal(format!(
                        "End of stream before frame {}",
                        key
                    )))
                }
            }
        }
    }
}

/// Non-recursive listing of recognized video files, sorted
/// case-insensitively.
pub fn list_videos(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Err(VtsError::FileNotFound(dir.display().to_string()));
    }
    if dir.is_file() {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(vec![name]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let ext = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if let Some(ext) = ext {
            if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                files.push(name);
            }
        }
    }
    files.sort_by_key(|n| n.to_lowercase());
    Ok(files)
}
