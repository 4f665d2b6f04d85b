//! Wire protocol types.
//!
//! Text lines are UTF-8, `\n`-terminated (`\r\n` accepted on input).
//! Frame transfers append a 16-byte big-endian binary header and the raw
//! payload directly after the `OK FRAMEDATA <size>` line.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, VtsError};
use crate::formats::ColorSpace;

/// Size of the packed [`FrameHeader`] in bytes.
pub const HEADER_SIZE: usize = 16;

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 5400;

/// Bits of the frame header flags byte.
pub mod flags {
    pub const KEYFRAME: u8 = 1 << 0;
    pub const FIELD_1: u8 = 1 << 1;
    pub const FIELD_2: u8 = 1 << 2;
    pub const END_OF_STREAM: u8 = 1 << 3;
}

/// Binary header prepended to each frame payload.
///
/// Layout (big-endian): u32 sequence, u32 timestamp_ms, u16 width,
/// u16 height, u8 colorspace, u8 flags, u16 reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u32,
    pub timestamp_ms: u32,
    pub width: u16,
    pub height: u16,
    pub colorspace: u8,
    pub flags: u8,
}

impl FrameHeader {
    /// Append the packed header to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32(self.sequence);
        buf.put_u32(self.timestamp_ms);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_u8(self.colorspace);
        buf.put_u8(self.flags);
        buf.put_u16(0); // reserved
    }

    pub fn pack(&self) -> [u8; HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        self.write_to(&mut buf);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(VtsError::InvalidArgument(format!(
                "Header requires {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        let mut cur = data;
        let header = FrameHeader {
            sequence: cur.get_u32(),
            timestamp_ms: cur.get_u32(),
            width: cur.get_u16(),
            height: cur.get_u16(),
            colorspace: cur.get_u8(),
            flags: cur.get_u8(),
        };
        Ok(header)
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & flags::KEYFRAME != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & flags::END_OF_STREAM != 0
    }
}

/// A fully converted frame, immutable after construction.
///
/// `data` is reference-counted, so cloning out of the cache and into the
/// write path never copies pixels.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub sequence: u32,
    pub timestamp_ms: u32,
    pub width: u16,
    pub height: u16,
    pub colorspace: ColorSpace,
    pub flags: u8,
    pub data: Bytes,
}

impl FrameBuffer {
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            sequence: self.sequence,
            timestamp_ms: self.timestamp_ms,
            width: self.width,
            height: self.height,
            colorspace: self.colorspace.code(),
            flags: self.flags,
        }
    }
}

/// Command verbs a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Bye,
    List,
    Load,
    Play,
    Pause,
    Stop,
    Seek,
    Next,
    Prev,
    GetFrame,
    FrameInfo,
    Format,
    Loop,
    Status,
    Info,
    Source,
}

impl Command {
    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "BYE" => Some(Self::Bye),
            "LIST" => Some(Self::List),
            "LOAD" => Some(Self::Load),
            "PLAY" => Some(Self::Play),
            "PAUSE" => Some(Self::Pause),
            "STOP" => Some(Self::Stop),
            "SEEK" => Some(Self::Seek),
            "NEXT" => Some(Self::Next),
            "PREV" => Some(Self::Prev),
            "GETFRAME" => Some(Self::GetFrame),
            "FRAMEINFO" => Some(Self::FrameInfo),
            "FORMAT" => Some(Self::Format),
            "LOOP" => Some(Self::Loop),
            "STATUS" => Some(Self::Status),
            "INFO" => Some(Self::Info),
            "SOURCE" => Some(Self::Source),
            _ => None,
        }
    }
}

/// Split a command line into an uppercased verb and its arguments.
///
/// Arguments are whitespace-separated. A token starting with `"` runs to
/// the next unescaped `"` and keeps embedded spaces; `\"` and `\\` are
/// honored inside quotes. Blank lines yield `None`. A missing closing
/// quote is an error.
pub fn parse_line(line: &str) -> Result<Option<(String, Vec<String>)>> {
    let line = line.trim_end_matches('\r').trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut tokens: Vec<String> = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut token = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some('"') => token.push('"'),
                        Some('\\') => token.push('\\'),
                        Some(other) => {
                            token.push('\\');
                            token.push(other);
                        }
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => token.push(other),
                }
            }
            if !closed {
                return Err(VtsError::InvalidArgument("Unterminated quote".into()));
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }

    let verb = tokens.remove(0).to_ascii_uppercase();
    Ok(Some((verb, tokens)))
}

/// Render an error as its wire line (without the terminator).
pub fn format_error(err: &VtsError) -> String {
    format!("ERROR {} {}", err.code(), err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_16_bytes() {
        let header = FrameHeader {
            sequence: 1,
            timestamp_ms: 2,
            width: 720,
            height: 486,
            colorspace: 0,
            flags: 0,
        };
        assert_eq!(header.pack().len(), HEADER_SIZE);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let header = FrameHeader {
            sequence: 0x01020304,
            timestamp_ms: 0x0A0B0C0D,
            width: 720,
            height: 486,
            colorspace: 2,
            flags: flags::END_OF_STREAM,
        };
        let packed = header.pack();
        assert_eq!(&packed[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&packed[4..8], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&packed[8..10], &[0x02, 0xD0]); // 720
        assert_eq!(&packed[10..12], &[0x01, 0xE6]); // 486
        assert_eq!(packed[12], 2);
        assert_eq!(packed[13], 8);
        assert_eq!(&packed[14..16], &[0, 0]);
    }

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader {
            sequence: 12345,
            timestamp_ms: 67890,
            width: 720,
            height: 576,
            colorspace: 1,
            flags: flags::KEYFRAME | flags::END_OF_STREAM,
        };
        let unpacked = FrameHeader::unpack(&header.pack()).unwrap();
        assert_eq!(unpacked, header);
        assert!(unpacked.is_keyframe());
        assert!(unpacked.is_end_of_stream());
    }

    #[test]
    fn header_unpack_short_buffer() {
        assert!(FrameHeader::unpack(&[0u8; 8]).is_err());
    }

    #[test]
    fn parse_simple_command() {
        let (verb, args) = parse_line("PLAY").unwrap().unwrap();
        assert_eq!(verb, "PLAY");
        assert!(args.is_empty());
    }

    #[test]
    fn parse_command_with_args() {
        let (verb, args) = parse_line("SEEK 100").unwrap().unwrap();
        assert_eq!(verb, "SEEK");
        assert_eq!(args, vec!["100"]);
    }

    #[test]
    fn parse_is_case_insensitive() {
        let (verb, _) = parse_line("play").unwrap().unwrap();
        assert_eq!(verb, "PLAY");
        assert!(Command::parse(&verb).is_some());
    }

    #[test]
    fn parse_quoted_path() {
        let (verb, args) = parse_line("LOAD \"/path/with spaces/video.mp4\"")
            .unwrap()
            .unwrap();
        assert_eq!(verb, "LOAD");
        assert_eq!(args, vec!["/path/with spaces/video.mp4"]);
    }

    #[test]
    fn parse_escaped_quote() {
        let (_, args) = parse_line("LOAD \"a \\\"b\\\" c.mp4\"").unwrap().unwrap();
        assert_eq!(args, vec!["a \"b\" c.mp4"]);
    }

    #[test]
    fn parse_multiple_args() {
        let (verb, args) = parse_line("FORMAT NTSC RGB24").unwrap().unwrap();
        assert_eq!(verb, "FORMAT");
        assert_eq!(args, vec!["NTSC", "RGB24"]);
    }

    #[test]
    fn parse_blank_lines() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   \r").unwrap().is_none());
    }

    #[test]
    fn parse_trailing_cr() {
        let (verb, _) = parse_line("STATUS\r").unwrap().unwrap();
        assert_eq!(verb, "STATUS");
    }

    #[test]
    fn unterminated_quote_is_invalid() {
        let err = parse_line("LOAD \"broken.mp4").unwrap_err();
        assert_eq!(err.code(), 401);
    }

    #[test]
    fn unknown_verb_has_no_command() {
        assert!(Command::parse("FROB").is_none());
    }

    #[test]
    fn error_line_format() {
        let line = format_error(&VtsError::FileNotFound("/nope".into()));
        assert_eq!(line, "ERROR 404 File not found: /nope");
    }
}
