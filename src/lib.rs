pub mod cache;
pub mod colorspace;
pub mod decode;
pub mod discovery;
pub mod error;
pub mod formats;
pub mod protocol;
pub mod scale;
pub mod server;
pub mod source;

pub use cache::FrameCache;
pub use decode::{Decoder, PatternDecoder, SidecarDecoder};
pub use discovery::Discovery;
pub use error::{Result, VtsError};
pub use formats::{ColorSpace, OutputFormat, Rational, VideoStandard};
pub use protocol::{Command, FrameBuffer, FrameHeader};
pub use server::{Server, ServerConfig};
pub use source::{PlayState, SourceInfo, Step, VideoSource};
