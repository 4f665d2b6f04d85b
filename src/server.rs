//! TCP server and per-connection protocol handler.
//!
//! One shared [`VideoSource`] serves every connection; commands are
//! short critical sections against it, and each connection's reply is
//! fully written before its next command is read, so a slow client can
//! only stall itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, error, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::{Result, VtsError};
use crate::formats::ColorSpace;
use crate::protocol::{self, Command, FrameBuffer, DEFAULT_PORT};
use crate::source::{list_videos, Step, VideoSource};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Name announced in the HELLO greeting.
    pub name: String,
    /// Root for relative LOAD/LIST paths; also the LIST default.
    pub media_root: Option<PathBuf>,
    /// Drop connections idle for this long. Disabled by default.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            name: "vtsd".to_string(),
            media_root: None,
            idle_timeout: None,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    source: Arc<Mutex<VideoSource>>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Bind the listen socket. The source is shared with every
    /// connection the server will accept.
    pub async fn bind(config: ServerConfig, source: VideoSource) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(Self {
            listener,
            source: Arc::new(Mutex::new(source)),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal flips.
    ///
    /// On shutdown the listener closes first, live connections finish
    /// their in-flight command, and the decoder is released last.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("VTS daemon listening on {}", self.listener.local_addr()?);
        if let Some(root) = &self.config.media_root {
            info!("Media root: {}", root.display());
        }

        let mut tasks = JoinSet::new();
        let mut accept_shutdown = shutdown.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            info!("Connection from {}", addr);
                            let conn = Connection {
                                peer: addr,
                                source: self.source.clone(),
                                config: self.config.clone(),
                            };
                            let conn_shutdown = shutdown.clone();
                            tasks.spawn(conn.run(socket, conn_shutdown));
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = accept_shutdown.changed() => break,
            }
        }

        drop(self.listener);
        info!("Shutting down, draining {} connection(s)", tasks.len());
        while tasks.join_next().await.is_some() {}
        lock_source(&self.source).close();
        Ok(())
    }
}

fn lock_source(source: &Arc<Mutex<VideoSource>>) -> MutexGuard<'_, VideoSource> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the handler decided to send back for one command.
enum Reply {
    /// Nothing (blank input line).
    None,
    /// A single text line (may contain embedded newlines for LIST).
    Line(String),
    /// `OK FRAMEDATA <size>` plus binary header and payload.
    Frame(FrameBuffer),
    /// `OK BYE`, then close.
    Bye,
}

struct Connection {
    peer: SocketAddr,
    source: Arc<Mutex<VideoSource>>,
    config: Arc<ServerConfig>,
}

impl Connection {
    async fn run(self, stream: TcpStream, shutdown: watch::Receiver<bool>) {
        let peer = self.peer;
        if let Err(e) = self.serve(stream, shutdown).await {
            debug!("[{}] connection error: {}", peer, e);
        }
        info!("Connection closed: {}", peer);
    }

    async fn serve(
        &self,
        stream: TcpStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let greeting = format!(
            "OK HELLO {} VTSource {}\n",
            self.config.name,
            env!("CARGO_PKG_VERSION")
        );
        write_half.write_all(greeting.as_bytes()).await?;

        loop {
            let mut raw = Vec::new();
            let read = tokio::select! {
                r = read_command(&mut reader, &mut raw, self.config.idle_timeout) => r?,
                _ = shutdown.changed() => break,
            };
            let n = match read {
                Some(n) => n,
                None => {
                    info!("[{}] idle timeout", self.peer);
                    break;
                }
            };
            if n == 0 {
                break; // EOF
            }

            let reply = match String::from_utf8(raw) {
                Ok(line) => self.handle_line(&line),
                Err(_) => Reply::Line(protocol::format_error(&VtsError::InvalidArgument(
                    "Invalid UTF-8".into(),
                ))),
            };

            if !write_reply(&mut write_half, reply).await? {
                break;
            }
        }
        Ok(())
    }

    /// Parse and dispatch one input line. Command failures become ERROR
    /// replies; the connection itself stays up.
    fn handle_line(&self, line: &str) -> Reply {
        let (verb, args) = match protocol::parse_line(line) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Reply::None,
            Err(e) => return Reply::Line(protocol::format_error(&e)),
        };
        debug!("[{}] Command: {}", self.peer, line.trim_end());

        let Some(cmd) = Command::parse(&verb) else {
            let e = VtsError::UnknownCommand(verb);
            return Reply::Line(protocol::format_error(&e));
        };

        match self.dispatch(cmd, &args) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("[{}] {} failed: {}", self.peer, verb, e);
                Reply::Line(protocol::format_error(&e))
            }
        }
    }

    fn dispatch(&self, cmd: Command, args: &[String]) -> Result<Reply> {
        match cmd {
            Command::Bye => Ok(Reply::Bye),

            Command::List => {
                let dir = match args.first() {
                    Some(p) => self.resolve_path(Path::new(p)),
                    None => self
                        .config
                        .media_root
                        .clone()
                        .unwrap_or_else(|| PathBuf::from(".")),
                };
                let files = list_videos(&dir)?;
                let mut out = format!("OK LIST {}", files.len());
                for f in &files {
                    out.push('\n');
                    out.push_str(f);
                }
                Ok(Reply::Line(out))
            }

            Command::Load => {
                if args.is_empty() {
                    return Err(VtsError::InvalidArgument("LOAD requires filename".into()));
                }
                let path = self.resolve_path(Path::new(&args.join(" ")));
                let mut source = lock_source(&self.source);
                let frames = source.load(&path)?.frame_count;
                Ok(Reply::Line(format!("OK LOADED {} frames", frames)))
            }

            Command::Play => {
                lock_source(&self.source).play()?;
                Ok(Reply::Line("OK PLAYING".into()))
            }
            Command::Pause => {
                lock_source(&self.source).pause()?;
                Ok(Reply::Line("OK PAUSED".into()))
            }
            Command::Stop => {
                lock_source(&self.source).stop()?;
                Ok(Reply::Line("OK STOPPED".into()))
            }

            Command::Seek => {
                let arg = args
                    .first()
                    .ok_or_else(|| VtsError::InvalidArgument("SEEK requires frame number".into()))?;
                let frame = parse_frame_number(arg)?;
                let actual = lock_source(&self.source).seek(frame)?;
                Ok(Reply::Line(format!("OK SEEKED {}", actual)))
            }

            Command::Next => Ok(step_reply(lock_source(&self.source).advance())),
            Command::Prev => Ok(step_reply(lock_source(&self.source).retreat())),

            Command::GetFrame => {
                let frame = parse_optional_frame(args)?;
                let buffer = lock_source(&self.source).get_frame(frame)?;
                Ok(Reply::Frame(buffer))
            }

            Command::FrameInfo => {
                let frame = parse_optional_frame(args)?;
                let h = lock_source(&self.source).frame_info(frame)?;
                Ok(Reply::Line(format!(
                    "OK FRAMEINFO {} {} {} {} {} {}",
                    h.sequence, h.timestamp_ms, h.width, h.height, h.colorspace, h.flags
                )))
            }

            Command::Format => {
                let mut source = lock_source(&self.source);
                if args.is_empty() {
                    return Ok(Reply::Line(format!("OK FORMAT {}", source.output_format())));
                }
                let standard = args[0].parse()?;
                let colorspace = match args.get(1) {
                    Some(cs) => cs.parse()?,
                    None => ColorSpace::RGB24,
                };
                source.set_format(standard, colorspace);
                Ok(Reply::Line(format!("OK FORMAT {} {}", standard, colorspace)))
            }

            Command::Loop => {
                let mut source = lock_source(&self.source);
                if let Some(arg) = args.first() {
                    match arg.to_ascii_uppercase().as_str() {
                        "ON" | "TRUE" | "1" | "YES" => source.set_loop(true),
                        "OFF" | "FALSE" | "0" | "NO" => source.set_loop(false),
                        other => {
                            return Err(VtsError::InvalidArgument(format!(
                                "Invalid loop mode: {}",
                                other
                            )))
                        }
                    }
                }
                let mode = if source.loop_mode() { "ON" } else { "OFF" };
                Ok(Reply::Line(format!("OK LOOP {}", mode)))
            }

            Command::Status => {
                let (state, current, total) = lock_source(&self.source).status();
                Ok(Reply::Line(format!("OK STATUS {} {} {}", state, current, total)))
            }

            Command::Info => {
                let source = lock_source(&self.source);
                Ok(Reply::Line(match source.info() {
                    Some(i) => format!(
                        "OK INFO {}x{} {:.2}fps {} {} frames {:.2}s",
                        i.width,
                        i.height,
                        i.frame_rate.as_f64(),
                        i.codec,
                        i.frame_count,
                        i.duration_seconds()
                    ),
                    None => "OK INFO NONE".to_string(),
                }))
            }

            Command::Source => {
                let source = lock_source(&self.source);
                Ok(Reply::Line(match source.info() {
                    Some(i) => format!(
                        "OK SOURCE \"{}\" {} {}x{} {:.2} {}",
                        i.path.display(),
                        i.frame_count,
                        i.width,
                        i.height,
                        i.frame_rate.as_f64(),
                        i.codec
                    ),
                    None => "OK SOURCE NONE".to_string(),
                }))
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match (&self.config.media_root, path.is_absolute()) {
            (Some(root), false) => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

async fn read_command(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
    idle_timeout: Option<Duration>,
) -> Result<Option<usize>> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read_until(b'\n', buf)).await {
            Ok(r) => Ok(Some(r?)),
            Err(_) => Ok(None),
        },
        None => Ok(Some(reader.read_until(b'\n', buf).await?)),
    }
}

/// Write one reply; `false` means close the connection.
///
/// Frame replies coalesce the text line, binary header, and payload into
/// one buffer so the framed response goes out whole or not at all.
async fn write_reply(writer: &mut OwnedWriteHalf, reply: Reply) -> Result<bool> {
    match reply {
        Reply::None => Ok(true),
        Reply::Line(line) => {
            writer.write_all(format!("{}\n", line).as_bytes()).await?;
            Ok(true)
        }
        Reply::Frame(frame) => {
            let line = format!("OK FRAMEDATA {}\n", frame.data.len());
            let mut out =
                BytesMut::with_capacity(line.len() + protocol::HEADER_SIZE + frame.data.len());
            out.put_slice(line.as_bytes());
            frame.header().write_to(&mut out);
            out.put_slice(&frame.data);
            writer.write_all(&out).await?;
            Ok(true)
        }
        Reply::Bye => {
            writer.write_all(b"OK BYE\n").await?;
            Ok(false)
        }
    }
}

fn step_reply(step: Step) -> Reply {
    Reply::Line(match step {
        Step::Frame(n) => format!("OK FRAME {}", n),
        Step::End => "OK END".to_string(),
        Step::Start => "OK START".to_string(),
    })
}

fn parse_frame_number(arg: &str) -> Result<u32> {
    arg.parse()
        .map_err(|_| VtsError::InvalidArgument(format!("Invalid frame number: {}", arg)))
}

fn parse_optional_frame(args: &[String]) -> Result<Option<u32>> {
    match args.first() {
        Some(arg) => Ok(Some(parse_frame_number(arg)?)),
        None => Ok(None),
    }
}
