//! Test client: capture frames from a running daemon into PNG files.

use std::path::PathBuf;

use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use vtsource::protocol::{FrameHeader, DEFAULT_PORT, HEADER_SIZE};

#[derive(Parser)]
#[command(name = "vts-capture", version, about = "Capture frames from a VTS daemon")]
struct Args {
    /// Video file to load (path on the daemon)
    video_file: String,

    /// Daemon host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Daemon port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of frames to capture
    #[arg(long, default_value_t = 10)]
    frames: u32,

    /// Starting frame number
    #[arg(long, default_value_t = 0)]
    start: u32,

    /// Video standard (ntsc or pal)
    #[arg(long, default_value = "ntsc")]
    format: String,

    /// Directory for captured PNGs
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

async fn recv_line(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{}\n", line).as_bytes()).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    info!("Connecting to {}:{}", args.host, args.port);
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    info!("Server: {}", recv_line(&mut reader).await?);

    send_line(&mut writer, &format!("FORMAT {} RGB24", args.format.to_uppercase())).await?;
    info!("Format: {}", recv_line(&mut reader).await?);

    send_line(&mut writer, &format!("LOAD \"{}\"", args.video_file)).await?;
    let response = recv_line(&mut reader).await?;
    info!("Load: {}", response);
    if !response.starts_with("OK") {
        return Err(format!("Failed to load file: {}", response).into());
    }

    send_line(&mut writer, "STATUS").await?;
    info!("Status: {}", recv_line(&mut reader).await?);

    info!("Capturing {} frames starting at {}", args.frames, args.start);
    for i in 0..args.frames {
        let frame_num = args.start + i;
        send_line(&mut writer, &format!("GETFRAME {}", frame_num)).await?;
        let response = recv_line(&mut reader).await?;
        if !response.starts_with("OK FRAMEDATA") {
            eprintln!("Frame {} failed: {}", frame_num, response);
            continue;
        }

        let size: usize = response
            .rsplit(' ')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or("Malformed FRAMEDATA response")?;

        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes).await?;
        let header = FrameHeader::unpack(&header_bytes)?;

        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload).await?;

        let image =
            image::RgbImage::from_raw(header.width as u32, header.height as u32, payload)
                .ok_or("Payload size does not match header geometry")?;
        let filename = args.output_dir.join(format!("frame_{:04}.png", frame_num));
        image.save(&filename)?;
        info!(
            "Saved: {} ({}x{})",
            filename.display(),
            header.width,
            header.height
        );
    }

    send_line(&mut writer, "BYE").await?;
    let _ = recv_line(&mut reader).await;
    info!("Done");
    Ok(())
}
