//! Wirecast client
//!
//! Minimal WebSocket client for poking a running server:
//! - performs the client half of the opening handshake
//! - sends each `--message` as a masked text frame
//! - prints received frame payloads until `--count` have arrived

use anyhow::{bail, Context};
use clap::Parser;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wirecast::protocol::{self, OpCode};

#[derive(Parser)]
#[command(name = "wirecast-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Connect to a wirecast server, send messages and print what comes back")]
struct Cli {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Messages to send after the handshake
    #[arg(short, long)]
    message: Vec<String>,

    /// Number of frames to print before exiting (the greeting included)
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// Give up waiting for frames after this many seconds
    #[arg(long, default_value = "10")]
    timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut stream =
        TcpStream::connect(&cli.addr).with_context(|| format!("Cannot connect to {}", cli.addr))?;
    stream.set_read_timeout(Some(Duration::from_secs(cli.timeout_secs)))?;

    let key = "d2lyZWNhc3QtY2xpZW50IQ==";
    stream.write_all(protocol::client_request(&cli.addr, key).as_bytes())?;

    let head = read_response_head(&mut stream)?;
    let expected = format!("Sec-WebSocket-Accept: {}", protocol::accept_key(key));
    if !head.starts_with("HTTP/1.1 101") || !head.contains(&expected) {
        bail!("Handshake refused:\n{}", head);
    }
    println!("connected to {}", cli.addr);

    for message in &cli.message {
        let frame = protocol::encode_masked(OpCode::Text, message.as_bytes(), mask());
        stream.write_all(&frame)?;
    }

    for _ in 0..cli.count {
        let payload = read_server_frame(&mut stream)?;
        println!("{}", String::from_utf8_lossy(&payload));
    }

    Ok(())
}

/// Read up to and including the blank line ending the response head
fn read_response_head(stream: &mut TcpStream) -> anyhow::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while protocol::request_head_len(&head).is_none() {
        stream.read_exact(&mut byte).context("Connection closed during handshake")?;
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Read one unmasked server frame and return its payload
fn read_server_frame(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext)?;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext)?;
            usize::try_from(u64::from_be_bytes(ext)).context("Frame too large")?
        }
        short => short as usize,
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

fn mask() -> [u8; 4] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0x5a5a_5a5a);
    nanos.to_le_bytes()
}
