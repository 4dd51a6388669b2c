//! parley-ctl — interactive terminal client for the Parley broker.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use parley_core::{Handshake, Presence};

const DEFAULT_ADDR: &str = "127.0.0.1:8081";

// Longest presence token.
const PRESENCE_MAX: usize = 7;

#[tokio::main]
async fn main() -> Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to parleyd at {addr} — is it running?"))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let name = prompt(&mut stdin, "Enter your name: ").await?;
    let to = prompt(&mut stdin, "Whom do you want to talk to? ").await?;

    let (mut reader, mut writer) = stream.into_split();
    writer
        .write_all(&Handshake::new(name, to.clone()).to_bytes())
        .await
        .context("failed to send handshake")?;

    let (presence, mut leftover) = read_presence(&mut reader, Vec::new()).await?;
    let waited = presence == Presence::Offline;
    if waited {
        println!("waiting till {to} comes online. Press Ctrl + C to exit.");
        let (_, rest) = read_presence(&mut reader, leftover).await?;
        leftover = rest;
    }
    println!("{}", online_banner(&to, waited));

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&leftover).await?;
    stdout.flush().await?;

    let incoming = async {
        let mut buf = vec![0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await.context("read from parleyd failed")?;
            if n == 0 {
                return Ok::<_, anyhow::Error>(());
            }
            stdout.write_all(&buf[..n]).await?;
            stdout.flush().await?;
        }
    };

    let outgoing = async {
        while let Some(line) = stdin.next_line().await.context("failed to read stdin")? {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::select! {
        r = incoming => r?,
        r = outgoing => r?,
    }

    println!("connection closed");
    Ok(())
}

async fn prompt<R>(lines: &mut tokio::io::Lines<R>, question: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;

    let answer = lines
        .next_line()
        .await
        .context("error reading the input")?
        .context("stdin closed")?;
    let answer = answer.trim();
    if answer.is_empty() {
        bail!("a name is required");
    }
    Ok(answer.to_string())
}

/// The broker sends a late `online` to anyone who is the target of a new
/// arrival, so after waiting it may not be `to` who showed up.
fn online_banner(to: &str, waited: bool) -> String {
    if waited {
        "someone who wants to talk to you is online".to_string()
    } else {
        format!("{to} is online")
    }
}

/// Read one presence token, starting from bytes already received.
/// Returns it with any bytes that followed it.
async fn read_presence<R: AsyncRead + Unpin>(
    reader: &mut R,
    mut buf: Vec<u8>,
) -> Result<(Presence, Vec<u8>)> {
    let mut chunk = [0u8; 8192];
    loop {
        if let Some((presence, used)) = Presence::parse_prefix(&buf) {
            return Ok((presence, buf.split_off(used)));
        }
        if buf.len() >= PRESENCE_MAX {
            bail!("unexpected response from parleyd: {:?}", String::from_utf8_lossy(&buf));
        }
        let n = reader.read(&mut chunk).await.context("read error")?;
        if n == 0 {
            bail!("parleyd closed the connection");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
