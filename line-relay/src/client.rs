//! Terminal front-end speaking the relay's plain-line protocol.
//!
//! Lines go out as `[HH:MM:SS] name: text`, with join and leave announcements
//! in the same timestamped form. Everything received is printed verbatim.

use anyhow::{Context, Result};
use chrono::Local;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{announce::JOIN_MARKER, cli::ClientArgs};

const LEAVE_MARKER: &str = " has left the chat.";

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    send_line(&mut writer, &join_line(&timestamp(), &args.name)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    let relay_open = run_client_loop(
        &mut reader,
        &mut writer,
        &mut stdin,
        &mut input,
        &args.name,
    )
    .await?;
    if relay_open {
        send_line(&mut writer, &leave_line(&timestamp(), &args.name)).await?;
    }
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

/// Returns whether the relay connection is still usable when the loop ends.
async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    name: &str,
) -> Result<bool> {
    let mut incoming = String::new();
    loop {
        input.clear();
        incoming.clear();
        select! {
            bytes_read = reader.read_line(&mut incoming) => {
                if !handle_relay_line(bytes_read, &incoming).await? {
                    return Ok(false);
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer, name).await? {
                    return Ok(true);
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                return Ok(true);
            }
        }
    }
}

async fn handle_relay_line(bytes_read: io::Result<usize>, line: &str) -> Result<bool> {
    if bytes_read? == 0 {
        write_stderr("*** relay closed the connection").await?;
        return Ok(false);
    }
    write_stdout(line.trim_end_matches(['\r', '\n'])).await?;
    Ok(true)
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
    name: &str,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }
    if text.eq_ignore_ascii_case("/quit") {
        return Ok(false);
    }

    send_line(writer, &chat_line(&timestamp(), name, text)).await?;
    Ok(true)
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn join_line(stamp: &str, name: &str) -> String {
    format!("[{stamp}] {name}{JOIN_MARKER}")
}

fn leave_line(stamp: &str, name: &str) -> String {
    format!("[{stamp}] {name}{LEAVE_MARKER}")
}

fn chat_line(stamp: &str, name: &str, text: &str) -> String {
    format!("[{stamp}] {name}: {text}")
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
