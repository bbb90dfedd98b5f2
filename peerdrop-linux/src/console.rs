//! Terminal surface: stdin commands in, session events out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use peerdrop_core::{
    Artifact, ConnectionStatus, FileId, ReceivedFile, SessionEvent, SessionHandle, Severity,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    SendFile(&'a str),
    Text(&'a str),
    Foreground,
    Quit,
    Help,
}

pub fn parse_line(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if let Some(path) = trimmed.strip_prefix("/send ") {
        return Input::SendFile(path.trim());
    }
    match trimmed {
        "/quit" | "/exit" => Input::Quit,
        "/fg" => Input::Foreground,
        "/help" => Input::Help,
        _ => Input::Text(line),
    }
}

/// Read commands from stdin until `/quit` or end of input.
pub async fn run_console(handle: SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Input::SendFile(path) => match read_artifact(Path::new(path)).await {
                Ok(artifact) => {
                    let name = artifact.name.clone();
                    match handle.send_file(artifact).await {
                        Ok(file_id) => info!(%file_id, %name, "file queued"),
                        Err(e) => println!("! cannot send {name}: {e}"),
                    }
                }
                Err(e) => println!("! {e:#}"),
            },
            Input::Text(text) => {
                if let Err(e) = handle.send_text(text).await {
                    println!("! {e}");
                }
            }
            Input::Foreground => handle.foreground()?,
            Input::Help => print_help(),
            Input::Quit => {
                handle.disconnect()?;
                break;
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("/send <path>  send a file");
    println!("/fg           probe the peer now");
    println!("/quit         disconnect and exit");
    println!("anything else is sent as text");
}

async fn read_artifact(path: &Path) -> anyhow::Result<Artifact> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    Ok(Artifact::new(name, content_type_for(path), bytes))
}

/// Declared content type from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Print events and save received files. Returns when the session ends.
pub async fn render_events(mut rx: mpsc::UnboundedReceiver<SessionEvent>, download_dir: PathBuf) {
    let mut shown: HashMap<FileId, u32> = HashMap::new();
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::StatusChanged(ConnectionStatus::Connected { role }) => {
                println!("* connected ({role:?}); type /help for commands");
            }
            SessionEvent::StatusChanged(ConnectionStatus::Disconnected { reason }) => {
                println!("* session ended: {reason}");
                return;
            }
            SessionEvent::Progress {
                file_id, percent, ..
            } => {
                // one line per 10%
                let step = (percent / 10.0).floor() as u32;
                let last = shown.entry(file_id.clone()).or_insert(0);
                if step > *last {
                    *last = step;
                    println!("  {file_id}: {percent:.0}%");
                }
            }
            SessionEvent::SendStarted { name, size, .. } => println!("> sending {name} ({size} bytes)"),
            SessionEvent::FileSent { file_id, name, sha256 } => {
                shown.remove(&file_id);
                println!("> sent {name} sha256={sha256}");
            }
            SessionEvent::ReceiveStarted { name, size, .. } => {
                println!("< receiving {name} ({size} bytes)")
            }
            SessionEvent::FileReceived(file) => {
                shown.remove(&file.file_id);
                match save_received(&download_dir, &file).await {
                    Ok(path) => println!("< saved {} sha256={}", path.display(), file.sha256),
                    Err(e) => {
                        warn!(error = %e, "saving received file failed");
                        println!("! could not save {}: {e:#}", file.name);
                    }
                }
            }
            SessionEvent::TransferTimedOut { file_id, .. } => {
                shown.remove(&file_id);
            }
            SessionEvent::TransferFailed { file_id, .. } => {
                shown.remove(&file_id);
            }
            SessionEvent::TextReceived { content, .. } => println!("peer: {content}"),
            SessionEvent::Notice { severity, message } => match severity {
                Severity::Info => println!("* {message}"),
                Severity::Error => println!("! {message}"),
            },
        }
    }
}

/// Write into `dir` under the declared name, never overwriting an existing file.
async fn save_received(dir: &Path, file: &ReceivedFile) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("cannot create {}", dir.display()))?;
    let path = unique_path(dir, &file.name, |p| p.exists());
    tokio::fs::write(&path, &file.bytes)
        .await
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}

/// Strip any directory part of a peer-supplied name and pick the first free `name (n).ext`.
fn unique_path(dir: &Path, declared: &str, exists: impl Fn(&Path) -> bool) -> PathBuf {
    let base = Path::new(declared)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "download".to_owned());
    let candidate = dir.join(&base);
    if !exists(&candidate) {
        return candidate;
    }
    let stem = Path::new(&base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.clone());
    let ext = Path::new(&base)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| !exists(p))
        .unwrap_or(candidate)
}
