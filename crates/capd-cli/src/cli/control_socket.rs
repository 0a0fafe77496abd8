//! Control socket: server (during `capd run`) and client (`capd cancel`,
//! `capd refresh`, `capd enqueue`).
//! Protocol: one line per request: "cancel <download-id>", "refresh" or
//! "enqueue <feed item JSON>".

use anyhow::Result;
use capd_core::dispatch::FeedItem;
use capd_core::orchestrator::{enqueue_line, ControlHandle, ControlRequest};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

/// Spawns a task that listens on `path` and forwards every well-formed line
/// to the orchestrator. Malformed lines are logged and ignored.
pub fn spawn_control_listener(
    control: ControlHandle,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let handle = tokio::spawn(async move {
        let _ = std::fs::remove_file(&path);
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {}", e);
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let control = control.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            match ControlRequest::parse_line(&line) {
                                Ok(request) => {
                                    if control.send(request).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => tracing::debug!("control socket: {}", e),
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends "cancel <id>\n". No-op if the socket does not exist.
pub async fn send_cancel(socket_path: &Path, download_id: &str) -> Result<()> {
    send_line(socket_path, &format!("cancel {}\n", download_id)).await
}

/// Sends "refresh\n". No-op if the socket does not exist.
pub async fn send_refresh(socket_path: &Path) -> Result<()> {
    send_line(socket_path, "refresh\n").await
}

/// Hands `item` to a running daemon. Returns false when no daemon is
/// listening (socket missing or stale), so the caller can fall back to the
/// store.
pub async fn send_enqueue(socket_path: &Path, item: &FeedItem) -> Result<bool> {
    let line = enqueue_line(item)?;
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = match tokio::net::UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "control socket connect: {}", e);
            return Ok(false);
        }
    };
    stream.write_all(line.as_bytes()).await?;
    Ok(true)
}

async fn send_line(socket_path: &Path, line: &str) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    stream.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn requests_reach_the_orchestrator_queue() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("control.sock");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = spawn_control_listener(ControlHandle::new(tx), &path).unwrap();

        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        send_line(&path, "bogus\ncancel UC1-v1-17\nrefresh\n").await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first, Some(ControlRequest::Cancel("UC1-v1-17".to_string())));
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(second, Some(ControlRequest::Refresh));
    }

    #[tokio::test]
    async fn enqueue_reaches_the_orchestrator_as_ingest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("control.sock");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = spawn_control_listener(ControlHandle::new(tx), &path).unwrap();
        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let item = FeedItem {
            channel_id: "UC-a".to_string(),
            video_id: "b-c".to_string(),
            title: "Stream".to_string(),
            link: "https://www.youtube.com/watch?v=b-c".to_string(),
            uploaded: None,
            username: None,
            channel_name: None,
        };
        assert!(send_enqueue(&path, &item).await.unwrap());

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got, Some(ControlRequest::Ingest(vec![item])));
    }

    #[tokio::test]
    async fn missing_socket_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let absent = tmp.path().join("absent.sock");
        send_refresh(&absent).await.unwrap();
        let item = FeedItem {
            channel_id: "UC1".to_string(),
            video_id: "v1".to_string(),
            title: "t".to_string(),
            link: "https://www.youtube.com/watch?v=v1".to_string(),
            uploaded: None,
            username: None,
            channel_name: None,
        };
        assert!(!send_enqueue(&absent, &item).await.unwrap());
    }
}
