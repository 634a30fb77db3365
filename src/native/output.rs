use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::constants::OUTPUT_TOO_LARGE;

#[derive(Debug, Default)]
pub struct CapturedOutput {
    pub bytes: Vec<u8>,
    pub overflowed: bool,
}

/// Reads `reader` to the end. Past `limit` bytes the data is drained and
/// dropped so the writer never blocks on a full pipe.
pub async fn capture<R>(mut reader: R, limit: usize) -> std::io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut output = CapturedOutput::default();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if output.overflowed || output.bytes.len() + n > limit {
            output.overflowed = true;
            continue;
        }
        output.bytes.extend_from_slice(&buf[..n]);
    }

    Ok(output)
}

/// Writes the newline-terminated input and closes the stream.
pub async fn feed<W>(mut writer: W, mut input: String)
where
    W: AsyncWrite + Unpin,
{
    if !input.ends_with('\n') {
        input.push('\n');
    }

    if let Err(e) = writer.write_all(input.as_bytes()).await {
        // the program is free to exit without reading its input
        tracing::debug!("Stdin closed early: {}", e);
        return;
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Failed to close stdin: {}", e);
    }
}

/// Waits up to `grace` for a capture task that should be finishing because
/// the process is gone.
pub async fn collect(
    handle: Option<JoinHandle<std::io::Result<CapturedOutput>>>,
    grace: Duration,
    stream: &str,
) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    let abort = handle.abort_handle();

    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(Ok(output))) if !output.overflowed => {
            String::from_utf8_lossy(&output.bytes).into_owned()
        }
        Ok(Ok(Ok(_))) => {
            tracing::debug!(stream, "Output exceeded the capture limit");
            OUTPUT_TOO_LARGE.to_string()
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(stream, "Failed to read output: {}", e);
            String::new()
        }
        Ok(Err(e)) => {
            tracing::warn!(stream, "Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            abort.abort();
            tracing::warn!(stream, "Output was not drained within the grace period");
            OUTPUT_TOO_LARGE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_within_limit() {
        let output = capture(&b"hello\nworld\n"[..], 1024).await.unwrap();
        assert_eq!(output.bytes, b"hello\nworld\n");
        assert!(!output.overflowed);
    }

    #[tokio::test]
    async fn test_capture_overflow_keeps_draining() {
        let data = vec![b'x'; 100_000];
        let output = capture(&data[..], 10_000).await.unwrap();
        assert!(output.overflowed);
        assert!(output.bytes.len() <= 10_000);
    }

    #[tokio::test]
    async fn test_feed_appends_newline() {
        let (client, mut server) = tokio::io::duplex(64);
        feed(client, "42".to_string()).await;

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "42\n");
    }

    #[tokio::test]
    async fn test_collect_returns_sentinel_when_reader_hangs() {
        let (_writer, reader) = tokio::io::duplex(64);
        let handle = tokio::spawn(capture(reader, 1024));

        let text = collect(Some(handle), Duration::from_millis(20), "stdout").await;
        assert_eq!(text, OUTPUT_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_collect_returns_sentinel_on_overflow() {
        let data = vec![b'x'; 4096];
        let handle = tokio::spawn(async move { capture(&data[..], 16).await });

        let text = collect(Some(handle), Duration::from_secs(1), "stdout").await;
        assert_eq!(text, OUTPUT_TOO_LARGE);
    }
}
