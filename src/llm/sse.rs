//! Server-sent event framing for streaming completions.

use futures::{Stream, StreamExt};

use crate::error::{GatewayError, Result};

/// Split an SSE byte stream into the payloads of its `data:` lines.
///
/// Frames are delimited by a blank line. `[DONE]` sentinels are passed
/// through so callers can stop early.
pub fn data_lines<S, B>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();

        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(GatewayError::from)?;
            buf.extend_from_slice(chunk.as_ref());

            while let Some(pos) = find_frame_end(&buf) {
                let frame = buf.drain(..pos.end).collect::<Vec<_>>();
                let text = String::from_utf8_lossy(&frame[..pos.start]);

                for line in text.lines() {
                    let line = line.trim();
                    if let Some(data) = line.strip_prefix("data:") {
                        yield data.trim().to_string();
                    }
                }
            }
        }

        // Trailing frame without the final blank line.
        let text = String::from_utf8_lossy(&buf);
        for line in text.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                yield data.trim().to_string();
            }
        }
    }
}

/// Locate the first blank-line frame delimiter (`\n\n` or `\r\n\r\n`).
fn find_frame_end(buf: &[u8]) -> Option<std::ops::Range<usize>> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p..p + 2);
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p..p + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = std::result::Result<&'static [u8], reqwest::Error>> + Send + 'static {
        let owned: Vec<std::result::Result<&'static [u8], reqwest::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes())).collect();
        futures::stream::iter(owned)
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let stream = data_lines(chunks(&[
            "data: {\"a\":1}\n",
            "\ndata: {\"a\":2}\n\n",
            "data: [DONE]\n\n",
        ]));
        let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"a\":2}", "[DONE]"]);
    }

    #[tokio::test]
    async fn test_ignores_event_lines_and_handles_crlf() {
        let stream = data_lines(chunks(&[
            "event: content_block_delta\r\ndata: {\"x\":true}\r\n\r\n",
            ": keep-alive\n\n",
        ]));
        let lines: Vec<String> = stream.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines, vec!["{\"x\":true}"]);
    }

    #[test]
    fn test_find_frame_end() {
        assert_eq!(find_frame_end(b"abc\n\ndef"), Some(3..5));
        assert_eq!(find_frame_end(b"abc\r\n\r\n"), Some(3..7));
        assert_eq!(find_frame_end(b"abc\n"), None);
    }
}
