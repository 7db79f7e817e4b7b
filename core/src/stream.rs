//! Pull-based text streams over a response body.
//!
//! Nothing is sent until the first item is pulled. Each pull reads one body
//! chunk. A failure is yielded once as `Err` and ends the stream.

use std::collections::VecDeque;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::error::ApiError;
use crate::http::ByteStream;

/// Decoded text chunks; ends after the first `Err`.
pub type TextStream = BoxStream<'static, Result<String, ApiError>>;

enum ChunkState {
    Opening(BoxFuture<'static, Result<ByteStream, ApiError>>),
    Reading { body: ByteStream, decoder: Utf8Decoder },
    Done,
}

/// Decode a body lazily opened by `open` into UTF-8 text chunks.
pub(crate) fn text_chunks(open: BoxFuture<'static, Result<ByteStream, ApiError>>) -> TextStream {
    stream::unfold(ChunkState::Opening(open), |state| async move {
        let (mut body, mut decoder) = match state {
            ChunkState::Done => return None,
            ChunkState::Opening(open) => match open.await {
                Ok(body) => (body, Utf8Decoder::default()),
                Err(err) => return Some((Err(err), ChunkState::Done)),
            },
            ChunkState::Reading { body, decoder } => (body, decoder),
        };

        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    let text = decoder.decode(&chunk);
                    if text.is_empty() {
                        continue;
                    }
                    return Some((Ok(text), ChunkState::Reading { body, decoder }));
                }
                Some(Err(err)) => return Some((Err(ApiError::from(err)), ChunkState::Done)),
                None => {
                    let rest = decoder.finish();
                    if rest.is_empty() {
                        return None;
                    }
                    return Some((Ok(rest), ChunkState::Done));
                }
            }
        }
    })
    .boxed()
}

struct LineState {
    chunks: TextStream,
    partial: String,
    ready: VecDeque<String>,
    finished: bool,
}

/// Re-split text chunks on `\n`. Blank lines are skipped; a trailing line
/// without a newline is still emitted.
pub(crate) fn split_lines(chunks: TextStream) -> TextStream {
    let state = LineState {
        chunks,
        partial: String::new(),
        ready: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(text)) => {
                    state.partial.push_str(&text);
                    while let Some(end) = state.partial.find('\n') {
                        let line: String = state.partial.drain(..=end).collect();
                        push_line(&mut state.ready, &line);
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.partial);
                    push_line(&mut state.ready, &rest);
                }
            }
        }
    })
    .boxed()
}

fn push_line(ready: &mut VecDeque<String>, raw: &str) {
    let line = raw.trim_end_matches(['\n', '\r']);
    if !line.trim().is_empty() {
        ready.push_back(line.to_string());
    }
}

/// Incremental UTF-8 decoding; a multi-byte sequence split across chunks is
/// held back until its remaining bytes arrive.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Invalid bytes become U+FFFD; only an incomplete sequence at the very
    /// end is held back.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::new();
        let mut start = 0;
        while start < self.pending.len() {
            let rest = &self.pending[start..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                }
                Err(e) => {
                    text.push_str(&String::from_utf8_lossy(&rest[..e.valid_up_to()]));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start += e.valid_up_to() + len;
                        }
                        None => {
                            start += e.valid_up_to();
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::FutureExt;

    use super::*;
    use crate::error::FetchError;

    fn body(chunks: Vec<Result<Bytes, FetchError>>) -> BoxFuture<'static, Result<ByteStream, ApiError>> {
        async move { Ok(stream::iter(chunks).boxed()) }.boxed()
    }

    fn ok(text: &'static [u8]) -> Result<Bytes, FetchError> {
        Ok(Bytes::from_static(text))
    }

    #[tokio::test]
    async fn yields_each_chunk_in_order() {
        let items: Vec<_> = text_chunks(body(vec![ok(b"a"), ok(b"b"), ok(b"c")])).collect().await;
        assert_eq!(
            items,
            vec![Ok("a".to_string()), Ok("b".to_string()), Ok("c".to_string())]
        );
    }

    #[tokio::test]
    async fn joins_split_multibyte_characters() {
        // "é" is 0xC3 0xA9
        let items: Vec<_> = text_chunks(body(vec![ok(b"caf\xC3"), ok(b"\xA9!")])).collect().await;
        assert_eq!(items, vec![Ok("caf".to_string()), Ok("\u{e9}!".to_string())]);
    }

    #[tokio::test]
    async fn invalid_byte_does_not_swallow_a_split_character() {
        // 0xFF is never valid; "é" (0xC3 0xA9) straddles the chunks
        let items: Vec<_> = text_chunks(body(vec![ok(b"a\xFFb\xC3"), ok(b"\xA9")])).collect().await;
        assert_eq!(
            items,
            vec![Ok("a\u{fffd}b".to_string()), Ok("\u{e9}".to_string())]
        );
    }

    #[tokio::test]
    async fn open_failure_is_the_only_item() {
        let open = async { Err(ApiError::unexpected(503)) }.boxed();
        let items: Vec<_> = text_chunks(open).collect().await;
        assert_eq!(items, vec![Err(ApiError::unexpected(503))]);
    }

    #[tokio::test]
    async fn body_failure_ends_the_stream() {
        let chunks = vec![
            ok(b"a"),
            Err(FetchError::Body("reset".to_string())),
            ok(b"never"),
        ];
        let items: Vec<_> = text_chunks(body(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("a".to_string()));
        assert_eq!(items[1].as_ref().unwrap_err().error_id, "fetch_failed");
    }

    #[tokio::test]
    async fn nothing_opens_until_polled() {
        let opened = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = opened.clone();
        let open = async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(stream::iter(Vec::<Result<Bytes, FetchError>>::new()).boxed())
        }
        .boxed();

        let mut chunks = text_chunks(open);
        assert!(!opened.load(std::sync::atomic::Ordering::SeqCst));
        assert!(chunks.next().await.is_none());
        assert!(opened.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn lines_are_rebuilt_across_chunks() {
        let chunks = text_chunks(body(vec![ok(b"{\"n\":1}\n{\"n\""), ok(b":2}\r\n\n{\"n\":3}")]));
        let lines: Vec<_> = split_lines(chunks).collect().await;
        assert_eq!(
            lines,
            vec![
                Ok(r#"{"n":1}"#.to_string()),
                Ok(r#"{"n":2}"#.to_string()),
                Ok(r#"{"n":3}"#.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn lines_stop_after_error() {
        let chunks = text_chunks(body(vec![
            ok(b"one\ntw"),
            Err(FetchError::Body("reset".to_string())),
        ]));
        let lines: Vec<_> = split_lines(chunks).collect().await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], Ok("one".to_string()));
        assert!(lines[1].is_err());
    }
}
