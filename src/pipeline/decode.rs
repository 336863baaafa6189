//! Streaming decoders (Bytes -> JSON Value -> text fragments)
//!
//! Decoders only know about framing formats. What a frame means (which field
//! carries the token, which flag ends the generation) is decided by the
//! adapter through [`map_frames`].

use crate::BoxStream;
use bytes::{Buf, Bytes, BytesMut};
use futures::{stream, StreamExt};
use serde_json::Value;

/// Turns a raw byte stream into a stream of JSON frames.
pub trait Decoder: Send + Sync {
    fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value>;
}

// Frames are cut at the byte level and decoded to UTF-8 only once complete.
fn push_chunk(buf: &mut BytesMut, bytes: &Bytes) {
    buf.extend_from_slice(bytes);
    if buf.contains(&b'\r') {
        // A lone trailing `\r` is kept until its `\n` arrives.
        let mut out = BytesMut::with_capacity(buf.len());
        for (i, &b) in buf.iter().enumerate() {
            if b == b'\r' && buf.get(i + 1) == Some(&b'\n') {
                continue;
            }
            out.extend_from_slice(&[b]);
        }
        *buf = out;
    }
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}

/// Split off the bytes before `idx` and drop the `sep_len`-byte separator.
fn take_frame(buf: &mut BytesMut, idx: usize, sep_len: usize) -> String {
    let frame = buf.split_to(idx);
    buf.advance(sep_len);
    String::from_utf8_lossy(&frame).into_owned()
}

/// SSE decoder:
/// - splits events on a blank line
/// - joins the `data:` lines of an event (a frame with no `data:` line is used as-is)
/// - ignores comment lines and `event:`/`id:`/`retry:` fields
/// - stops on `[DONE]`
pub struct SseDecoder {
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new("[DONE]")
    }
}

impl SseDecoder {
    pub fn new(done_signal: impl Into<String>) -> Self {
        Self {
            done_signal: done_signal.into(),
        }
    }
}

enum SsePayload {
    Json(Value),
    Skip,
    Done,
}

fn parse_sse_frame(frame: &str, done_signal: &str) -> SsePayload {
    let mut data: Vec<&str> = Vec::new();
    let mut saw_field = false;
    for line in frame.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
            saw_field = true;
        } else if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:")
        {
            saw_field = true;
        } else if !saw_field {
            // Bare JSON line from a server that skips the `data:` prefix.
            data.push(line);
        }
    }
    if data.is_empty() {
        return SsePayload::Skip;
    }
    let payload = data.join("\n");
    let payload = payload.trim();
    if payload == done_signal {
        return SsePayload::Done;
    }
    match serde_json::from_str(payload) {
        Ok(v) => SsePayload::Json(v),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable SSE frame");
            SsePayload::Skip
        }
    }
}

impl Decoder for SseDecoder {
    fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
        let done_signal = self.done_signal.clone();

        // Incrementally buffer bytes and emit full frames split by a blank line.
        let stream = stream::unfold(
            Some((input, BytesMut::new())),
            move |state| {
                let done_signal = done_signal.clone();
                async move {
                    let (mut input, mut buf) = state?;
                    loop {
                        if let Some(idx) = find(&buf, b"\n\n") {
                            let frame = take_frame(&mut buf, idx, 2);
                            match parse_sse_frame(&frame, &done_signal) {
                                SsePayload::Json(v) => return Some((Ok(v), Some((input, buf)))),
                                SsePayload::Skip => continue,
                                SsePayload::Done => return None,
                            }
                        }

                        match input.next().await {
                            Some(Ok(bytes)) => push_chunk(&mut buf, &bytes),
                            Some(Err(e)) => return Some((Err(e), None)),
                            None => {
                                // EOF: the last event may lack its trailing blank line.
                                let rest = String::from_utf8_lossy(&buf);
                                return match parse_sse_frame(&rest, &done_signal) {
                                    SsePayload::Json(v) => Some((Ok(v), None)),
                                    SsePayload::Skip | SsePayload::Done => None,
                                };
                            }
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

/// NDJSON / JSONL decoder (one JSON object per line).
pub struct NdjsonDecoder;

fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparseable NDJSON line");
            None
        }
    }
}

impl Decoder for NdjsonDecoder {
    fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
        let stream = stream::unfold(
            Some((input, BytesMut::new())),
            move |state| async move {
                let (mut input, mut buf) = state?;
                loop {
                    if let Some(idx) = find(&buf, b"\n") {
                        let line = take_frame(&mut buf, idx, 1);
                        if let Some(v) = parse_line(&line) {
                            return Some((Ok(v), Some((input, buf))));
                        }
                        continue;
                    }

                    match input.next().await {
                        Some(Ok(bytes)) => push_chunk(&mut buf, &bytes),
                        Some(Err(e)) => return Some((Err(e), None)),
                        None => {
                            return parse_line(&String::from_utf8_lossy(&buf)).map(|v| (Ok(v), None))
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

/// What an adapter makes of one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Skip,
    /// Generation finished; end the sequence.
    Done,
}

/// Map decoded frames to text fragments. Empty text is dropped. The first
/// error ends the sequence after being yielded.
pub fn map_frames<F>(input: BoxStream<'static, Value>, extract: F) -> BoxStream<'static, String>
where
    F: FnMut(&Value) -> Frame + Send + 'static,
{
    let stream = stream::unfold(Some((input, extract)), |state| async move {
        let (mut input, mut extract) = state?;
        loop {
            match input.next().await {
                Some(Ok(v)) => match extract(&v) {
                    Frame::Text(t) if !t.is_empty() => {
                        return Some((Ok(t), Some((input, extract))))
                    }
                    Frame::Text(_) | Frame::Skip => continue,
                    Frame::Done => return None,
                },
                Some(Err(e)) => return Some((Err(e), None)),
                None => return None,
            }
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, ErrorContext};
    use futures::TryStreamExt;
    use serde_json::json;

    fn bytes_stream(chunks: Vec<&'static str>) -> BoxStream<'static, Bytes> {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn test_sse_frames_split_across_chunks() {
        let input = bytes_stream(vec![
            "data: {\"token\": \"Hel\"}\n",
            "\ndata: {\"tok",
            "en\": \"lo\"}\r\n\r\n",
            ": keep-alive\n\n",
            "data: [DONE]\n\n",
            "data: {\"token\": \"ignored\"}\n\n",
        ]);
        let values: Vec<Value> = SseDecoder::default()
            .decode_stream(input)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(values, vec![json!({"token": "Hel"}), json!({"token": "lo"})]);
    }

    #[tokio::test]
    async fn test_sse_event_field_and_trailing_frame() {
        let input = bytes_stream(vec![
            "event: message\ndata: {\"token\": \"a\"}\n\n",
            "data: not json\n\n",
            "data: {\"token\": \"b\"}",
        ]);
        let values: Vec<Value> = SseDecoder::default()
            .decode_stream(input)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(values, vec![json!({"token": "a"}), json!({"token": "b"})]);
    }

    #[tokio::test]
    async fn test_ndjson_lines() {
        let input = bytes_stream(vec![
            "{\"response\":\"a\",\"done\":false}\n{\"resp",
            "onse\":\"b\",\"done\":false}\n\ngarbage\n",
            "{\"response\":\"\",\"done\":true}",
        ]);
        let values: Vec<Value> = NdjsonDecoder.decode_stream(input).try_collect().await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[1]["response"], "b");
        assert_eq!(values[2]["done"], true);
    }

    fn split_bytes(text: &'static str, at: usize) -> BoxStream<'static, Bytes> {
        let raw = text.as_bytes();
        Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(&raw[..at])),
            Ok(Bytes::from_static(&raw[at..])),
        ]))
    }

    #[tokio::test]
    async fn test_ndjson_keeps_character_split_across_chunks() {
        let text = "{\"response\":\"caf\u{e9}\",\"done\":false}\n";
        // Cut between the two bytes of the accented character.
        let at = text.find('\u{e9}').unwrap() + 1;
        let values: Vec<Value> = NdjsonDecoder
            .decode_stream(split_bytes(text, at))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(values[0]["response"], "caf\u{e9}");
    }

    #[tokio::test]
    async fn test_sse_keeps_character_split_across_chunks() {
        let text = "data: {\"token\": \"\u{4f60}\u{597d}\"}\r\n\r\ndata: [DONE]\n\n";
        let at = text.find('\u{597d}').unwrap() + 2;
        let values: Vec<Value> = SseDecoder::default()
            .decode_stream(split_bytes(text, at))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(values, vec![json!({"token": "\u{4f60}\u{597d}"})]);
    }

    #[tokio::test]
    async fn test_map_frames_stops_on_done_and_drops_empty() {
        let frames: BoxStream<'static, Value> = Box::pin(stream::iter(vec![
            Ok(json!({"t": "x"})),
            Ok(json!({"t": ""})),
            Ok(json!({"other": 1})),
            Ok(json!({"t": "y"})),
            Ok(json!({"done": true})),
            Ok(json!({"t": "z"})),
        ]));
        let out: Vec<String> = map_frames(frames, |v| {
            if v["done"] == true {
                Frame::Done
            } else if let Some(t) = v["t"].as_str() {
                Frame::Text(t.to_string())
            } else {
                Frame::Skip
            }
        })
        .try_collect()
        .await
        .unwrap();
        assert_eq!(out, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_error_ends_sequence() {
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"{\"t\":\"a\"}\n")),
            Err(Error::transport("connection reset", ErrorContext::new())),
            Ok(Bytes::from_static(b"{\"t\":\"b\"}\n")),
        ]));
        let items: Vec<_> = NdjsonDecoder.decode_stream(input).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().kind(), crate::ErrorKind::Transport);
    }
}
