use std::collections::VecDeque;

use futures::{Stream, StreamExt, stream};
use tracing::{trace, warn};

use super::{EventStream, SseEvent, TransportError};

/// Incremental `text/event-stream` parser
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly. Handles `event:`
/// and (multi-line) `data:` fields; `id:`, `retry:` and comment lines are
/// ignored.
///
/// # Examples
///
/// ```
/// use crosstalk_core::transport::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.push(b"event: ping\nda")?.is_empty());
/// let events = decoder.push(b"ta: {}\n\n")?;
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].event.as_deref(), Some("ping"));
/// assert_eq!(events[0].data, "{}");
/// # Ok::<(), crosstalk_core::transport::TransportError>(())
/// ```
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

/// Largest event (or unterminated line) a decoder will hold
pub const MAX_BUF: usize = 16 * 1024 * 1024;

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_BUF)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    /// Feeds a chunk and returns every event it completed
    ///
    /// Fails once the event being assembled grows past the decoder's limit.
    /// The partial event is discarded; the decoder should not be fed again.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, TransportError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        let held = self.buffer.len() + self.data_len;
        if held > self.limit {
            warn!(held, limit = self.limit, "SSE event exceeds the buffer limit");
            self.buffer = Vec::new();
            self.data = Vec::new();
            self.data_len = 0;
            return Err(TransportError::Protocol(format!(
                "event exceeds {} bytes",
                self.limit
            )));
        }
        Ok(events)
    }

    /// Flushes a trailing event the server did not terminate with a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len();
                self.data.push(value.to_string());
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        self.data_len = 0;
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        trace!(event = ?event.event, data = %event.data, "SSE event");
        Some(event)
    }
}

/// Turns a stream of byte chunks into a stream of SSE events
///
/// A transport error ends the stream after it is yielded.
pub fn decode_stream<S, B>(chunks: S) -> EventStream
where
    S: Stream<Item = Result<B, TransportError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (Box::pin(chunks), SseDecoder::new(), VecDeque::new(), false);
    Box::pin(stream::unfold(
        state,
        |(mut chunks, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (chunks, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match chunks.next().await {
                    Some(Ok(chunk)) => match decoder.push(chunk.as_ref()) {
                        Ok(events) => pending.extend(events),
                        Err(e) => return Some((Err(e), (chunks, decoder, pending, true))),
                    },
                    Some(Err(e)) => {
                        return Some((Err(e), (chunks, decoder, pending, true)));
                    }
                    None => {
                        done = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_data_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line one\r\ndata: line two\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_comments_and_unknown_fields_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nid: 7\nretry: 10\n\ndata:x\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "data: héllo 🌍\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for byte in text {
            events.extend(decoder.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "héllo 🌍");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").unwrap().is_empty());
        assert_eq!(decoder.finish().map(|e| e.data), Some("[DONE]".to_string()));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_decode_stream_stops_after_error() {
        let chunks = stream::iter(vec![
            Ok::<_, TransportError>("data: a\n\ndata: b".to_string()),
            Err(TransportError::Network("reset".into())),
            Ok("\n\n".to_string()),
        ]);
        let items: Vec<_> = decode_stream(chunks).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().data, "a");
        assert!(matches!(items[1], Err(TransportError::Network(_))));
    }

    #[test]
    fn test_oversized_event_is_rejected() {
        let mut decoder = SseDecoder::with_limit(64);
        assert_eq!(decoder.push(b"data: small\n\n").unwrap().len(), 1);

        // Many short data lines add up without ever ending the event
        let line = b"data: 0123456789\n";
        let mut result = Ok(Vec::new());
        for _ in 0..8 {
            result = decoder.push(line);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(TransportError::Protocol(_))));

        // A single line with no newline at all
        let mut decoder = SseDecoder::with_limit(64);
        assert!(decoder.push(&[b'x'; 65]).is_err());
    }

    #[tokio::test]
    async fn test_decode_stream_ends_on_oversized_line() {
        let big = format!("data: {}", "x".repeat(MAX_BUF));
        let chunks = stream::iter(vec![
            Ok::<_, TransportError>("data: first\n\n".to_string()),
            Ok(big),
            Ok("\n\ndata: never\n\n".to_string()),
        ]);
        let items: Vec<_> = decode_stream(chunks).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().data, "first");
        assert!(matches!(items[1], Err(TransportError::Protocol(_))));
    }
}
