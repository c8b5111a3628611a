//! Server-sent events decoding for streamed completions.
//!
//! [`SseDecoder`] buffers raw bytes until a full line is available, so
//! multi-byte characters split across network chunks decode intact.
//! [`fragment_stream`] turns an HTTP response into a stream of text
//! fragments using a provider-specific payload parser.

use std::collections::VecDeque;

use futures_util::stream::{BoxStream, StreamExt};

use rca_harness_core::error::ProviderError;

use super::FragmentStream;
use crate::provider::transport_error;

/// Incremental `text/event-stream` parser yielding each event's data.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the data of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.line(rest.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<String> {
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
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(data)
    }
}

/// What a provider parser made of one event's data.
pub enum SseData {
    Text(String),
    Skip,
    Done,
}

struct StreamState<F> {
    bytes: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    decoder: SseDecoder,
    queue: VecDeque<String>,
    finished: bool,
    parse: F,
}

/// Stream the text fragments of an SSE response.
///
/// The stream ends on [`SseData::Done`] or end of body. A transport or
/// parse error is yielded once, then the stream ends.
pub fn fragment_stream<F>(response: reqwest::Response, parse: F) -> FragmentStream
where
    F: Fn(&str) -> Result<SseData, ProviderError> + Send + 'static,
{
    let state = StreamState {
        bytes: response.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        finished: false,
        parse,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(data) = st.queue.pop_front() {
                match (st.parse)(&data) {
                    Ok(SseData::Text(text)) if !text.is_empty() => return Some((Ok(text), st)),
                    Ok(SseData::Text(_)) | Ok(SseData::Skip) => continue,
                    Ok(SseData::Done) => return None,
                    Err(e) => {
                        st.finished = true;
                        st.queue.clear();
                        return Some((Err(e), st));
                    }
                }
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(&chunk);
                    st.queue.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(transport_error(e)), st));
                }
                None => {
                    st.finished = true;
                    if let Some(event) = st.decoder.finish() {
                        st.queue.push_back(event);
                    }
                }
            }
        }
    })
    .boxed()
}
