//! SSE framing for the runtime's HTTP stream.
//!
//! Chunks are buffered, split on blank lines, and each complete frame is
//! turned into a [`RawEnvelope::Sse`] carrying its `event:` name and the
//! joined `data:` lines.  Interpretation is left to the normalizer.

use sb_domain::error::{Error, Result};
use sb_domain::normalize::RawEnvelope;

use crate::traits::EnvelopeStream;

/// Drain complete SSE frames from `buffer`.
///
/// Consumed bytes are removed; a trailing partial frame stays for the next
/// call.  Comment-only frames (`: keep-alive`) yield nothing.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<RawEnvelope> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut frames = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let mut event: Option<String> = None;
        let mut data: Vec<&str> = Vec::new();
        for line in block.lines() {
            if let Some(name) = line.strip_prefix("event:") {
                event = Some(name.trim().to_owned());
            } else if let Some(d) = line.strip_prefix("data:") {
                data.push(d.strip_prefix(' ').unwrap_or(d));
            }
        }

        if event.is_none() && data.is_empty() {
            continue;
        }
        frames.push(RawEnvelope::Sse {
            event,
            data: data.join("\n"),
        });
    }
    frames
}

/// Append a network chunk to `buffer`, decoding only complete UTF-8
/// sequences.  A multi-byte character cut by the chunk boundary waits in
/// `pending` for the rest of its bytes.
pub(crate) fn push_chunk(pending: &mut Vec<u8>, buffer: &mut String, chunk: &[u8]) {
    pending.extend_from_slice(chunk);
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                buffer.push_str(text);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                buffer.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    // Truncated sequence at the end: keep it for the next chunk.
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                    // Invalid bytes mid-stream: replace them and continue.
                    Some(len) => {
                        buffer.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                }
            }
        }
    }
}

/// Build an [`EnvelopeStream`] from a streaming `reqwest::Response`.
pub(crate) fn sse_envelope_stream(response: reqwest::Response) -> EnvelopeStream {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut pending: Vec<u8> = Vec::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    push_chunk(&mut pending, &mut buffer, &bytes);
                    for frame in drain_frames(&mut buffer) {
                        yield Ok(frame);
                    }
                }
                Ok(None) => {
                    // Body closed: flush a final frame missing its blank line.
                    if !pending.is_empty() {
                        buffer.push_str(&String::from_utf8_lossy(&pending));
                        pending.clear();
                    }
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for frame in drain_frames(&mut buffer) {
                            yield Ok(frame);
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

/// Map a [`reqwest::Error`] to the domain error: timeouts stay timeouts.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
