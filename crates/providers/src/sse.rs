//! Shared SSE decoding for HTTP provider adapters.
//!
//! The wire pattern is the same everywhere: buffer response chunks,
//! split on `\n\n`, pull `data:` payloads, and hand each payload to a
//! provider-specific parser.

use sy_domain::error::{Error, Result};
use sy_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// The buffer is drained in place; a trailing partial event stays for
/// the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a parser
/// closure. `FnMut` because parsers keep assembly state across chunks
/// (tool-call argument buffers).
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    provider_id: String,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed; flush any trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    // Mid-stream transport failures are worth retrying.
                    yield Err(Error::Provider {
                        provider: provider_id.clone(),
                        message: e.to_string(),
                        retryable: true,
                        retry_after: None,
                    });
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_complete_events_only() {
        let mut buffer = "data: one\n\ndata: two\n\ndata: par".to_string();
        let lines = drain_data_lines(&mut buffer);
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(buffer, "data: par");
    }

    #[test]
    fn ignores_non_data_lines() {
        let mut buffer = "event: ping\nid: 7\ndata: payload\n\n".to_string();
        let lines = drain_data_lines(&mut buffer);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn multiple_data_lines_in_one_block() {
        let mut buffer = "data: a\ndata: b\n\n".to_string();
        let lines = drain_data_lines(&mut buffer);
        assert_eq!(lines, vec!["a", "b"]);
    }
}
