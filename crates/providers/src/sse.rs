//! Shared SSE streaming infrastructure for both backend adapters.
//!
//! Both adapters follow the same pattern: receive a `reqwest::Response`,
//! buffer chunks, split on `\n\n`, and feed each event to an
//! adapter-specific parser. Chat-completions streams only carry `data:`
//! payloads; the hosted-assistant stream also names events with an
//! `event:` line, so the drain keeps both.

use relay_domain::error::Result;
use relay_domain::stream::BoxStream;

use crate::util::from_reqwest;

/// One parsed SSE event block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// The `event:` field, when the stream names its events.
    pub event: Option<String>,
    /// The `data:` payload (multiple data lines joined with `\n`).
    pub data: String,
}

/// Extract complete event blocks from an SSE buffer.
///
/// Events are delimited by `\n\n`. The buffer is drained in place:
/// consumed bytes are removed and any trailing partial event remains
/// for the next call. Blocks without a data payload are skipped.
pub(crate) fn drain_events(buffer: &mut String) -> Vec<SseEvent> {
    let mut events = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

        let mut event_name: Option<String> = None;
        let mut data_lines: Vec<&str> = Vec::new();
        for line in block.lines() {
            let line = line.trim();
            if let Some(name) = line.strip_prefix("event:") {
                event_name = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data);
                }
            }
        }

        if !data_lines.is_empty() {
            events.push(SseEvent {
                event: event_name,
                data: data_lines.join("\n"),
            });
        }
    }

    events
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and an
/// adapter-specific parser closure.
///
/// The closure receives each event block and returns zero or more
/// parsed items. It is `FnMut` because adapters keep mutable state
/// across calls (tool-call assembly, run-id capture). The remaining
/// buffer is flushed as a final block when the body closes.
pub(crate) fn sse_stream<T, F>(
    response: reqwest::Response,
    mut parse_event: F,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnMut(&SseEvent) -> Vec<Result<T>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for event in drain_events(&mut buffer) {
                        for item in parse_event(&event) {
                            yield item;
                        }
                    }
                }
                Ok(None) => {
                    // Stream ended -- flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for event in drain_events(&mut buffer) {
                            for item in parse_event(&event) {
                                yield item;
                            }
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"hello\":\"world\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "first");
        assert!(events[0].event.is_none());
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "complete");
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_empty_buffer() {
        let mut buf = String::new();
        assert!(drain_events(&mut buf).is_empty());
    }

    #[test]
    fn drain_skips_blocks_without_data() {
        let mut buf = String::from("event: ping\n\ndata: payload\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "payload");
    }

    #[test]
    fn drain_ignores_id_and_retry_lines() {
        let mut buf = String::from("event: step\nid: 42\nretry: 5000\ndata: payload\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events[0].event.as_deref(), Some("step"));
        assert_eq!(events[0].data, "payload");
    }

    #[test]
    fn drain_done_sentinel_preserved() {
        let mut buf = String::from("data: [DONE]\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events[0].data, "[DONE]");
    }

    #[test]
    fn drain_joins_multiple_data_lines() {
        let mut buf = String::from("data: line1\ndata: line2\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_events(&mut buf).is_empty());
        assert_eq!(buf, "data: chunk1");

        buf.push_str("\n\ndata: chunk2\n\n");
        let events = drain_events(&mut buf);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "chunk1");
        assert_eq!(events[1].data, "chunk2");
    }
}
