//! Incremental decoder for the newline-delimited analysis stream.
//!
//! Chunk boundaries carry no meaning: a record may arrive split across any
//! number of chunks, and one chunk may carry several records. The decoder
//! keeps the unterminated tail in a carry-over buffer and emits a frame per
//! complete line. Buffering is done on raw bytes so a chunk ending in the
//! middle of a multi-byte character still decodes cleanly once the rest
//! arrives.
//!
//! Malformed or unrecognized lines are skipped, not fatal. The stream format
//! is forward-compatible and the service may interleave record types this
//! client does not know about.

use crate::analysis::types::AnalysisJobResult;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Upper bound on buffered stream data awaiting a newline.
pub const MAX_STREAM_BUFFER_SIZE: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stream buffer exceeded {limit} bytes")]
    BufferExceeded { limit: usize },
}

/// One decoded unit of the result protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Percentage as sent on the wire. Range and monotonicity are enforced
    /// by the reducer, not here.
    Progress(i64),
    Complete(AnalysisJobResult),
    /// Service-reported failure, carried by the fallback envelope.
    Failed(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireRecord {
    Progress { progress: i64 },
    Complete { data: AnalysisJobResult },
}

/// Buffered single-object response from transports that do not stream.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FallbackEnvelope {
    success: bool,
    #[serde(default)]
    results: Option<Vec<Value>>,
    #[serde(default)]
    aggregated_insights: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl FallbackEnvelope {
    fn into_frame(self) -> StreamFrame {
        if self.success {
            StreamFrame::Complete(AnalysisJobResult {
                results: self.results.unwrap_or_default(),
                aggregated_insights: self.aggregated_insights,
            })
        } else {
            StreamFrame::Failed(
                self.error
                    .unwrap_or_else(|| "Analysis service reported failure".to_string()),
            )
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk and return every frame completed by it, in wire order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamFrame>, DecodeError> {
        if self.buffer.len() + chunk.len() > MAX_STREAM_BUFFER_SIZE {
            return Err(DecodeError::BufferExceeded {
                limit: MAX_STREAM_BUFFER_SIZE,
            });
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(frame) = parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Consume the decoder at end-of-stream, parsing any unterminated tail.
    /// Some transports omit the final newline, and the buffered fallback
    /// response is a single object with no newline at all.
    pub fn finish(self) -> Option<StreamFrame> {
        parse_line(&self.buffer)
    }
}

fn parse_line(line: &[u8]) -> Option<StreamFrame> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    if let Ok(record) = serde_json::from_slice::<WireRecord>(line) {
        return Some(match record {
            WireRecord::Progress { progress } => StreamFrame::Progress(progress),
            WireRecord::Complete { data } => StreamFrame::Complete(data),
        });
    }

    match serde_json::from_slice::<FallbackEnvelope>(line) {
        Ok(envelope) => Some(envelope.into_frame()),
        Err(_) => {
            let preview = String::from_utf8_lossy(&line[..line.len().min(200)]);
            tracing::debug!(line = %preview, "[Stream] Skipping unrecognized line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    // Multi-byte characters included on purpose: splits land inside them.
    const CANONICAL: &str = concat!(
        "{\"type\":\"progress\",\"progress\":10}\n",
        "{\"type\":\"progress\",\"progress\":40}\n",
        "{\"type\":\"progress\",\"progress\":75}\n",
        "{\"type\":\"complete\",\"data\":{\"results\":[{\"docId\":\"a\"},{\"docId\":\"b\"}],",
        "\"aggregatedInsights\":{\"automationScore\":81,\"summary\":\"très répétitif\"}}}\n",
    );

    fn canonical_frames() -> Vec<StreamFrame> {
        vec![
            StreamFrame::Progress(10),
            StreamFrame::Progress(40),
            StreamFrame::Progress(75),
            StreamFrame::Complete(AnalysisJobResult {
                results: vec![json!({"docId": "a"}), json!({"docId": "b"})],
                aggregated_insights: Some(json!({
                    "automationScore": 81,
                    "summary": "très répétitif"
                })),
            }),
        ]
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<StreamFrame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(decoder.feed(chunk).expect("within buffer limit"));
        }
        if let Some(frame) = decoder.finish() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_whole_stream_in_one_chunk() {
        assert_eq!(decode_chunks(&[CANONICAL.as_bytes()]), canonical_frames());
    }

    #[test]
    fn test_every_two_chunk_split() {
        let bytes = CANONICAL.as_bytes();
        for split in 0..=bytes.len() {
            let frames = decode_chunks(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(frames, canonical_frames(), "split at byte {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let chunks: Vec<&[u8]> = CANONICAL.as_bytes().chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), canonical_frames());
    }

    #[test]
    fn test_every_three_chunk_split_of_one_record() {
        let record = b"{\"type\":\"progress\",\"progress\":55}\n";
        for i in 0..=record.len() {
            for j in i..=record.len() {
                let frames = decode_chunks(&[&record[..i], &record[i..j], &record[j..]]);
                assert_eq!(
                    frames,
                    vec![StreamFrame::Progress(55)],
                    "splits at bytes {} and {}",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_missing_trailing_newline() {
        let trimmed = CANONICAL.trim_end_matches('\n');
        assert_eq!(decode_chunks(&[trimmed.as_bytes()]), canonical_frames());
    }

    #[test]
    fn test_split_at_line_boundary_keeps_frames_separate() {
        let boundary = CANONICAL.find('\n').unwrap() + 1;
        let bytes = CANONICAL.as_bytes();
        let frames = decode_chunks(&[&bytes[..boundary], &bytes[boundary..]]);
        assert_eq!(frames, canonical_frames());
    }

    #[test]
    fn test_fallback_success_object() {
        let body = br#"{"success":true,"results":[{"docId":"a"}],"aggregatedInsights":{"score":5}}"#;
        let frames = decode_chunks(&[body.as_slice()]);
        assert_eq!(
            frames,
            vec![StreamFrame::Complete(AnalysisJobResult {
                results: vec![json!({"docId": "a"})],
                aggregated_insights: Some(json!({"score": 5})),
            })]
        );
    }

    #[test]
    fn test_fallback_error_object() {
        let body = br#"{"success":false,"error":"model overloaded"}"#;
        let frames = decode_chunks(&[body.as_slice()]);
        assert_eq!(frames, vec![StreamFrame::Failed("model overloaded".into())]);
    }

    #[test]
    fn test_fallback_failure_without_message_gets_default() {
        let frames = decode_chunks(&[br#"{"success":false}"#.as_slice()]);
        assert!(matches!(frames.as_slice(), [StreamFrame::Failed(_)]));
    }

    #[test]
    fn test_malformed_and_unknown_lines_skipped() {
        let stream = concat!(
            "{\"type\":\"progress\",\"progress\":10}\n",
            "not json at all\n",
            "{\"type\":\"heartbeat\"}\n",
            "{\"type\":\"progress\",\"progress\":40}\n",
        );
        let frames = decode_chunks(&[stream.as_bytes()]);
        assert_eq!(
            frames,
            vec![StreamFrame::Progress(10), StreamFrame::Progress(40)]
        );
    }

    #[test]
    fn test_crlf_terminators() {
        let stream = "{\"type\":\"progress\",\"progress\":10}\r\n{\"type\":\"progress\",\"progress\":20}\r\n";
        let frames = decode_chunks(&[stream.as_bytes()]);
        assert_eq!(
            frames,
            vec![StreamFrame::Progress(10), StreamFrame::Progress(20)]
        );
    }

    #[test]
    fn test_blank_lines_and_empty_chunks_ignored() {
        let bytes = b"\n\n{\"type\":\"progress\",\"progress\":10}\n\n";
        let frames = decode_chunks(&[b"", bytes.as_slice(), b""]);
        assert_eq!(frames, vec![StreamFrame::Progress(10)]);
    }

    #[test]
    fn test_buffer_limit_enforced() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&vec![b'a'; 600_000]).unwrap();
        let err = decoder.feed(&vec![b'a'; 500_000]);
        assert!(matches!(err, Err(DecodeError::BufferExceeded { .. })));
    }

    #[test]
    fn test_finish_discards_unparseable_tail() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"{\"type\":\"progre").unwrap();
        assert_eq!(decoder.finish(), None);
    }
}
