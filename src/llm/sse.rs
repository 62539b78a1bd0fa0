// src/llm/sse.rs
// SSE stream decoder for the model provider's chunked responses.

use anyhow::Result;
use serde::de::DeserializeOwned;

/// SSE stream decoder with buffering.
///
/// Handles partial chunks and extracts complete SSE frames. Buffer is bounded
/// to prevent unbounded growth from malformed streams.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Maximum buffer size (1MB)
    const MAX_BUFFER_SIZE: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Push a chunk of bytes and extract complete SSE frames.
    ///
    /// Incomplete data is buffered for the next push.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        if self.buffer.len() > Self::MAX_BUFFER_SIZE {
            tracing::warn!(
                "SSE buffer exceeded {}KB limit, truncating",
                Self::MAX_BUFFER_SIZE / 1024
            );
            let mut keep_from = self.buffer.len() - (Self::MAX_BUFFER_SIZE / 2);
            while !self.buffer.is_char_boundary(keep_from) {
                keep_from += 1;
            }
            self.buffer = self.buffer[keep_from..].to_string();
        }

        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer = self.buffer[pos + 1..].to_string();

            if line.is_empty() {
                continue;
            }

            if let Some(data) = line.strip_prefix("data: ") {
                frames.push(SseFrame {
                    data: data.to_string(),
                });
            }
        }

        frames
    }

    /// Push a string directly (for testing or pre-decoded content)
    pub fn push_str(&mut self, s: &str) -> Vec<SseFrame> {
        self.push(s.as_bytes())
    }

    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// A complete SSE frame (data line, without the "data: " prefix)
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    /// Check for the [DONE] sentinel
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data)
            .map_err(|e| anyhow::anyhow!("SSE JSON parse error: {}. Data: {}", e, self.preview()))
    }

    /// First 200 characters of the data, truncated on a char boundary
    fn preview(&self) -> String {
        match self.data.char_indices().nth(200) {
            Some((idx, _)) => format!("{}...", &self.data[..idx]),
            None => self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_basic_decode() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("data: {\"text\": \"hello\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"text\": \"hello\"}");
    }

    #[test]
    fn test_done_frame() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("data: [DONE]\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_done());
    }

    #[test]
    fn test_partial_chunks() {
        let mut decoder = SseDecoder::new();

        let frames1 = decoder.push_str("data: {\"part\":");
        assert!(frames1.is_empty());
        assert!(decoder.has_remaining());

        let frames2 = decoder.push_str(" 1}\n");
        assert_eq!(frames2.len(), 1);
        assert_eq!(frames2[0].data, "{\"part\": 1}");
    }

    #[test]
    fn test_multiple_frames() {
        let mut decoder = SseDecoder::new();

        let frames = decoder.push_str("data: first\ndata: second\ndata: third\n");
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].data, "first");
        assert_eq!(frames[2].data, "third");
    }

    #[test]
    fn test_parse_json() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestData {
            value: i32,
        }

        let mut decoder = SseDecoder::new();
        let frames = decoder.push_str("data: {\"value\": 42}\n");

        let parsed: TestData = frames[0].parse().unwrap();
        assert_eq!(parsed.value, 42);
    }

    #[test]
    fn test_parse_error_preview_is_char_safe() {
        // Long multi-byte garbage: the error preview must truncate on a
        // char boundary instead of panicking mid-codepoint
        let mut decoder = SseDecoder::new();
        let payload = format!("data: {}\n", "é".repeat(300));
        let frames = decoder.push_str(&payload);

        let err = frames[0].parse::<serde_json::Value>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("..."));
    }
}
