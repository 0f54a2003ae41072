use crate::errors::{EmuPilotError, EmuPilotResult};
use crate::llm::types::StreamChunk;

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None for keep-alives, non-data lines and empty deltas.
pub fn parse_sse_line(line: &str) -> EmuPilotResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let data = if let Some(d) = line.strip_prefix("data: ") {
        d.trim()
    } else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(StreamChunk::done()));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| EmuPilotError::Sse(e.to_string()))?;

    // Mid-stream error payload aborts the completion
    if let Some(err) = json.get("error") {
        let message = err["message"]
            .as_str()
            .or_else(|| err.as_str())
            .unwrap_or("unspecified upstream error");
        return Ok(Some(StreamChunk::error(message)));
    }

    if let Some(choices) = json["choices"].as_array() {
        if let Some(first) = choices.first() {
            if let Some(content) = first["delta"]["content"].as_str() {
                if !content.is_empty() {
                    return Ok(Some(StreamChunk::content(content)));
                }
            }

            // Finish reason signals done
            if first["finish_reason"].as_str().is_some() {
                return Ok(Some(StreamChunk::done()));
            }
        }
    }

    Ok(None)
}
