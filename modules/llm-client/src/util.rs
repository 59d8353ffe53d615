/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code blocks from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse a JSON-mode response into a typed value, tolerating code fences.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(response: &str) -> anyhow::Result<T> {
    let cleaned = strip_code_blocks(response);
    serde_json::from_str(cleaned)
        .map_err(|e| anyhow::anyhow!("Failed to parse LLM JSON response: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundary() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn truncate_within_bounds() {
        assert_eq!(truncate_to_char_boundary("Hello", 100), "Hello");
    }

    #[test]
    fn strip_code_blocks_variants() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn parse_json_tolerates_fences() {
        #[derive(serde::Deserialize)]
        struct Out {
            title: String,
        }
        let out: Out = parse_json_response("```json\n{\"title\": \"x\"}\n```").unwrap();
        assert_eq!(out.title, "x");
    }
}
