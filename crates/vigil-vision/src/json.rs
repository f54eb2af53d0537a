//! Tolerant extraction of JSON from model output.
//!
//! Models often wrap JSON in markdown fences or surround it with prose.

/// Remove a surrounding markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = if let Some(rest) = text.strip_prefix("```") {
        // Skip an optional language tag on the opening fence line
        match rest.find('\n') {
            Some(idx) if !rest[..idx].contains('{') => &rest[idx + 1..],
            _ => rest.trim_start_matches("json"),
        }
    } else {
        text
    };
    let text = text.trim_end();
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Find the first balanced JSON object in `text` and parse it.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let stripped = strip_code_fences(text);
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(stripped) {
        return Some(value);
    }

    let bytes = stripped.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = stripped[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(bytes, start) {
            if let Ok(value @ serde_json::Value::Object(_)) =
                serde_json::from_str::<serde_json::Value>(&stripped[start..=end])
            {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
