use serde_json::Value;

/// Strips a surrounding Markdown code fence (```` ```json ... ``` ````) if present.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.find('\n').map_or(rest, |idx| &rest[idx + 1..]);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Decodes raw oracle text into JSON, tolerating code fences and leading prose.
pub fn decode(raw: &str) -> Result<Value, serde_json::Error> {
    let body = strip_code_fence(raw);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(err) => match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if start > 0 && end > start => {
                serde_json::from_str(&body[start..=end]).map_err(|_| err)
            }
            _ => Err(err),
        },
    }
}
