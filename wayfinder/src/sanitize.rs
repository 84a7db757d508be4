//! Escaping for overlay markup and text-based DOM queries

/// HTML-escape a string for interpolation into overlay markup.
///
/// Every piece of step text, AI output, or page-derived content rendered in
/// the tooltip goes through this.
pub fn escape_html(input: Option<&str>) -> String {
    let Some(input) = input else {
        return String::new();
    };
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Encode `input` as a safe text-query literal.
///
/// Text queries interpolate user-recorded strings; a quote in the payload
/// must not be able to terminate the literal. Strings without a single
/// quote are wrapped in single quotes, strings without a double quote in
/// double quotes, and strings with both are split around the single quotes
/// and reassembled with `concat(...)`.
pub fn escape_text_literal(input: &str) -> String {
    if !input.contains('\'') {
        return format!("'{input}'");
    }
    if !input.contains('"') {
        return format!("\"{input}\"");
    }
    let mut parts = Vec::new();
    for (i, piece) in input.split('\'').enumerate() {
        if i > 0 {
            parts.push("\"'\"".to_string());
        }
        if !piece.is_empty() {
            parts.push(format!("'{piece}'"));
        }
    }
    format!("concat({})", parts.join(", "))
}

/// Decode a literal produced by [`escape_text_literal`] back to the text
/// it encodes. Rejects anything that is not a well-formed literal, which
/// is what makes injection attempts inert: a payload that escapes its
/// quotes no longer parses.
pub fn decode_text_literal(literal: &str) -> Option<String> {
    let literal = literal.trim();
    if let Some(inner) = literal
        .strip_prefix("concat(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let mut out = String::new();
        for part in split_concat_args(inner)? {
            out.push_str(&decode_quoted(part.trim())?);
        }
        return Some(out);
    }
    decode_quoted(literal)
}

fn decode_quoted(part: &str) -> Option<String> {
    let bytes = part.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let quote = bytes[0];
    if (quote != b'\'' && quote != b'"') || bytes[bytes.len() - 1] != quote {
        return None;
    }
    let inner = &part[1..part.len() - 1];
    // The encoder never emits a literal containing its own quote
    if inner.contains(quote as char) {
        return None;
    }
    Some(inner.to_string())
}

/// Split concat arguments on commas that sit outside quotes
fn split_concat_args(input: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quote: Option<char> = None;
    for (i, ch) in input.char_indices() {
        match (ch, in_quote) {
            ('\'' | '"', None) => in_quote = Some(ch),
            (ch, Some(q)) if ch == q => in_quote = None,
            (',', None) => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quote.is_some() {
        return None;
    }
    parts.push(&input[start..]);
    Some(parts)
}
