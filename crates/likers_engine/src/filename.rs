use chrono::{DateTime, Utc};
use likers_core::PostId;

const MAX_STEM_PREFIX: usize = 80;

/// Windows-safe export file stem:
/// `{sanitized_post_id}_likers_{YYYYMMDDTHHMMSSmmmZ}` plus `-{n}` when
/// `collision` is non-zero.
pub fn export_stem(post_id: &PostId, generated_at: DateTime<Utc>, collision: u32) -> String {
    let post = sanitize_component(post_id.as_str());
    let stamp = generated_at.format("%Y%m%dT%H%M%S%3fZ");
    if collision == 0 {
        format!("{post}_likers_{stamp}")
    } else {
        format!("{post}_likers_{stamp}-{collision}")
    }
}

fn sanitize_component(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]).to_string();
    if cleaned.is_empty() {
        cleaned = "post".to_string();
    }
    // Collapse multiple underscores
    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }
    if compacted.len() > MAX_STEM_PREFIX {
        let mut end = MAX_STEM_PREFIX;
        while !compacted.is_char_boundary(end) {
            end -= 1;
        }
        compacted.truncate(end);
    }
    if is_reserved_windows_name(&compacted) {
        compacted.push('_');
    }
    compacted
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
