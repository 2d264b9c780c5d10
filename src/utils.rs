//! Small helpers shared across the codebase.

/// Truncates a string to at most `max_chars` characters, adding "..." if truncated.
///
/// UTF-8 safe: counts characters, not bytes, so multi-byte text (Cyrillic,
/// emoji) never panics on a boundary.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    // Cheap filter: byte length <= max_chars implies char count <= max_chars.
    if s.len() <= max_chars {
        return s.to_string();
    }

    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    if max_chars <= 3 {
        return "...".chars().take(max_chars).collect();
    }

    let truncated: String = s.chars().take(max_chars - 3).collect();
    format!("{}...", truncated)
}
