/// Last `line_count` lines of `content`.
pub fn tail_lines(content: &str, line_count: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(line_count);
    lines[start..].join("\n")
}

/// Keep at most the last `max_bytes` bytes of `content`, cutting on a char
/// boundary and then dropping the partial first line.
pub fn cap_to_last_bytes(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let mut start = content.len() - max_bytes;
    while !content.is_char_boundary(start) {
        start += 1;
    }
    let tail = &content[start..];
    match tail.find('\n') {
        Some(newline) if newline + 1 < tail.len() => tail[newline + 1..].to_string(),
        _ => tail.to_string(),
    }
}
