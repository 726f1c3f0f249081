/// Collapses `text` onto one line and cuts it to at most `max_chars`
/// characters, marking the cut with an ellipsis.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if single_line.chars().count() <= max_chars {
        return single_line;
    }

    let keep = max_chars.saturating_sub(3);
    let mut cut: String = single_line.chars().take(keep).collect();
    let trimmed_len = cut.trim_end().len();
    cut.truncate(trimmed_len);
    cut.push_str("...");
    cut
}
