//! Splitting display text into message-sized segments.

/// Split `text` into segments of at most `max_length` characters at line breaks.
///
/// Lines are packed greedily. A line that alone exceeds `max_length` becomes its
/// own oversized segment instead of being cut mid-line. Blank lines never form a
/// segment of their own: they are carried into the next segment, or appended to
/// the previous one at the end of the text, so a segment may exceed `max_length`
/// by those blank lines. Joining the result with `'\n'` reproduces `text`
/// exactly; empty input yields no segments.
///
/// Lengths are Unicode scalar values. Telegram counts UTF-16 code units, so text
/// outside the Basic Multilingual Plane (most emoji) takes two units per char.
pub fn paginate(text: &str, max_length: usize) -> Vec<String> {
    let mut segments = Vec::new();
    if text.is_empty() {
        return segments;
    }

    // `None` until the segment has taken its first line, which may be empty.
    let mut current: Option<(String, usize)> = None;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        current = match current.take() {
            Some((mut segment, len))
                if len + line_len + 1 <= max_length || is_blank(&segment) =>
            {
                segment.push('\n');
                segment.push_str(line);
                Some((segment, len + line_len + 1))
            }
            Some((segment, _)) => {
                segments.push(segment);
                Some((line.to_string(), line_len))
            }
            None => Some((line.to_string(), line_len)),
        };
    }

    if let Some((segment, _)) = current {
        match segments.last_mut() {
            Some(last) if is_blank(&segment) => {
                last.push('\n');
                last.push_str(&segment);
            }
            _ => segments.push(segment),
        }
    }

    segments
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
