//! Paragraph-aligned splitting of long documents into extraction chunks.

/// Slice of the document submitted in one extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Byte offset of `text` inside the document.
    pub offset: usize,
    /// Chunk text.
    pub text: &'a str,
}

/// Splits `text` into chunks of at most `max_len` bytes, preferring paragraph
/// boundaries, then whitespace, then any char boundary. Blank input yields no chunks.
#[must_use]
pub fn split(text: &str, max_len: usize) -> Vec<Chunk<'_>> {
    let max_len = max_len.max(1);
    let mut bounds = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (start, end) in paragraphs(text) {
        if end - start > max_len {
            bounds.extend(current.take());
            hard_split(text, start, end, max_len, &mut bounds);
            continue;
        }
        current = match current {
            Some((chunk_start, _)) if end - chunk_start <= max_len => Some((chunk_start, end)),
            previous => {
                bounds.extend(previous);
                Some((start, end))
            }
        };
    }
    bounds.extend(current);
    bounds
        .into_iter()
        .map(|(start, end)| Chunk {
            offset: start,
            text: &text[start..end],
        })
        .collect()
}

fn paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut segment_start = 0;
    for (idx, separator) in text.match_indices("\n\n") {
        push_trimmed(text, segment_start, idx, &mut out);
        segment_start = idx + separator.len();
    }
    push_trimmed(text, segment_start, text.len(), &mut out);
    out
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    let segment = &text[start..end];
    let leading = segment.len() - segment.trim_start().len();
    let trailing = segment.len() - segment.trim_end().len();
    if leading + trailing < segment.len() {
        out.push((start + leading, end - trailing));
    }
}

fn hard_split(text: &str, start: usize, end: usize, max_len: usize, out: &mut Vec<(usize, usize)>) {
    let mut cursor = start;
    while end - cursor > max_len {
        let mut cut = cursor + max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(space) = text[cursor..cut].rfind(char::is_whitespace) {
            if space > max_len / 2 {
                cut = cursor + space;
            }
        }
        if cut == cursor {
            cut = cursor + text[cursor..].chars().next().map_or(1, char::len_utf8);
        }
        out.push((cursor, cut));
        cursor = cut + (text[cut..end].len() - text[cut..end].trim_start().len());
    }
    if cursor < end {
        out.push((cursor, end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_document_is_one_chunk() {
        let text = "1. Scope.\n\n2. Retention.";
        let chunks = split(text, 100);
        assert_eq!(chunks, vec![Chunk { offset: 0, text }]);
    }

    #[test]
    fn paragraphs_are_packed_up_to_limit() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        let chunks = split(text, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aaaa\n\nbbbb");
        assert_eq!(chunks[1], Chunk { offset: 12, text: "cccc" });
    }

    #[test]
    fn oversized_paragraph_splits_on_whitespace() {
        let text = "alpha beta gamma delta";
        let chunks = split(text, 12);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma delta"]);
        for chunk in &chunks {
            assert_eq!(&text[chunk.offset..chunk.offset + chunk.text.len()], chunk.text);
        }
    }

    #[test]
    fn respects_char_boundaries() {
        let text = "ééééé";
        let chunks = split(text, 3);
        assert!(chunks.iter().all(|c| c.text.len() <= 3));
        assert_eq!(chunks.iter().map(|c| c.text).collect::<String>(), text);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split("  \n\n \n", 50).is_empty());
    }
}
