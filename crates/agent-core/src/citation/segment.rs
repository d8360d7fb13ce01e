//! Sentence segmentation for the citation placement engine.
//!
//! Splits a report into sentences at `.`, `!`, `?`, the CJK equivalents
//! `。！？`, and newlines, with guards against splitting decimals, domain
//! names, and abbreviation-plus-digit sequences like `v1.0`.

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub index: usize,
    pub text: String,
}

/// True when splitting at `pos` (the byte index of a `.` in `chars`) would
/// cut a decimal, a domain name, or an abbreviation-plus-digit like `v1.0`.
fn is_non_boundary_dot(chars: &[char], pos: usize) -> bool {
    let prev = pos.checked_sub(1).and_then(|i| chars.get(i));
    let next = chars.get(pos + 1);

    match (prev, next) {
        (Some(p), Some(n)) if p.is_ascii_digit() && n.is_ascii_digit() => true, // 3.14
        (Some(p), Some(n)) if p.is_alphanumeric() && n.is_alphanumeric() && n.is_lowercase() => {
            // heuristic for domains / abbreviations: a run of non-space,
            // non-terminator characters follows immediately without a space.
            true
        }
        _ => false,
    }
}

/// Splits `text` into sentences. Trailing whitespace after a terminator is
/// folded into the preceding sentence; newlines are preserved as part of the
/// sentence text so Markdown structure survives.
pub fn segment(text: &str) -> Vec<Sentence> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            if i > start {
                push_sentence(&chars, start, i + 1, &mut sentences);
            }
            start = i + 1;
            i += 1;
            continue;
        }

        if SENTENCE_TERMINATORS.contains(&c) {
            if c == '.' && is_non_boundary_dot(&chars, i) {
                i += 1;
                continue;
            }
            // Absorb a run of terminators ("?!", "...") into one boundary.
            let mut end = i + 1;
            while end < chars.len() && SENTENCE_TERMINATORS.contains(&chars[end]) {
                end += 1;
            }
            // Fold trailing whitespace (not newlines) into this sentence.
            while end < chars.len() && chars[end] != '\n' && chars[end].is_whitespace() {
                end += 1;
            }
            // A newline immediately following the terminator is itself a
            // boundary, but it belongs to this sentence's text so
            // concatenation reproduces the input exactly.
            if end < chars.len() && chars[end] == '\n' {
                end += 1;
            }
            push_sentence(&chars, start, end, &mut sentences);
            start = end;
            i = end;
            continue;
        }

        i += 1;
    }

    if start < chars.len() {
        push_sentence(&chars, start, chars.len(), &mut sentences);
    }

    sentences
}

fn push_sentence(chars: &[char], start: usize, end: usize, out: &mut Vec<Sentence>) {
    let slice: String = chars[start..end].iter().collect();
    if slice.trim().is_empty() {
        return;
    }
    let index = out.len();
    out.push(Sentence { index, text: slice });
}

/// A sentence is a table row if it contains >= 2 pipe characters or >= 2
/// gaps of 3+ consecutive spaces between non-space content (Markdown tables
/// and fixed-width layouts use one or the other).
pub fn is_table_row(text: &str) -> bool {
    let pipe_count = text.chars().filter(|c| *c == '|').count();
    if pipe_count >= 2 {
        return true;
    }

    let mut wide_gaps = 0usize;
    let mut run = 0usize;
    let mut seen_content_before = false;
    for c in text.chars() {
        if c == ' ' {
            run += 1;
        } else {
            if run >= 3 && seen_content_before {
                wide_gaps += 1;
            }
            run = 0;
            seen_content_before = true;
        }
    }
    wide_gaps >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenating_sentences_reproduces_the_original_text() {
        let texts = [
            "Hello world. How are you? Fine!",
            "The value is 3.14 exactly. Visit example.com for more.",
            "你好世界。你好吗？很好！",
            "Line one.\nLine two.\nLine three.",
        ];
        for text in texts {
            let rejoined: String = segment(text).into_iter().map(|s| s.text).collect();
            assert_eq!(rejoined, text);
        }
    }

    #[test]
    fn splits_on_basic_terminators() {
        let s = segment("Hello world. How are you? Fine!");
        assert_eq!(s.len(), 3);
        assert_eq!(s[0].text.trim(), "Hello world.");
    }

    #[test]
    fn keeps_decimal_numbers_intact() {
        let s = segment("The value is 3.14 exactly.");
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn keeps_domain_names_intact() {
        let s = segment("Visit example.com for more.");
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn splits_on_cjk_terminators() {
        let s = segment("你好世界。你好吗？很好！");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn newline_is_a_boundary_and_is_preserved() {
        let s = segment("First line.\nSecond line.");
        assert_eq!(s.len(), 2);
        assert!(s[0].text.ends_with('\n'));
    }

    #[test]
    fn detects_pipe_table_rows() {
        assert!(is_table_row("| a | b | c |"));
        assert!(!is_table_row("a, b, and c."));
    }

    #[test]
    fn detects_fixed_width_table_rows() {
        assert!(is_table_row("Name     Age     City"));
    }
}
