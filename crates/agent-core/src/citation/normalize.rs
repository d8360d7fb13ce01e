//! Idempotent text canonicalizer used before edit-distance comparisons.
//!
//! Strips characters and normalizes variants that differ across how a
//! report is echoed back by an LLM but carry no semantic content, so two
//! texts that are "the same" modulo whitespace/punctuation rendering
//! compare as equal.

/// Applies every normalization pass. Running this twice produces the same
/// output as running it once.
pub fn canonicalize(text: &str) -> String {
    let s = strip_zero_width(text);
    let s = normalize_line_endings(&s);
    let s = collapse_blank_lines(&s);
    let s = normalize_space_variants(&s);
    let s = collapse_tabs_and_spaces(&s);
    let s = trim_trailing_spaces_per_line(&s);
    let s = normalize_ellipsis(&s);
    let s = normalize_fullwidth(&s);
    normalize_dashes(&s)
}

fn strip_zero_width(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .collect()
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(c);
            }
        } else {
            newline_run = 0;
            out.push(c);
        }
    }
    out
}

const SPACE_VARIANTS: &[char] = &[
    '\u{3000}', // ideographic space
    '\u{2007}', // figure space
    '\u{2009}', // thin space
    '\u{00A0}', // no-break space
    '\u{2002}', '\u{2003}', '\u{2004}', '\u{2005}', '\u{2006}', '\u{2008}',
];

fn normalize_space_variants(text: &str) -> String {
    text.chars().map(|c| if SPACE_VARIANTS.contains(&c) { ' ' } else { c }).collect()
}

fn collapse_tabs_and_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    for c in text.chars() {
        if c == ' ' || c == '\t' {
            run += 1;
            if run == 1 {
                out.push(' ');
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}

fn trim_trailing_spaces_per_line(text: &str) -> String {
    text.lines()
        .map(|line| line.trim_end_matches(' '))
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_ellipsis(text: &str) -> String {
    text.replace('\u{2026}', "...")
}

/// Maps fullwidth/CJK punctuation, digits, and Latin letters to their ASCII
/// equivalents, following the Unicode fullwidth-forms block layout (each
/// fullwidth code point is a fixed offset from its ASCII counterpart).
fn normalize_fullwidth(text: &str) -> String {
    text.chars()
        .map(|c| {
            let cp = c as u32;
            match cp {
                0xFF01..=0xFF5E => char::from_u32(cp - 0xFEE0).unwrap_or(c),
                '\u{3001}' => ',', // 、
                '\u{3002}' => '.', // 。
                '\u{FF0C}' => ',',
                _ => c,
            }
        })
        .collect()
}

fn normalize_dashes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
            other => other,
        })
        .collect()
}
