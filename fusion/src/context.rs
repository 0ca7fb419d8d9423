//! Context-window heuristics shared by the PII and safety scanners.
//!
//! Everything here is a pure function of the text and a term list. Term
//! matching is ASCII case-insensitive and word-bounded, so "test" does not
//! fire inside "latest".

/// Text surrounding a match, split at the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    pub before: &'a str,
    pub matched: &'a str,
    pub after: &'a str,
}

impl<'a> Window<'a> {
    /// Slice `radius` characters on each side of `start..end`.
    ///
    /// Out-of-range or non-boundary offsets are snapped inward to the nearest
    /// char boundary, so the call never panics.
    pub fn around(text: &'a str, start: usize, end: usize, radius: usize) -> Self {
        let start = floor_boundary(text, start.min(text.len()));
        let end = ceil_boundary(text, end.clamp(start, text.len()));

        let before_start = text[..start]
            .char_indices()
            .rev()
            .nth(radius.saturating_sub(1))
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        let before_start = if radius == 0 { start } else { before_start };

        let after_end = text[end..]
            .char_indices()
            .nth(radius)
            .map(|(idx, _)| end + idx)
            .unwrap_or(text.len());

        Self {
            before: &text[before_start..start],
            matched: &text[start..end],
            after: &text[end..after_end],
        }
    }

    /// Byte range of the whole window within the source text.
    pub fn span_in(&self, text: &str) -> (usize, usize) {
        let base = text.as_ptr() as usize;
        let start = self.before.as_ptr() as usize - base;
        let end = self.after.as_ptr() as usize - base + self.after.len();
        (start, end)
    }

    /// Text on both sides of the match, without the match itself.
    pub fn surroundings(&self) -> String {
        format!("{} {}", self.before, self.after)
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offsets of every word-bounded, case-insensitive occurrence of `term`.
pub fn find_term(haystack: &str, term: &str) -> Vec<usize> {
    let term = term.trim();
    if term.is_empty() || term.len() > haystack.len() {
        return Vec::new();
    }
    let hay = haystack.as_bytes();
    let needle = term.as_bytes();
    let starts_word = needle.first().copied().is_some_and(is_word_byte);
    let ends_word = needle.last().copied().is_some_and(is_word_byte);

    (0..=hay.len() - needle.len())
        .filter(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
        .filter(|&i| !starts_word || i == 0 || !is_word_byte(hay[i - 1]))
        .filter(|&i| {
            let j = i + needle.len();
            !ends_word || j == hay.len() || !is_word_byte(hay[j])
        })
        .collect()
}

/// Whether `term` occurs word-bounded in `haystack`.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    !find_term(haystack, term).is_empty()
}

/// Number of distinct terms from `terms` present in `haystack`.
pub fn count_terms<S: AsRef<str>>(haystack: &str, terms: &[S]) -> usize {
    terms
        .iter()
        .filter(|t| contains_term(haystack, t.as_ref()))
        .count()
}

/// Confidence delta from corroborating and disclaiming keywords.
///
/// Each distinct corroborating term adds `boost`; each distinct disclaiming
/// term subtracts `penalty`.
pub fn keyword_delta<S: AsRef<str>>(
    surroundings: &str,
    corroborating: &[S],
    disclaiming: &[S],
    boost: f64,
    penalty: f64,
) -> f64 {
    let up = count_terms(surroundings, corroborating) as f64 * boost;
    let down = count_terms(surroundings, disclaiming) as f64 * penalty;
    up - down
}

/// Whether a negation cue precedes the match within the same clause.
pub fn negated<S: AsRef<str>>(before: &str, cues: &[S]) -> bool {
    let clause_start = before
        .rfind(['.', '!', '?', ';', '\n'])
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let clause = &before[clause_start..];
    cues.iter().any(|cue| contains_term(clause, cue.as_ref()))
}

/// Whether the window carries fictional, educational or reporting cues.
pub fn mitigated<S: AsRef<str>>(window: &Window<'_>, cues: &[S]) -> bool {
    let surroundings = window.surroundings();
    cues.iter().any(|cue| contains_term(&surroundings, cue.as_ref()))
}

/// Whether `start..end` sits inside a double-quoted passage of `text`.
pub fn quoted(text: &str, start: usize, end: usize) -> bool {
    let start = floor_boundary(text, start.min(text.len()));
    let end = ceil_boundary(text, end.clamp(start, text.len()));
    let is_open = |c: char| matches!(c, '"' | '\u{201C}');
    let is_close = |c: char| matches!(c, '"' | '\u{201D}');

    let straight_before = text[..start].matches('"').count();
    let curly_open = text[..start].matches('\u{201C}').count();
    let curly_close = text[..start].matches('\u{201D}').count();
    let open = straight_before % 2 == 1 || curly_open > curly_close;

    open && text[end..].chars().any(is_close) && text[..start].chars().any(is_open)
}
