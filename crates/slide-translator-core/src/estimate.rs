//! Approximate backend token cost of a text fragment.
//!
//! Narrow-script text averages about four characters per token, CJK text
//! about one and a half. The estimate only has to keep batches under the
//! request ceiling with some margin; it is never compared to real usage.

/// Estimate the token cost of `text`.
///
/// Returns 0 for empty input and at least 1 otherwise.
pub fn estimate(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let (wide, narrow) = text.chars().fold((0usize, 0usize), |(wide, narrow), c| {
        if is_wide_char(c) {
            (wide + 1, narrow)
        } else {
            (wide, narrow + 1)
        }
    });

    // narrow / 4 + wide / 1.5 == (3 * narrow + 8 * wide) / 12, rounded up
    let twelfths = narrow * 3 + wide * 8;
    twelfths.div_ceil(12).max(1)
}

/// Whether `c` belongs to a wide (CJK) script block.
pub const fn is_wide_char(c: char) -> bool {
    matches!(
        c as u32,
        0x1100..=0x11FF     // Hangul Jamo
            | 0x3000..=0x303F   // CJK symbols and punctuation
            | 0x3040..=0x30FF   // Hiragana, Katakana
            | 0x3400..=0x4DBF   // CJK extension A
            | 0x4E00..=0x9FFF   // CJK unified ideographs
            | 0xAC00..=0xD7AF   // Hangul syllables
            | 0xF900..=0xFAFF   // CJK compatibility ideographs
            | 0xFF00..=0xFFEF   // Halfwidth and fullwidth forms
            | 0x2_0000..=0x2_FA1F // CJK extensions B-F, compatibility supplement
    )
}

/// Cost of one fragment inside a batch payload: its key, its text and the
/// JSON punctuation around them.
pub fn fragment_cost(id: &str, text: &str, per_item_overhead: usize) -> usize {
    estimate(id) + estimate(text) + per_item_overhead
}
