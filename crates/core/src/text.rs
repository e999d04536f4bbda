//! Character normalization for OCR-sourced problem statements.
//!
//! Only OCR output goes through here; provider text is left untouched.

/// Glyph replacements applied before whitespace is collapsed. Every
/// replacement is ASCII, which keeps [`normalize_ocr_text`] idempotent.
pub const GLYPH_TABLE: &[(char, &str)] = &[
    ('×', "*"),
    ('÷', "/"),
    ('–', "-"),
    ('—', "-"),
    ('∫', "integral of"),
    ('∂', "partial derivative of"),
    ('∑', "sum of"),
    ('∏', "product of"),
    ('√', "sqrt"),
    ('±', "plus or minus"),
    ('≤', "<="),
    ('≥', ">="),
    ('≠', "!="),
    ('≈', "approximately"),
    ('π', "pi"),
    ('θ', "theta"),
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('σ', "sigma"),
    ('°', " degrees"),
    ('\u{201C}', "\""),
    ('\u{201D}', "\""),
    ('\u{2018}', "'"),
    ('\u{2019}', "'"),
];

pub fn glyph_replacement(ch: char) -> Option<&'static str> {
    GLYPH_TABLE.iter().find(|(glyph, _)| *glyph == ch).map(|(_, replacement)| *replacement)
}

pub fn normalize_ocr_text(input: &str) -> String {
    let mut replaced = String::with_capacity(input.len());
    for ch in input.chars() {
        match glyph_replacement(ch) {
            Some(replacement) => replaced.push_str(replacement),
            None => replaced.push(ch),
        }
    }

    collapse_whitespace(&replaced)
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
