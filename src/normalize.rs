// 🔤 Text Normalizer - canonical form for label comparison
//
// Two labels match iff their normalized forms are identical.
// No similarity scoring: "Fin Tech" and "fintech" are different labels.

/// Normalize free text for comparison.
///
/// - absent or empty input → `None`
/// - non-breaking spaces become ordinary spaces
/// - every run of whitespace (tabs, newlines included) collapses to one space
/// - leading/trailing whitespace is trimmed
/// - Unicode lower-casing
///
/// Text that is blank after trimming also yields `None`, which keeps the
/// function idempotent (`normalize(normalize(x)) == normalize(x)`).
pub fn normalize(text: Option<&str>) -> Option<String> {
    let text = text?;
    if text.is_empty() {
        return None;
    }

    let mut collapsed = String::with_capacity(text.len());
    let mut pending_space = false;

    // Non-breaking spaces (U+00A0, U+2007, U+202F) carry the Unicode
    // White_Space property, so they collapse like any other space.
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space && !collapsed.is_empty() {
            collapsed.push(' ');
        }
        pending_space = false;
        collapsed.push(ch);
    }

    if collapsed.is_empty() {
        return None;
    }

    Some(collapsed.to_lowercase())
}
