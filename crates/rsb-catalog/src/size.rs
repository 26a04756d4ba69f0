//! Canonical size strings.
//!
//! RMS sizes arrive as anything from `"M"` to `"23½"` to `"38,5"`. The
//! commerce side wants one canonical decimal spelling per size, with the
//! source form preserved separately when it differed.
//!
//! Rules, in order:
//! - Unicode vulgar fractions are substituted in place with their decimal
//!   expansion; whitespace around the fraction is dropped (`"23 ½"` →
//!   `"23.5"`).
//! - A comma decimal separator becomes a dot (`"38,5"` → `"38.5"`).
//! - Anything else is identity: `"M"`, `"XL"` and `"38/40"` pass through.
//!
//! Normalization is idempotent: the canonical form of a canonical form is
//! itself.

/// Result of one normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSize {
    pub canonical: String,
    /// The raw input, present only when `canonical` differs from it.
    /// Drives the `rms.talla_original` metafield.
    pub original: Option<String>,
}

/// Unicode vulgar fractions that occur in footwear/apparel sizing.
const FRACTIONS: &[(char, &str)] = &[
    ('¼', ".25"),
    ('½', ".5"),
    ('¾', ".75"),
    ('⅛', ".125"),
    ('⅜', ".375"),
    ('⅝', ".625"),
    ('⅞', ".875"),
];

fn fraction_expansion(c: char) -> Option<&'static str> {
    FRACTIONS.iter().find(|(f, _)| *f == c).map(|(_, d)| *d)
}

/// Normalize one raw size string.
pub fn normalize_size(raw: &str) -> NormalizedSize {
    let trimmed = raw.trim();
    let mut canonical = String::with_capacity(trimmed.len());
    // Set while the previous char was a fraction, to swallow the
    // whitespace that sometimes follows it.
    let mut skip_whitespace = false;

    for c in trimmed.chars() {
        if let Some(expansion) = fraction_expansion(c) {
            // Drop whitespace between the number and its fraction.
            while canonical.ends_with(' ') {
                canonical.pop();
            }
            canonical.push_str(expansion);
            skip_whitespace = true;
            continue;
        }
        if skip_whitespace && c.is_whitespace() {
            continue;
        }
        skip_whitespace = false;
        canonical.push(if c == ',' { '.' } else { c });
    }

    let original = if canonical != raw {
        Some(raw.to_string())
    } else {
        None
    };
    NormalizedSize { canonical, original }
}
