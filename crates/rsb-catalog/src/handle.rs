//! URL-safe product handles.
//!
//! A handle must be globally unique on the commerce side and reproducible
//! across runs for the same `(ccod, title)` pair: the upsert path finds the
//! existing product by recomputing it.

use crate::text::fold_accents;

/// Slugify one component: accent-fold, lowercase, non-alphanumerics to `-`,
/// runs collapsed, edges trimmed.
fn slugify(input: &str) -> String {
    let folded = fold_accents(input).to_lowercase();
    let mut out = String::with_capacity(folded.len());
    let mut last_dash = true; // suppress a leading dash
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Deterministic handle for a product: `{title-slug}-{ccod-slug}`.
///
/// The CCOD suffix keeps same-titled products in different variant families
/// from colliding. Empty inputs degrade gracefully (a lone CCOD or a lone
/// title still yields a usable slug).
pub fn derive_handle(ccod: &str, title: &str) -> String {
    let title_slug = slugify(title);
    let ccod_slug = slugify(ccod);
    match (title_slug.is_empty(), ccod_slug.is_empty()) {
        (false, false) => format!("{title_slug}-{ccod_slug}"),
        (false, true) => title_slug,
        (true, false) => ccod_slug,
        (true, true) => "producto".to_string(),
    }
}

/// Deterministic suffixed handle for collision resolution and variant-cap
/// splits. Part 1 is the bare handle.
pub fn numbered_handle(handle: &str, part: usize) -> String {
    if part <= 1 {
        handle.to_string()
    } else {
        format!("{handle}-{part}")
    }
}
