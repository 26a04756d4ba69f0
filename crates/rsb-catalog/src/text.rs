//! Shared text helpers: accent folding and tokenization for slugs and
//! taxonomy scoring.

/// Fold the accented characters that actually occur in RMS master data
/// (Spanish + Portuguese Latin-1 range) to their ASCII base letter.
/// Everything else passes through unchanged.
pub fn fold_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
            'Á' | 'À' | 'Ä' | 'Â' | 'Ã' => 'A',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
            'Ó' | 'Ò' | 'Ö' | 'Ô' | 'Õ' => 'O',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            'ñ' => 'n',
            'Ñ' => 'N',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Lowercase, accent-folded alphanumeric tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    fold_accents(input)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_spanish_accents() {
        assert_eq!(fold_accents("Pantalón Niña"), "Pantalon Nina");
        assert_eq!(fold_accents("Canción"), "Cancion");
    }

    #[test]
    fn leaves_ascii_alone() {
        assert_eq!(fold_accents("Shoes 23.5"), "Shoes 23.5");
    }

    #[test]
    fn tokenize_splits_and_lowercases() {
        assert_eq!(tokenize("Zapatos de Niño"), vec!["zapatos", "de", "nino"]);
        assert_eq!(tokenize("  "), Vec::<String>::new());
        assert_eq!(tokenize("T-Shirt/Polo"), vec!["t", "shirt", "polo"]);
    }
}
