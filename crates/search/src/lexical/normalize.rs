//! Text normalization and string similarity
//!
//! Everything lexical runs on normalized text: lowercase, Latin diacritics
//! folded to their base letter, punctuation turned into single spaces.

use std::collections::HashSet;

/// Fold a lowercase Latin letter with a diacritic to its base letter
fn fold(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Lowercase, fold diacritics and collapse non-alphanumerics into single spaces
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars().flat_map(char::to_lowercase).map(fold) {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Crude Spanish/English plural stripping: `-es` then `-s`
pub fn stem(token: &str) -> &str {
    let len = token.chars().count();
    if len > 4 {
        if let Some(stripped) = token.strip_suffix("es") {
            return stripped;
        }
    }
    if len > 3 {
        if let Some(stripped) = token.strip_suffix('s') {
            return stripped;
        }
    }
    token
}

/// Edit distance over chars, two rolling rows
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized Levenshtein similarity in [0, 1]: `1 - dist / max_len`
pub fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

/// Normalized text prepared for repeated term lookups
#[derive(Debug, Clone)]
pub struct NormalizedText {
    tokens: Vec<String>,
    padded: String,
    stems: HashSet<String>,
}

impl NormalizedText {
    pub fn new(text: &str) -> Self {
        let normalized = normalize(text);
        let tokens: Vec<String> = normalized.split(' ').filter(|t| !t.is_empty()).map(String::from).collect();
        let stems = tokens.iter().map(|t| stem(t).to_string()).collect();
        Self {
            padded: format!(" {} ", normalized),
            tokens,
            stems,
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Whether a normalized term occurs: phrases on word boundaries,
    /// single words by exact token or shared stem
    pub fn mentions(&self, term: &str) -> bool {
        if term.is_empty() {
            return false;
        }
        if term.contains(' ') {
            return self.padded.contains(&format!(" {} ", term));
        }
        self.stems.contains(stem(term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_and_collapses() {
        assert_eq!(normalize("  ¿Contacto con la PIEL?  Ojos/Ocular "), "contacto con la piel ojos ocular");
        assert_eq!(normalize("Extinción, quemaduras"), "extincion quemaduras");
        assert_eq!(normalize("ÑANDÚ"), "nandu");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("ojos"), "ojo");
        assert_eq!(stem("lesiones"), "lesion");
        assert_eq!(stem("quemaduras"), "quemadura");
        assert_eq!(stem("gas"), "gas");
        assert_eq!(stem("piel"), "piel");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("abofol", "abofoll"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("amistar", "amistar"), 0);
    }

    #[test]
    fn test_similarity() {
        assert!((similarity("abofoll", "abofol") - (1.0 - 1.0 / 7.0)).abs() < 1e-6);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_mentions() {
        let text = NormalizedText::new("En caso de contacto con la piel, lavar. Evitar contacto con los ojos.");
        assert!(text.mentions("contacto con la piel"));
        assert!(text.mentions("ojos"));
        assert!(text.mentions("ojo"));
        assert!(!text.mentions("ocular"));
        assert!(!text.mentions("con la p"));
        assert!(!text.mentions(""));
    }
}
