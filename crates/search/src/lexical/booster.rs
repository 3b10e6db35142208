//! Keyword boosts: additive score bonus for fragments that mention the
//! vocabulary of a matched keyword group

use super::matcher::KeywordGroup;
use super::normalize::NormalizedText;

/// Applies per-group bonuses, capped in total
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Booster {
    cap: f32,
}

impl Booster {
    pub fn new(cap: f32) -> Self {
        Self { cap: cap.max(0.0) }
    }

    /// Summed boost of every group the fragment text mentions, at most the cap
    pub fn bonus(&self, text: &NormalizedText, groups: &[&KeywordGroup]) -> f32 {
        let total: f32 = groups
            .iter()
            .filter(|g| g.terms.iter().any(|t| text.mentions(t)))
            .map(|g| g.boost)
            .sum();
        total.min(self.cap)
    }

    /// Raw similarity plus the keyword bonus
    pub fn apply(&self, raw: f32, text: &str, groups: &[&KeywordGroup]) -> f32 {
        if groups.is_empty() {
            return raw;
        }
        raw + self.bonus(&NormalizedText::new(text), groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn group(name: &str, terms: &[&str], boost: f32) -> KeywordGroup {
        KeywordGroup {
            name: name.into(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            boost,
        }
    }

    #[test]
    fn test_bonus_per_matched_group() {
        let eyes = group("eyes", &["ojos", "ocular"], 0.15);
        let fire = group("fire", &["incendio"], 0.15);
        let booster = Booster::new(0.30);

        let text = "Contacto ocular: lavar con agua durante 15 minutos.";
        assert!((booster.apply(0.5, text, &[&eyes]) - 0.65).abs() < 1e-6);
        assert!((booster.apply(0.5, text, &[&eyes, &fire]) - 0.65).abs() < 1e-6);
        assert_eq!(booster.apply(0.5, text, &[&fire]), 0.5);
        assert_eq!(booster.apply(0.5, text, &[]), 0.5);
    }

    #[test]
    fn test_bonus_is_capped() {
        let groups = [
            group("a", &["agua"], 0.2),
            group("b", &["lavar"], 0.2),
            group("c", &["minutos"], 0.2),
        ];
        let refs: Vec<&KeywordGroup> = groups.iter().collect();
        let booster = Booster::new(0.3);
        let text = NormalizedText::new("Lavar con agua durante 15 minutos");
        assert!((booster.bonus(&text, &refs) - 0.3).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn boost_never_lowers_and_respects_cap(
            raw in -1.0f32..1.0,
            cap in 0.0f32..1.0,
            boosts in prop::collection::vec(0.0f32..0.5, 0..4),
            text in "[a-z ]{0,60}",
        ) {
            let groups: Vec<KeywordGroup> = boosts
                .iter()
                .enumerate()
                .map(|(i, b)| group(&format!("g{}", i), &["a", "e", "o"], *b))
                .collect();
            let refs: Vec<&KeywordGroup> = groups.iter().collect();
            let boosted = Booster::new(cap).apply(raw, &text, &refs);
            prop_assert!(boosted >= raw);
            prop_assert!(boosted <= raw + cap + 1e-6);
        }
    }
}
