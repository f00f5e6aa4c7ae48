use similar::TextDiff;

use super::Variant;

/// Character-level similarity ratio at or above which two captions are
/// treated as near-duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.9;

/// Lowercase and collapse runs of whitespace to one space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

/// Similarity in `[0.0, 1.0]` of two texts after normalization.
pub fn similarity(left: &str, right: &str) -> f32 {
    let left = normalize_text(left);
    let right = normalize_text(right);
    if left == right {
        return 1.0;
    }
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    TextDiff::from_chars(left.as_str(), right.as_str()).ratio()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    threshold: f32,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl Deduplicator {
    pub fn new(threshold: f32) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_SIMILARITY_THRESHOLD
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_near_duplicate(&self, left: &str, right: &str) -> bool {
        similarity(left, right) >= self.threshold
    }

    /// Collapse near-duplicate captions inside one batch; the first
    /// occurrence survives. Idempotent on its own output.
    pub fn dedup(&self, variants: &[Variant]) -> Vec<Variant> {
        let mut kept: Vec<Variant> = Vec::with_capacity(variants.len());
        for variant in variants {
            if kept
                .iter()
                .any(|existing| self.is_near_duplicate(&existing.caption, &variant.caption))
            {
                continue;
            }
            kept.push(variant.clone());
        }
        kept
    }

    /// Indices of the variants that do not repeat a previously persisted
    /// caption, in order. `keep` always survives when it is in range; for a
    /// non-empty batch the result is never empty.
    pub fn dedup_against(
        &self,
        history: &[String],
        variants: &[Variant],
        keep: usize,
    ) -> Vec<usize> {
        let mut fresh: Vec<usize> = (0..variants.len())
            .filter(|idx| {
                *idx == keep
                    || !history
                        .iter()
                        .any(|previous| self.is_near_duplicate(previous, &variants[*idx].caption))
            })
            .collect();
        if fresh.is_empty() && !variants.is_empty() {
            fresh.push(0);
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_text, similarity, Deduplicator};
    use crate::variants::{SafetyLevel, Variant};

    fn variant(caption: &str) -> Variant {
        Variant {
            caption: caption.to_string(),
            alt: "alt".to_string(),
            hashtags: Vec::new(),
            cta: "cta".to_string(),
            mood: "calm".to_string(),
            style: "plain".to_string(),
            safety_level: SafetyLevel::Normal,
            nsfw: false,
        }
    }

    #[test]
    fn normalization_ignores_case_and_spacing() {
        assert_eq!(normalize_text("  Hello\n\tWORLD  "), "hello world");
        assert_eq!(similarity("Hello   World", "hello world"), 1.0);
        assert_eq!(similarity("", "anything"), 0.0);
    }

    #[test]
    fn near_duplicates_collapse_first_wins() {
        let batch = vec![
            variant("Fresh coffee every morning at the corner shop"),
            variant("Fresh coffee every morning at the corner shop!"),
            variant("Late night pastries, baked while you sleep"),
            variant("FRESH COFFEE   every morning at the corner shop"),
        ];
        let deduped = Deduplicator::default().dedup(&batch);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].caption, batch[0].caption);
        assert_eq!(deduped[1].caption, batch[2].caption);
    }

    #[test]
    fn dedup_is_idempotent() {
        let batch = vec![
            variant("Sunrise hike, zero regrets"),
            variant("Sunrise hike, zero regrets."),
            variant("Trail mix and good company"),
            variant("Summit views worth every step"),
        ];
        let dedup = Deduplicator::default();
        let once = dedup.dedup(&batch);
        let twice = dedup.dedup(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn all_duplicates_leave_exactly_one() {
        let batch = vec![variant("Same"), variant("same"), variant(" SAME ")];
        assert_eq!(Deduplicator::default().dedup(&batch).len(), 1);
    }

    #[test]
    fn history_dedup_keeps_fresh_and_the_pinned_variant() {
        let dedup = Deduplicator::default();
        let history = vec!["Weekend sale starts now".to_string()];
        let batch = vec![
            variant("Weekend sale starts now!"),
            variant("New arrivals just landed"),
            variant("weekend sale STARTS now"),
        ];
        assert_eq!(dedup.dedup_against(&history, &batch, 1), vec![1]);
        assert_eq!(dedup.dedup_against(&history, &batch, 2), vec![1, 2]);

        let stale = vec![variant("weekend sale starts now")];
        assert_eq!(dedup.dedup_against(&history, &stale, 7), vec![0]);
        assert!(dedup.dedup_against(&history, &[], 0).is_empty());
        assert_eq!(dedup.dedup_against(&[], &batch, 0), vec![0, 1, 2]);
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(Deduplicator::new(3.0).threshold(), 1.0);
        assert_eq!(Deduplicator::new(f32::NAN).threshold(), 0.9);
    }
}
