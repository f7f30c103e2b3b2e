//! Heuristic Classifier
//!
//! Threshold rules over the feature vector, no external model required.
//! Deterministic and explainable: every fired rule contributes a reason.

use crate::logic::features::FeatureVector;
use super::types::{Label, Verdict};

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Heuristic rule cutoffs (all configurable)
#[derive(Debug, Clone)]
pub struct HeuristicThresholds {
    /// Packets per second above which a flow is flood-rate
    pub rate_threshold: f32,
    /// SYN packets / total packets above which a flow looks like a SYN flood
    pub syn_ratio_threshold: f32,
    /// Bytes per second above which a flow is bandwidth-exhausting
    pub byte_rate_threshold: f32,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            rate_threshold: 1000.0,
            syn_ratio_threshold: 0.8,
            byte_rate_threshold: 10_000_000.0,
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Rule-based classifier.
///
/// Malicious iff any rule fires. Confidence grows with the number of fired
/// rules and the margin above threshold, clamped to [0, 1]; a benign verdict
/// is more confident the further the flow sits below every cutoff.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    thresholds: HeuristicThresholds,
}

impl HeuristicClassifier {
    pub fn new(thresholds: HeuristicThresholds) -> Self {
        Self { thresholds }
    }

    pub fn predict(&self, features: &FeatureVector) -> Verdict {
        // Degenerate input is recovered locally: a low-confidence benign
        // verdict biases toward false negatives over spurious mass-blocking.
        if features.is_degenerate() {
            log::warn!("Degenerate feature vector, defaulting to benign");
            return Verdict::benign(0.1).with_reason("Degenerate feature vector".to_string());
        }

        let rate = features.get_by_name("packet_rate").unwrap_or(0.0);
        let syn_ratio = features.get_by_name("syn_ratio").unwrap_or(0.0);
        let byte_rate = features.get_by_name("byte_rate").unwrap_or(0.0);

        let mut reasons = Vec::new();
        let mut fired = 0u32;
        let mut max_margin = 0.0f32;

        let mut rule = |value: f32, threshold: f32, reason: String| {
            if threshold > 0.0 && value > threshold {
                fired += 1;
                max_margin = max_margin.max((value - threshold) / threshold);
                reasons.push(reason);
            }
        };

        rule(
            rate,
            self.thresholds.rate_threshold,
            format!(
                "High packet rate: {:.0} pps (threshold {:.0})",
                rate, self.thresholds.rate_threshold
            ),
        );
        rule(
            syn_ratio,
            self.thresholds.syn_ratio_threshold,
            format!(
                "SYN flood pattern: ratio {:.2} (threshold {:.2})",
                syn_ratio, self.thresholds.syn_ratio_threshold
            ),
        );
        rule(
            byte_rate,
            self.thresholds.byte_rate_threshold,
            format!(
                "High bandwidth: {:.1} MB/s (threshold {:.1})",
                byte_rate / 1_000_000.0,
                self.thresholds.byte_rate_threshold / 1_000_000.0
            ),
        );

        if fired == 0 {
            // Benign confidence shrinks as the flow approaches any cutoff
            let closest = [
                rate / self.thresholds.rate_threshold.max(f32::EPSILON),
                syn_ratio / self.thresholds.syn_ratio_threshold.max(f32::EPSILON),
                byte_rate / self.thresholds.byte_rate_threshold.max(f32::EPSILON),
            ]
            .into_iter()
            .fold(0.0f32, f32::max);
            return Verdict::benign((1.0 - closest).clamp(0.05, 1.0));
        }

        let confidence = 0.4 + 0.2 * fired.min(3) as f32 + 0.4 * max_margin.min(1.0);
        Verdict::malicious(confidence, reasons)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::FeatureVector;

    fn features(rate: f32, syn_ratio: f32, byte_rate: f32) -> FeatureVector {
        let mut v = FeatureVector::new();
        v.set_by_name("packet_rate", rate);
        v.set_by_name("syn_ratio", syn_ratio);
        v.set_by_name("byte_rate", byte_rate);
        v.set_by_name("avg_packet_size", 60.0);
        v
    }

    #[test]
    fn test_flood_above_both_thresholds_is_confident() {
        let classifier = HeuristicClassifier::default();
        let verdict = classifier.predict(&features(1500.0, 0.95, 90_000.0));

        assert_eq!(verdict.label, Label::Malicious);
        // Two rules fired => confidence at least 0.8, clearing the default
        // enforcement cutoff of 0.7
        assert!(verdict.confidence >= 0.8);
        assert_eq!(verdict.reasons.len(), 2);
    }

    #[test]
    fn test_half_rate_low_syn_is_benign() {
        let classifier = HeuristicClassifier::default();
        let verdict = classifier.predict(&features(500.0, 0.1, 30_000.0));

        assert_eq!(verdict.label, Label::Benign);
        assert!(verdict.confidence > 0.0 && verdict.confidence <= 1.0);
    }

    #[test]
    fn test_single_rule_low_margin_is_weak() {
        let classifier = HeuristicClassifier::default();
        let verdict = classifier.predict(&features(1001.0, 0.1, 30_000.0));

        assert_eq!(verdict.label, Label::Malicious);
        // Barely above one threshold stays under the enforcement cutoff
        assert!(verdict.confidence < 0.7);
    }

    #[test]
    fn test_confidence_clamped() {
        let classifier = HeuristicClassifier::default();
        let verdict = classifier.predict(&features(1_000_000.0, 1.0, 1e12));
        assert_eq!(verdict.label, Label::Malicious);
        assert!(verdict.confidence <= 1.0);
    }

    #[test]
    fn test_degenerate_input_recovers_benign() {
        let classifier = HeuristicClassifier::default();
        let mut bad = features(f32::NAN, 0.0, 0.0);
        bad.set_by_name("packet_rate", f32::NAN);
        let verdict = classifier.predict(&bad);

        assert_eq!(verdict.label, Label::Benign);
        assert!(verdict.confidence <= 0.1);
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier = HeuristicClassifier::new(HeuristicThresholds {
            rate_threshold: 100.0,
            syn_ratio_threshold: 0.5,
            byte_rate_threshold: 1_000.0,
        });
        let verdict = classifier.predict(&features(250.0, 0.9, 5_000.0));
        assert_eq!(verdict.label, Label::Malicious);
        // Three rules fired
        assert_eq!(verdict.reasons.len(), 3);
        assert_eq!(verdict.confidence, 1.0);
    }
}
