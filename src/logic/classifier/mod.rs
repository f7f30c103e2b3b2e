//! Classifier
//!
//! Closed set of classifier variants behind one `predict` capability,
//! selected at construction time. Every variant upholds the same boundary:
//! classification never fails, never panics, and converts internal trouble
//! into a low-confidence benign verdict.

pub mod heuristic;
pub mod model;
pub mod types;

pub use heuristic::{HeuristicClassifier, HeuristicThresholds};
pub use model::{ModelClassifier, ScoreFn};
pub use types::{Label, ModelError, Verdict};

use crate::logic::config::EngineConfig;
use crate::logic::features::FeatureVector;

// ============================================================================
// CLASSIFIER VARIANTS
// ============================================================================

/// The classifier used by the engine
#[derive(Debug)]
pub enum Classifier {
    /// Threshold rules only
    Heuristic(HeuristicClassifier),
    /// Externally supplied scorer with heuristic fallback
    Model(ModelClassifier),
}

impl Classifier {
    /// Build from configuration: model-backed when a scorer is supplied,
    /// heuristic otherwise.
    pub fn from_config(config: &EngineConfig, scorer: Option<Box<ScoreFn>>) -> Self {
        let thresholds = HeuristicThresholds {
            rate_threshold: config.rate_threshold,
            syn_ratio_threshold: config.syn_ratio_threshold,
            byte_rate_threshold: config.byte_rate_threshold,
        };
        match scorer {
            Some(scorer) => Classifier::Model(ModelClassifier::new(
                scorer,
                config.model_threshold,
                HeuristicClassifier::new(thresholds),
            )),
            None => Classifier::Heuristic(HeuristicClassifier::new(thresholds)),
        }
    }

    pub fn predict(&self, features: &FeatureVector) -> Verdict {
        match self {
            Classifier::Heuristic(h) => h.predict(features),
            Classifier::Model(m) => m.predict(features),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::Heuristic(_) => "heuristic",
            Classifier::Model(_) => "model",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_selected_at_construction() {
        let config = EngineConfig::default();
        let heuristic = Classifier::from_config(&config, None);
        assert_eq!(heuristic.kind(), "heuristic");

        let model = Classifier::from_config(&config, Some(Box::new(|_| Ok(0.0))));
        assert_eq!(model.kind(), "model");
    }

    #[test]
    fn test_predict_dispatch() {
        let config = EngineConfig::default();
        // A scorer sees the raw feature values through the shared layout
        let scorer: Box<ScoreFn> = Box::new(|features| {
            let rate = features.as_slice().first().copied().unwrap_or(0.0);
            Ok(if rate > 0.0 { 0.99 } else { 0.01 })
        });
        let classifier = Classifier::from_config(&config, Some(scorer));

        let mut features = FeatureVector::new();
        features.set_by_name("packet_rate", 2_000.0);
        let verdict = classifier.predict(&features);
        assert_eq!(verdict.label, Label::Malicious);

        let quiet = classifier.predict(&FeatureVector::new());
        assert_eq!(quiet.label, Label::Benign);
    }
}
