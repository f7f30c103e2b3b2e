//! Model Classifier
//!
//! Wraps an externally supplied scoring function over the shared feature
//! layout. The engine never trains or loads a model itself; callers hand in
//! a scorer and this module folds its output into the common verdict
//! contract, falling back to the heuristic rules whenever the scorer fails.

use crate::logic::features::FeatureVector;
use super::heuristic::HeuristicClassifier;
use super::types::{ModelError, Verdict};

/// Externally supplied scoring function.
///
/// Input is the versioned feature vector; output is an attack score in
/// [0, 1]. Calibration of the decision threshold is configuration, not a
/// property of the scorer.
pub type ScoreFn = dyn Fn(&FeatureVector) -> Result<f32, ModelError> + Send + Sync;

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Model-backed classifier with mandatory heuristic fallback
pub struct ModelClassifier {
    scorer: Box<ScoreFn>,
    /// Score at or above which the flow is labeled malicious
    threshold: f32,
    fallback: HeuristicClassifier,
}

impl ModelClassifier {
    pub fn new(scorer: Box<ScoreFn>, threshold: f32, fallback: HeuristicClassifier) -> Self {
        Self {
            scorer,
            threshold: threshold.clamp(0.0, 1.0),
            fallback,
        }
    }

    pub fn predict(&self, features: &FeatureVector) -> Verdict {
        if features.is_degenerate() {
            log::warn!("Degenerate feature vector, defaulting to benign");
            return Verdict::benign(0.1).with_reason("Degenerate feature vector".to_string());
        }

        if let Err(e) = features.validate() {
            log::warn!("Feature layout mismatch, using heuristic rules: {}", e);
            return self.fallback.predict(features);
        }

        match (self.scorer)(features) {
            Ok(raw) => {
                let score = raw.clamp(0.0, 1.0);
                if score >= self.threshold {
                    Verdict::malicious(
                        score,
                        vec![format!(
                            "Model score {:.3} >= threshold {:.2}",
                            score, self.threshold
                        )],
                    )
                } else {
                    Verdict::benign(1.0 - score)
                }
            }
            Err(e) => {
                // A scorer failure never propagates; the heuristic rules
                // take over for this prediction.
                log::warn!("Model scoring failed ({}), using heuristic rules", e);
                self.fallback.predict(features)
            }
        }
    }
}

impl std::fmt::Debug for ModelClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClassifier")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
