//! Classifier Types
//!
//! Data structures only - the decision logic lives in `heuristic` / `model`.

use serde::{Deserialize, Serialize};

// ============================================================================
// LABEL
// ============================================================================

/// Classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Normal traffic, no action needed
    Benign,
    /// Volumetric attack traffic, candidate for enforcement
    Malicious,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Benign => "benign",
            Label::Malicious => "malicious",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// VERDICT
// ============================================================================

/// Result of one classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    /// Confidence in the label, always clamped to [0, 1]
    pub confidence: f32,
    /// Human-readable reasons for the decision
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn benign(confidence: f32) -> Self {
        Self {
            label: Label::Benign,
            confidence: confidence.clamp(0.0, 1.0),
            reasons: Vec::new(),
        }
    }

    pub fn malicious(confidence: f32, reasons: Vec<String>) -> Self {
        Self {
            label: Label::Malicious,
            confidence: confidence.clamp(0.0, 1.0),
            reasons,
        }
    }

    pub fn with_reason(mut self, reason: String) -> Self {
        self.reasons.push(reason);
        self
    }

    pub fn is_malicious(&self) -> bool {
        self.label == Label::Malicious
    }
}

// ============================================================================
// MODEL ERROR
// ============================================================================

/// Failure inside an externally supplied scoring function
#[derive(Debug)]
pub struct ModelError(pub String);

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelError: {}", self.0)
    }
}

impl std::error::Error for ModelError {}

// ============================================================================
// TESTS
// ============================================================================
