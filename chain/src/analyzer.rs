//! Content admission gate for posted images.
//!
//! Defines an `ImageAnalyzer` trait producing byte statistics for an image
//! payload, and an `AdmissionGate` that accepts a post only when those
//! statistics fall inside the configured thresholds. The default analyzer,
//! `ByteStatistics`, measures:
//! - Shannon entropy of the byte histogram, in bits (0.0..=8.0)
//! - population standard deviation of the byte values (0.0..=127.5)
//!
//! Compressed photographs are high-entropy streams with a moderate spread.
//! Flat synthetic payloads fail the entropy floor.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ChainError, Result};

/// Statistics measured on an image payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetrics {
    pub entropy: f64,
    pub std_dev: f64,
}

/// Trait for pluggable image analyzers. Must be a pure function of the bytes.
pub trait ImageAnalyzer: Send + Sync + std::fmt::Debug {
    /// Measure the payload. Empty input yields zero metrics.
    fn analyze(&self, data: &[u8]) -> ImageMetrics;

    /// Return the name of this analyzer (for logging).
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// ByteStatistics — histogram entropy and standard deviation
// ---------------------------------------------------------------------------

/// Single-pass byte histogram analyzer.
#[derive(Clone, Debug, Default)]
pub struct ByteStatistics;

impl ImageAnalyzer for ByteStatistics {
    fn analyze(&self, data: &[u8]) -> ImageMetrics {
        if data.is_empty() {
            return ImageMetrics::default();
        }

        let mut counts = [0u64; 256];
        let mut sum = 0.0f64;
        let mut sq_sum = 0.0f64;
        for &byte in data {
            counts[byte as usize] += 1;
            let v = byte as f64;
            sum += v;
            sq_sum += v * v;
        }

        let len = data.len() as f64;
        let entropy = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / len;
                -p * p.log2()
            })
            .sum();

        let mean = sum / len;
        // Rounding can push this a hair below zero for constant input.
        let variance = (sq_sum / len - mean * mean).max(0.0);

        ImageMetrics {
            entropy,
            std_dev: variance.sqrt(),
        }
    }

    fn name(&self) -> &str {
        "byte-statistics"
    }
}

// ---------------------------------------------------------------------------
// AdmissionPolicy / AdmissionGate
// ---------------------------------------------------------------------------

/// Acceptance thresholds for posted images.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionPolicy {
    pub min_entropy: f64,
    pub min_std_dev: f64,
    pub max_std_dev: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            min_entropy: 7.0,
            min_std_dev: 40.0,
            max_std_dev: 90.0,
        }
    }
}

impl AdmissionPolicy {
    /// `entropy >= min_entropy AND min_std_dev <= std_dev <= max_std_dev`.
    pub fn accepts(&self, metrics: &ImageMetrics) -> bool {
        metrics.entropy >= self.min_entropy
            && metrics.std_dev >= self.min_std_dev
            && metrics.std_dev <= self.max_std_dev
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_std_dev > self.max_std_dev {
            return Err(ChainError::Config(format!(
                "min_std_dev {} exceeds max_std_dev {}",
                self.min_std_dev, self.max_std_dev
            )));
        }
        if !(0.0..=8.0).contains(&self.min_entropy) {
            return Err(ChainError::Config(format!(
                "min_entropy {} outside 0..=8 bits",
                self.min_entropy
            )));
        }
        Ok(())
    }
}

/// Analyzer plus policy. Runs only for image posts.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    analyzer: Arc<dyn ImageAnalyzer>,
    policy: AdmissionPolicy,
}

impl AdmissionGate {
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>, policy: AdmissionPolicy) -> Self {
        Self { analyzer, policy }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }

    /// Analyze the payload and return its metrics if accepted.
    pub fn admit(&self, data: &[u8]) -> Result<ImageMetrics> {
        let metrics = self.analyzer.analyze(data);
        if data.is_empty() || !self.policy.accepts(&metrics) {
            return Err(ChainError::ContentRejected {
                entropy: metrics.entropy,
                std_dev: metrics.std_dev,
            });
        }
        Ok(metrics)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(Arc::new(ByteStatistics), AdmissionPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
