//! Evidence-update rule for relationship strength and confidence.
//!
//! Strength is the evidence-weighted mean of every observed strength, which is
//! what `s' = (s*n + s_new)/(n+1)` computes incrementally. Confidence moves
//! toward 1 by `(1-c)*k` per corroboration and toward 0 by `c*k` per
//! contradiction.
//!
//! Applied step by step, mixed corroborations and contradictions do not
//! commute. The rule is therefore evaluated as a fold over the whole evidence
//! log: supports are applied before contradictions, and observed values are
//! summed in sorted order, so the result depends only on the multiset of
//! observations and never on their arrival order.

use crate::graph::types::Evidence;

/// Derived state of an evidence log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceSummary {
    pub strength: f64,
    pub confidence: f64,
    pub supporting: u64,
    pub contradicting: u64,
}

/// One corroborating step: `c + (1 - c) * k`.
pub fn corroborate(confidence: f64, gain: f64) -> f64 {
    (confidence + (1.0 - confidence) * gain).clamp(0.0, 1.0)
}

/// One contradicting step: `c - c * k`.
pub fn contradict(confidence: f64, gain: f64) -> f64 {
    (confidence - confidence * gain).clamp(0.0, 1.0)
}

/// Fold an evidence log into strength and confidence.
pub fn fold_evidence(evidence: &[Evidence], gain: f64) -> EvidenceSummary {
    if evidence.is_empty() {
        return EvidenceSummary {
            strength: 0.0,
            confidence: 0.0,
            supporting: 0,
            contradicting: 0,
        };
    }

    let n = evidence.len() as f64;
    let strength = sorted_sum(evidence.iter().map(|e| e.strength)) / n;
    let base = sorted_sum(evidence.iter().map(|e| e.confidence)) / n;

    let supporting = evidence.iter().filter(|e| e.is_supporting()).count() as u64;
    let contradicting = evidence.len() as u64 - supporting;

    // The first supporting observation sets the base; later ones corroborate it.
    let corroborations = supporting.saturating_sub(1);
    let mut confidence = 1.0 - (1.0 - base) * (1.0 - gain).powi(corroborations as i32);
    confidence *= (1.0 - gain).powi(contradicting as i32);

    EvidenceSummary {
        strength: strength.clamp(0.0, 1.0),
        confidence: confidence.clamp(0.0, 1.0),
        supporting,
        contradicting,
    }
}

fn sorted_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.into_iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn support(s: f64, c: f64) -> Evidence {
        Evidence::supporting(s, c, Utc::now())
    }

    fn against(s: f64, c: f64) -> Evidence {
        Evidence::contradicting(s, c, Utc::now())
    }

    #[test]
    fn test_single_observation_is_identity() {
        let summary = fold_evidence(&[support(0.8, 0.5)], 0.2);
        assert_eq!(summary.strength, 0.8);
        assert_eq!(summary.confidence, 0.5);
        assert_eq!(summary.supporting, 1);
    }

    #[test]
    fn test_strength_is_evidence_weighted_mean() {
        let summary = fold_evidence(&[support(0.8, 0.5), support(0.4, 0.5)], 0.2);
        assert!((summary.strength - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_matches_incremental_rule_for_equal_confidence() {
        let log = vec![support(0.5, 0.5); 4];
        let mut c = 0.5;
        for _ in 1..4 {
            c = corroborate(c, 0.2);
        }
        let summary = fold_evidence(&log, 0.2);
        assert!((summary.confidence - c).abs() < 1e-12);
    }

    #[test]
    fn test_contradiction_lowers_confidence() {
        let before = fold_evidence(&[support(0.7, 0.6)], 0.2);
        let after = fold_evidence(&[support(0.7, 0.6), against(0.7, 0.6)], 0.2);
        assert!(after.confidence < before.confidence);
        assert!((after.confidence - contradict(0.6, 0.2)).abs() < 1e-12);
        assert_eq!(after.contradicting, 1);
    }

    #[test]
    fn test_diminishing_returns() {
        let mut log = vec![support(0.5, 0.5)];
        let mut last = fold_evidence(&log, 0.2).confidence;
        let mut last_step = f64::INFINITY;
        for _ in 0..10 {
            log.push(support(0.5, 0.5));
            let c = fold_evidence(&log, 0.2).confidence;
            let step = c - last;
            assert!(step > 0.0);
            assert!(step < last_step);
            assert!(c < 1.0);
            last_step = step;
            last = c;
        }
    }

    #[test]
    fn test_mixed_order_is_irrelevant() {
        let a = fold_evidence(&[support(0.9, 0.4), against(0.2, 0.7), support(0.3, 0.8)], 0.2);
        let b = fold_evidence(&[against(0.2, 0.7), support(0.3, 0.8), support(0.9, 0.4)], 0.2);
        assert_eq!(a, b);
    }
}
