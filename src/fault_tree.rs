//! Fault-tree evaluation: active DTCs → matched symptoms → cause scores.
//!
//! Cause scores are relative likelihoods. Weights of a cause shared by several
//! matched symptoms are multiplied, and the result is never normalized; a
//! consumer that needs a probability distribution must normalize it itself.

use crate::catalog::{DtcCode, FaultTreeCatalog};
use serde::Serialize;
use std::collections::BTreeMap;

/// Cause name → weight, as configured on one symptom.
pub type CauseWeights = BTreeMap<String, f64>;

/// Matched symptom name → its cause weights.
pub type SymptomMap = BTreeMap<String, CauseWeights>;

/// Cause name → combined relative likelihood score.
pub type CauseScores = BTreeMap<String, f64>;

/// Returns every symptom whose full condition set is contained in
/// `active_dtcs`. There is no partial credit.
pub fn match_symptoms(fault_tree: &FaultTreeCatalog, active_dtcs: &[DtcCode]) -> SymptomMap {
    fault_tree
        .symptoms
        .iter()
        .filter(|(_, symptom)| {
            symptom
                .conditions
                .iter()
                .all(|condition| active_dtcs.contains(condition))
        })
        .map(|(name, symptom)| (name.clone(), symptom.probable_cause_weights.clone()))
        .collect()
}

/// Combines cause weights across matched symptoms by multiplication. The
/// first occurrence of a cause seeds its score.
pub fn aggregate_cause_probabilities(symptoms: &SymptomMap) -> CauseScores {
    let mut scores = CauseScores::new();

    for weights in symptoms.values() {
        for (cause, &weight) in weights {
            scores
                .entry(cause.clone())
                .and_modify(|score| *score *= weight)
                .or_insert(weight);
        }
    }

    scores
}

/// One evaluated diagnosis of a vehicle's active DTCs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnosis {
    pub active_dtcs: Vec<DtcCode>,
    pub symptoms: SymptomMap,
    pub cause_scores: CauseScores,
}

impl Diagnosis {
    pub fn has_symptoms(&self) -> bool {
        !self.symptoms.is_empty()
    }

    /// Causes sorted by descending score, ties broken by name.
    pub fn ranked_causes(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .cause_scores
            .iter()
            .map(|(cause, &score)| (cause.as_str(), score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn most_probable_cause(&self) -> Option<(&str, f64)> {
        self.ranked_causes().into_iter().next()
    }
}

/// Runs both fault-tree stages over `active_dtcs`.
pub fn diagnose(fault_tree: &FaultTreeCatalog, active_dtcs: &[DtcCode]) -> Diagnosis {
    let symptoms = match_symptoms(fault_tree, active_dtcs);
    let cause_scores = aggregate_cause_probabilities(&symptoms);

    Diagnosis {
        active_dtcs: active_dtcs.to_vec(),
        symptoms,
        cause_scores,
    }
}
