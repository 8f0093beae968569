use rand::Rng;
use tracing::warn;

use crate::simulation::error::{AsimError, Result};
use crate::simulation::random::RandomChannel;

/// Utility of an alternative a chooser cannot choose.
pub const UNAVAILABLE: f64 = f64::NEG_INFINITY;

/// Multinomial logit probabilities. `None` if no alternative is available.
pub fn logit_probabilities(utilities: &[f64]) -> Option<Vec<f64>> {
    let max = utilities.iter().copied().fold(UNAVAILABLE, f64::max);
    if max == UNAVAILABLE {
        return None;
    }
    let exp: Vec<f64> = utilities.iter().map(|&u| (u - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    Some(exp.into_iter().map(|e| e / sum).collect())
}

/// Log of the sum of exponentiated utilities, the expected maximum utility of a choice.
pub fn logsum(utilities: &[f64]) -> f64 {
    let max = utilities.iter().copied().fold(UNAVAILABLE, f64::max);
    if max == UNAVAILABLE {
        return UNAVAILABLE;
    }
    max + utilities.iter().map(|&u| (u - max).exp()).sum::<f64>().ln()
}

/// Picks the alternative whose cumulative probability interval contains `draw` (in `[0, 1)`).
pub fn choose(probabilities: &[f64], draw: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, &p) in probabilities.iter().enumerate() {
        cumulative += p;
        if draw < cumulative && p > 0.0 {
            return i;
        }
    }
    // round off can leave the total slightly below 1
    probabilities.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}

/// Utilities of one choice model: a row of alternative utilities per chooser.
#[derive(Debug, Clone)]
pub struct UtilityMatrix {
    model: String,
    alternatives: Vec<String>,
    choosers: Vec<i64>,
    values: Vec<f64>,
}

impl UtilityMatrix {
    pub fn new(model: impl Into<String>, alternatives: Vec<String>) -> Self {
        UtilityMatrix {
            model: model.into(),
            alternatives,
            choosers: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_capacity(model: impl Into<String>, alternatives: Vec<String>, rows: usize) -> Self {
        let mut matrix = Self::new(model, alternatives);
        matrix.choosers.reserve(rows);
        matrix.values.reserve(rows * matrix.alternatives.len());
        matrix
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    pub fn len(&self) -> usize {
        self.choosers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choosers.is_empty()
    }

    /// Adds the utilities of `chooser`, one per alternative.
    pub fn push_row<I>(&mut self, chooser: i64, utilities: I)
    where
        I: IntoIterator<Item = f64>,
    {
        let before = self.values.len();
        self.values.extend(utilities);
        let n = self.alternatives.len();
        // pad or cut so that a malformed row cannot shift the following ones
        self.values.resize(before + n, UNAVAILABLE);
        self.choosers.push(chooser);
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.alternatives.len();
        &self.values[i * n..(i + 1) * n]
    }

    /// Warns about alternatives whose utility is the same for every chooser and fails on `NaN`
    /// or positive infinite utilities.
    pub fn check_for_variability(&self) -> Result<()> {
        for (a, alternative) in self.alternatives.iter().enumerate() {
            let mut first: Option<f64> = None;
            let mut varies = false;
            for (i, &chooser) in self.choosers.iter().enumerate() {
                let u = self.row(i)[a];
                if u.is_nan() || u == f64::INFINITY {
                    return Err(AsimError::InvalidUtility {
                        model: self.model.clone(),
                        alternative: alternative.clone(),
                        chooser,
                    });
                }
                match first {
                    None => first = Some(u),
                    Some(f) if f != u => varies = true,
                    _ => {}
                }
            }
            if !varies && self.len() > 1 {
                warn!(
                    "{}: utility of alternative `{alternative}` has no variability across {} choosers",
                    self.model,
                    self.len()
                );
            }
        }
        Ok(())
    }

    /// Draws one alternative index per chooser from the chooser's own random stream.
    pub fn simulate(&self, channel: &RandomChannel) -> Result<Vec<usize>> {
        self.choosers
            .iter()
            .enumerate()
            .map(|(i, &chooser)| {
                let probabilities = logit_probabilities(self.row(i)).ok_or_else(|| {
                    AsimError::NoAvailableAlternative {
                        model: self.model.clone(),
                        chooser,
                    }
                })?;
                let draw: f64 = channel.rng_for(chooser).random();
                Ok(choose(&probabilities, draw))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn probabilities_sum_to_one() {
        let p = logit_probabilities(&[0.0, (2.0_f64).ln(), UNAVAILABLE]).unwrap();
        assert_approx_eq!(p[0], 1.0 / 3.0);
        assert_approx_eq!(p[1], 2.0 / 3.0);
        assert_eq!(p[2], 0.0);
        assert!(logit_probabilities(&[UNAVAILABLE, UNAVAILABLE]).is_none());
    }

    #[test]
    fn large_utilities_do_not_overflow() {
        let p = logit_probabilities(&[1000.0, 1000.0]).unwrap();
        assert_approx_eq!(p[0], 0.5);
    }

    #[test]
    fn logsum_of_equal_alternatives() {
        assert_approx_eq!(logsum(&[0.0, 0.0]), (2.0_f64).ln());
        assert_eq!(logsum(&[UNAVAILABLE]), UNAVAILABLE);
    }

    #[test]
    fn choose_by_cumulative_probability() {
        let p = [0.2, 0.0, 0.5, 0.3];
        assert_eq!(choose(&p, 0.0), 0);
        assert_eq!(choose(&p, 0.19), 0);
        assert_eq!(choose(&p, 0.2), 2);
        assert_eq!(choose(&p, 0.69), 2);
        assert_eq!(choose(&p, 0.7), 3);
        assert_eq!(choose(&[0.5, 0.49999], 0.999999), 1);
    }

    #[test]
    fn simulate_respects_availability() {
        let channel = RandomChannel::new(0, "test");
        let mut matrix = UtilityMatrix::new("test", vec!["a".into(), "b".into()]);
        for chooser in 0..50 {
            matrix.push_row(chooser, [UNAVAILABLE, 0.0]);
        }
        assert!(matrix.simulate(&channel).unwrap().iter().all(|&c| c == 1));

        matrix.push_row(99, [UNAVAILABLE, UNAVAILABLE]);
        assert!(matches!(
            matrix.simulate(&channel),
            Err(AsimError::NoAvailableAlternative { chooser: 99, .. })
        ));
    }

    #[test]
    fn simulate_is_independent_of_other_choosers() {
        let channel = RandomChannel::new(3, "test");
        let alternatives: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let utilities = |c: i64| [0.0, (c % 3) as f64 * 0.1, 0.2];

        let mut all = UtilityMatrix::new("test", alternatives.clone());
        for c in 0..20 {
            all.push_row(c, utilities(c));
        }
        let mut tail = UtilityMatrix::new("test", alternatives);
        for c in 10..20 {
            tail.push_row(c, utilities(c));
        }
        assert_eq!(all.simulate(&channel).unwrap()[10..], tail.simulate(&channel).unwrap()[..]);
    }

    #[test]
    fn variability_check_rejects_nan() {
        let mut matrix = UtilityMatrix::new("test", vec!["a".into(), "b".into()]);
        matrix.push_row(1, [0.0, 1.0]);
        matrix.push_row(2, [0.0, 2.0]);
        assert!(matrix.check_for_variability().is_ok());
        matrix.push_row(3, [f64::NAN, 2.0]);
        assert!(matches!(
            matrix.check_for_variability(),
            Err(AsimError::InvalidUtility { chooser: 3, .. })
        ));
    }

    #[test]
    fn short_rows_are_padded() {
        let mut matrix = UtilityMatrix::new("test", vec!["a".into(), "b".into()]);
        matrix.push_row(1, [0.5]);
        matrix.push_row(2, [0.1, 0.2, 0.3]);
        assert_eq!(matrix.row(0), &[0.5, UNAVAILABLE]);
        assert_eq!(matrix.row(1), &[0.1, 0.2]);
    }
}
