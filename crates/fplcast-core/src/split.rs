// Chronological train/evaluation split on round boundaries.

use std::collections::BTreeSet;

use crate::features::FeatureTable;
use crate::target::LabeledRows;

/// Labelled rows partitioned by round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalSplit {
    pub train_rounds: Vec<u32>,
    pub eval_rounds: Vec<u32>,
    pub train: LabeledRows,
    pub eval: LabeledRows,
}

impl TemporalSplit {
    /// `false` when only one distinct round was available, in which case
    /// evaluation metrics are undefined.
    pub fn has_eval(&self) -> bool {
        !self.eval.is_empty()
    }
}

/// Number of leading rounds assigned to training: `floor(n * fraction)`,
/// but never fewer than one.
pub fn train_round_count(distinct_rounds: usize, fraction: f64) -> usize {
    if distinct_rounds == 0 {
        return 0;
    }
    let n = (distinct_rounds as f64 * fraction).floor() as usize;
    n.clamp(1, distinct_rounds)
}

/// Split eligible rows so every training round precedes every evaluation
/// round. Rounds are taken from the eligible rows only.
pub fn temporal_split(table: &FeatureTable, labeled: &LabeledRows, fraction: f64) -> TemporalSplit {
    let rows = table.rows();
    let rounds: Vec<u32> = labeled
        .rows
        .iter()
        .map(|&i| rows[i].gameweek)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let cut = train_round_count(rounds.len(), fraction);
    let (train_rounds, eval_rounds) = rounds.split_at(cut);
    let boundary = train_rounds.last().copied();

    let mut split = TemporalSplit {
        train_rounds: train_rounds.to_vec(),
        eval_rounds: eval_rounds.to_vec(),
        ..Default::default()
    };

    for (&i, &y) in labeled.rows.iter().zip(&labeled.labels) {
        let part = match boundary {
            Some(b) if rows[i].gameweek <= b => &mut split.train,
            _ => &mut split.eval,
        };
        part.rows.push(i);
        part.labels.push(y);
    }

    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::features::tests::record;
    use crate::target::labeled_rows;

    #[test]
    fn train_round_count_floors_with_minimum_one() {
        assert_eq!(train_round_count(0, 0.8), 0);
        assert_eq!(train_round_count(1, 0.8), 1);
        assert_eq!(train_round_count(2, 0.8), 1);
        assert_eq!(train_round_count(5, 0.8), 4);
        assert_eq!(train_round_count(9, 0.8), 7);
        assert_eq!(train_round_count(10, 0.8), 8);
    }

    #[test]
    fn training_rounds_precede_evaluation_rounds() {
        let records: Vec<_> = (1..=3)
            .flat_map(|p| (1..=11).map(move |gw| record(p, gw, (gw + p) as f64)))
            .collect();
        let table = build_features(&records);
        let labeled = labeled_rows(&table, 1);
        let split = temporal_split(&table, &labeled, 0.8);

        // Rounds 1..=10 are eligible; the first 8 train.
        assert_eq!(split.train_rounds, (1..=8).collect::<Vec<_>>());
        assert_eq!(split.eval_rounds, vec![9, 10]);

        let rows = table.rows();
        let max_train = split.train.rows.iter().map(|&i| rows[i].gameweek).max().unwrap();
        let min_eval = split.eval.rows.iter().map(|&i| rows[i].gameweek).min().unwrap();
        assert!(max_train < min_eval);
        assert_eq!(split.train.len() + split.eval.len(), labeled.len());
    }

    #[test]
    fn single_round_leaves_evaluation_empty() {
        // Player 1 appears in rounds 1 and 2, so only round 1 is eligible.
        let records = vec![record(1, 1, 2.0), record(1, 2, 3.0), record(2, 2, 4.0)];
        let table = build_features(&records);
        let labeled = labeled_rows(&table, 1);
        let split = temporal_split(&table, &labeled, 0.8);
        assert_eq!(split.train_rounds, vec![1]);
        assert!(split.eval_rounds.is_empty());
        assert!(!split.has_eval());
        assert_eq!(split.train.labels, vec![3.0]);
    }
}
