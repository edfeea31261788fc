// Forward-looking labels: the points a player scores over the next rounds.

use crate::features::FeatureTable;

/// Rows of a feature table that carry a defined label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledRows {
    /// Indices into `FeatureTable::rows()`.
    pub rows: Vec<usize>,
    pub labels: Vec<f64>,
}

impl LabeledRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Label for every row, aligned with `table.rows()`.
///
/// The label of a row is the sum of the player's points over the next
/// `horizon` observed rows; rows past the end of the history contribute 0.
/// A player's last observed row has no label (`None`). Missing points count
/// as 0.
pub fn build_labels(table: &FeatureTable, horizon: usize) -> Vec<Option<f64>> {
    let rows = table.rows();
    let horizon = horizon.max(1);

    (0..rows.len())
        .map(|i| {
            let player = rows[i].player_id;
            let future = rows[i + 1..]
                .iter()
                .take(horizon)
                .take_while(|r| r.player_id == player);

            let mut observed = 0usize;
            let mut total = 0.0;
            for r in future {
                observed += 1;
                if r.points.is_finite() {
                    total += r.points;
                }
            }
            (observed > 0).then_some(total)
        })
        .collect()
}

/// Rows eligible for training: those whose label is defined.
pub fn labeled_rows(table: &FeatureTable, horizon: usize) -> LabeledRows {
    let mut out = LabeledRows::default();
    for (i, label) in build_labels(table, horizon).into_iter().enumerate() {
        if let Some(y) = label {
            out.rows.push(i);
            out.labels.push(y);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::features::tests::record;

    #[test]
    fn horizon_one_shifts_next_round() {
        let records = vec![record(1, 1, 2.0), record(1, 2, 5.0), record(1, 3, 3.0)];
        let table = build_features(&records);
        assert_eq!(build_labels(&table, 1), vec![Some(5.0), Some(3.0), None]);

        let labeled = labeled_rows(&table, 1);
        assert_eq!(labeled.rows, vec![0, 1]);
        assert_eq!(labeled.labels, vec![5.0, 3.0]);
    }

    #[test]
    fn longer_horizon_sums_and_zero_fills_the_tail() {
        let records = vec![
            record(1, 1, 2.0),
            record(1, 2, 5.0),
            record(1, 3, 3.0),
            record(1, 4, 4.0),
        ];
        let table = build_features(&records);
        assert_eq!(
            build_labels(&table, 2),
            vec![Some(8.0), Some(7.0), Some(4.0), None]
        );
    }

    #[test]
    fn labels_never_cross_players() {
        let records = vec![record(1, 1, 2.0), record(2, 1, 9.0), record(2, 2, 1.0)];
        let table = build_features(&records);
        assert_eq!(build_labels(&table, 3), vec![None, Some(1.0), None]);
    }

    #[test]
    fn missing_future_points_count_as_zero() {
        let records = vec![record(1, 1, 2.0), record(1, 2, f64::NAN), record(1, 3, 6.0)];
        let table = build_features(&records);
        assert_eq!(build_labels(&table, 2)[0], Some(6.0));
        assert_eq!(build_labels(&table, 1)[0], Some(0.0));
    }

    #[test]
    fn empty_table_has_no_labels() {
        let table = build_features(&[]);
        assert!(labeled_rows(&table, 1).is_empty());
    }
}
