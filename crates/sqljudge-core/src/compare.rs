use crate::errors::ErrorKind;
use crate::model::MismatchPreview;
use crate::normalize::{cmp_rows, rows_match, NormValue, NormalizePolicy, NormalizedTable};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Match,
    ColumnMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    RowMismatch {
        columns: Vec<String>,
        /// First rows present in the reference only, canonical order.
        missing: Vec<Vec<NormValue>>,
        /// First rows present in the candidate only, canonical order.
        extra: Vec<Vec<NormValue>>,
        missing_total: usize,
        extra_total: usize,
    },
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    pub fn reason(&self) -> Option<ErrorKind> {
        match self {
            Self::Match => None,
            Self::ColumnMismatch { .. } => Some(ErrorKind::ColumnMismatch),
            Self::RowMismatch { .. } => Some(ErrorKind::RowMismatch),
        }
    }

    /// One-line description of the difference.
    pub fn summary(&self) -> String {
        match self {
            Self::Match => "results match".into(),
            Self::ColumnMismatch {
                missing,
                unexpected,
            } => {
                let mut parts = Vec::new();
                if !missing.is_empty() {
                    parts.push(format!("missing columns: {}", missing.join(", ")));
                }
                if !unexpected.is_empty() {
                    parts.push(format!("unexpected columns: {}", unexpected.join(", ")));
                }
                parts.join("; ")
            }
            Self::RowMismatch {
                missing_total,
                extra_total,
                ..
            } => format!("{missing_total} expected row(s) missing, {extra_total} unexpected row(s)"),
        }
    }

    pub fn preview(&self) -> Option<MismatchPreview> {
        let render = |rows: &[Vec<NormValue>]| -> Vec<Vec<String>> {
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect()
        };
        match self {
            Self::Match => None,
            Self::ColumnMismatch {
                missing,
                unexpected,
            } => Some(MismatchPreview::Columns {
                missing: missing.clone(),
                unexpected: unexpected.clone(),
            }),
            Self::RowMismatch {
                columns,
                missing,
                extra,
                missing_total,
                extra_total,
            } => Some(MismatchPreview::Rows {
                columns: columns.clone(),
                missing: render(missing),
                extra: render(extra),
                missing_total: *missing_total,
                extra_total: *extra_total,
            }),
        }
    }
}

/// Multiset comparison of two normalized tables.
///
/// Both row lists are already sorted, so a merge pass pairs off rows that sit
/// at the same canonical position. Rows equal only within the float tolerance
/// may sort apart (another column decides their order), so the leftovers of
/// the merge go through a second pass that pairs each missing row with the
/// first unpaired extra row matching it under [`rows_match`]. Both passes walk
/// canonical order, so the outcome is deterministic.
pub fn compare(
    reference: &NormalizedTable,
    candidate: &NormalizedTable,
    policy: &NormalizePolicy,
    preview_rows: usize,
) -> Comparison {
    if reference.columns != candidate.columns {
        let missing = reference
            .columns
            .iter()
            .filter(|c| candidate.columns.binary_search(c).is_err())
            .cloned()
            .collect();
        let unexpected = candidate
            .columns
            .iter()
            .filter(|c| reference.columns.binary_search(c).is_err())
            .cloned()
            .collect();
        return Comparison::ColumnMismatch {
            missing,
            unexpected,
        };
    }

    let (r, c) = (&reference.rows, &candidate.rows);
    let (mut i, mut j) = (0, 0);
    let mut only_ref: Vec<&[NormValue]> = Vec::new();
    let mut only_cand: Vec<&[NormValue]> = Vec::new();

    while i < r.len() || j < c.len() {
        let ord = match (r.get(i), c.get(j)) {
            (Some(a), Some(b)) => cmp_rows(a, b, policy),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match ord {
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                only_ref.push(&r[i]);
                i += 1;
            }
            Ordering::Greater => {
                only_cand.push(&c[j]);
                j += 1;
            }
        }
    }

    let mut paired = vec![false; only_cand.len()];
    if !only_ref.is_empty() && !only_cand.is_empty() {
        only_ref.retain(|row| {
            let hit = (0..only_cand.len())
                .find(|&k| !paired[k] && rows_match(row, only_cand[k], policy));
            match hit {
                Some(k) => {
                    paired[k] = true;
                    false
                }
                None => true,
            }
        });
    }
    let only_cand: Vec<&[NormValue]> = only_cand
        .into_iter()
        .zip(&paired)
        .filter_map(|(row, &taken)| (!taken).then_some(row))
        .collect();

    if only_ref.is_empty() && only_cand.is_empty() {
        return Comparison::Match;
    }
    let first = |rows: &[&[NormValue]]| -> Vec<Vec<NormValue>> {
        rows.iter().take(preview_rows).map(|row| row.to_vec()).collect()
    };
    Comparison::RowMismatch {
        columns: reference.columns.clone(),
        missing: first(&only_ref),
        extra: first(&only_cand),
        missing_total: only_ref.len(),
        extra_total: only_cand.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResultTable, Value};
    use crate::normalize::normalize;

    fn norm(cols: &[&str], rows: Vec<Vec<Value>>, p: &NormalizePolicy) -> NormalizedTable {
        let t = ResultTable::new(cols.iter().map(|c| c.to_string()).collect(), rows).unwrap();
        normalize(&t, p)
    }

    #[test]
    fn identical_multisets_match() {
        let p = NormalizePolicy::default();
        let a = norm(
            &["id", "name"],
            vec![
                vec![Value::Integer(2), Value::Text("b".into())],
                vec![Value::Integer(1), Value::Text("a".into())],
            ],
            &p,
        );
        let b = norm(
            &["name", "id"],
            vec![
                vec![Value::Text("a".into()), Value::Integer(1)],
                vec![Value::Text("b".into()), Value::Integer(2)],
            ],
            &p,
        );
        assert!(compare(&a, &b, &p, 5).is_match());
    }

    #[test]
    fn column_mismatch_names_the_difference() {
        let p = NormalizePolicy::default();
        let a = norm(&["avg", "student_id"], vec![], &p);
        let b = norm(&["student_id", "total"], vec![], &p);
        match compare(&a, &b, &p, 5) {
            Comparison::ColumnMismatch {
                missing,
                unexpected,
            } => {
                assert_eq!(missing, vec!["avg".to_string()]);
                assert_eq!(unexpected, vec!["total".to_string()]);
            }
            other => panic!("expected column mismatch, got {other:?}"),
        }
    }

    #[test]
    fn row_mismatch_counts_both_sides() {
        let p = NormalizePolicy::default();
        let a = norm(
            &["x"],
            vec![
                vec![Value::Integer(1)],
                vec![Value::Integer(2)],
                vec![Value::Integer(2)],
            ],
            &p,
        );
        let b = norm(
            &["x"],
            vec![vec![Value::Integer(2)], vec![Value::Integer(3)]],
            &p,
        );
        let cmp = compare(&a, &b, &p, 5);
        assert_eq!(cmp.reason(), Some(ErrorKind::RowMismatch));
        match cmp.preview() {
            Some(MismatchPreview::Rows {
                missing,
                extra,
                missing_total,
                extra_total,
                ..
            }) => {
                assert_eq!(missing_total, 2);
                assert_eq!(extra_total, 1);
                assert_eq!(missing, vec![vec!["1".to_string()], vec!["2".to_string()]]);
                assert_eq!(extra, vec![vec!["3".to_string()]]);
            }
            other => panic!("unexpected preview {other:?}"),
        }
    }

    #[test]
    fn preview_is_bounded_but_totals_are_not() {
        let p = NormalizePolicy::default();
        let a = norm(&["x"], (0..20).map(|i| vec![Value::Integer(i)]).collect(), &p);
        let b = norm(&["x"], vec![], &p);
        match compare(&a, &b, &p, 5) {
            Comparison::RowMismatch {
                missing,
                missing_total,
                ..
            } => {
                assert_eq!(missing.len(), 5);
                assert_eq!(missing_total, 20);
                assert!(matches!(missing[0][0], NormValue::Int(0)));
            }
            other => panic!("expected row mismatch, got {other:?}"),
        }
    }

    #[test]
    fn tolerance_applies_inside_the_merge() {
        let loose = NormalizePolicy {
            float_abs_tolerance: 0.01,
            ..NormalizePolicy::default()
        };
        let a = norm(&["avg"], vec![vec![Value::Real(85.0)]], &loose);
        let b = norm(&["avg"], vec![vec![Value::Real(85.001)]], &loose);
        assert!(compare(&a, &b, &loose, 5).is_match());
        assert!(!compare(&a, &b, &NormalizePolicy::exact(), 5).is_match());
    }

    #[test]
    fn rows_equal_within_tolerance_pair_across_sort_positions() {
        // `avg` sorts first, so the exact order of the rows is decided by the
        // float column and the names end up crossed.
        let p = NormalizePolicy::default();
        let a = norm(
            &["avg", "name"],
            vec![
                vec![Value::Real(1.0000001), Value::Text("b".into())],
                vec![Value::Real(1.0000002), Value::Text("a".into())],
            ],
            &p,
        );
        let b = norm(
            &["avg", "name"],
            vec![
                vec![Value::Real(1.0000002), Value::Text("b".into())],
                vec![Value::Real(1.0000001), Value::Text("a".into())],
            ],
            &p,
        );
        assert!(compare(&a, &b, &p, 5).is_match());
        assert!(!compare(&a, &b, &NormalizePolicy::exact(), 5).is_match());
    }

    #[test]
    fn leftover_pairing_still_counts_duplicates() {
        let p = NormalizePolicy::default();
        let a = norm(
            &["avg", "name"],
            vec![
                vec![Value::Real(2.0000001), Value::Text("x".into())],
                vec![Value::Real(2.0000001), Value::Text("x".into())],
            ],
            &p,
        );
        let b = norm(
            &["avg", "name"],
            vec![vec![Value::Real(2.0000002), Value::Text("x".into())]],
            &p,
        );
        match compare(&a, &b, &p, 5) {
            Comparison::RowMismatch {
                missing_total,
                extra_total,
                ..
            } => {
                assert_eq!(missing_total, 1);
                assert_eq!(extra_total, 0);
            }
            other => panic!("expected row mismatch, got {other:?}"),
        }
    }

    #[test]
    fn comparison_is_deterministic() {
        let p = NormalizePolicy::default();
        let a = norm(
            &["x"],
            vec![vec![Value::Text("z".into())], vec![Value::Text("a".into())]],
            &p,
        );
        let b = norm(&["x"], vec![vec![Value::Text("m".into())]], &p);
        assert_eq!(compare(&a, &b, &p, 5), compare(&a, &b, &p, 5));
    }
}
