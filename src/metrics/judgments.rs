use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{NuggetError, Result};
use crate::io::{Grade, NuggetRecord};
use crate::types::{AssignMode, AssignedScoredNugget, FAILED};

/// Importance and support value of one nugget against one answer.
/// `None` marks a value that was never computed or failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub importance: Option<u8>,
    pub support: Option<u8>,
}

/// nugget id -> judgment
pub type QueryJudgments = HashMap<String, Judgment>;
/// query id -> nugget id -> judgment
pub type JudgmentTable = HashMap<String, QueryJudgments>;

pub fn judgments_from_assigned(nuggets: &[AssignedScoredNugget], mode: AssignMode, skip_degraded: bool) -> QueryJudgments {
    nuggets
        .iter()
        .filter(|n| !(skip_degraded && n.is_degraded()))
        .map(|n| {
            let judgment = Judgment {
                importance: n.scored.importance.value(),
                support: n.assignment.value(mode),
            };
            (n.id().to_string(), judgment)
        })
        .collect()
}

/// Groups interchange records by query. Records carrying a `failed` label or
/// the `failed` placeholder text are dropped when `skip_degraded` is set and
/// otherwise kept as missing values.
///
/// A `(qid, nugget_id)` pair may appear once: rows from several answers to the
/// same query cannot share one table.
pub fn judgments_from_records(records: &[NuggetRecord], skip_degraded: bool) -> Result<JudgmentTable> {
    let mut table = JudgmentTable::new();
    for r in records {
        let degraded = r.nugget == FAILED || r.importance == Grade::Failed || r.assignment == Grade::Failed;
        if skip_degraded && degraded {
            continue;
        }
        let judgment = if r.nugget == FAILED {
            Judgment::default()
        } else {
            Judgment { importance: r.importance.value(), support: r.assignment.value() }
        };
        if table.entry(r.qid.clone()).or_default().insert(r.nugget_id.clone(), judgment).is_some() {
            return Err(NuggetError::MalformedInputTable {
                query_id: r.qid.clone(),
                nugget_id: r.nugget_id.clone(),
                field: "a unique row",
            });
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Assignment, Importance, Nugget, ScoredNugget};

    fn assigned(i: usize, importance: Importance, assignment: Assignment) -> AssignedScoredNugget {
        AssignedScoredNugget {
            scored: ScoredNugget { nugget: Nugget::new("q", i, format!("n{i}")), importance },
            assignment,
        }
    }

    #[test]
    fn assigned_nuggets_use_the_grade_encoding() {
        let nuggets = vec![
            assigned(0, Importance::Vital, Assignment::Support),
            assigned(1, Importance::Okay, Assignment::PartialSupport),
            assigned(2, Importance::Failed, Assignment::NotSupport),
        ];
        let j = judgments_from_assigned(&nuggets, AssignMode::SupportGrade3, false);
        assert_eq!(j["q_1"], Judgment { importance: Some(1), support: Some(2) });
        assert_eq!(j["q_2"], Judgment { importance: Some(0), support: Some(1) });
        assert_eq!(j["q_3"].importance, None);

        let skipped = judgments_from_assigned(&nuggets, AssignMode::SupportGrade3, true);
        assert_eq!(skipped.len(), 2);
    }

    #[test]
    fn records_group_by_query() {
        let rec = |qid: &str, nid: &str, imp: Grade, asg: Grade| NuggetRecord {
            qid: qid.into(),
            nugget_id: nid.into(),
            nugget: "text".into(),
            importance: imp,
            assignment: asg,
        };
        let records = vec![
            rec("1", "1_1", Grade::Value(1), Grade::Value(2)),
            rec("1", "1_2", Grade::Value(0), Grade::Failed),
            rec("2", "2_1", Grade::Missing, Grade::Value(0)),
        ];
        let table = judgments_from_records(&records, false).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["1"]["1_2"].support, None);
        assert_eq!(table["2"]["2_1"].importance, None);
        assert_eq!(judgments_from_records(&records, true).unwrap()["1"].len(), 1);
    }

    #[test]
    fn placeholder_nuggets_count_as_degraded() {
        let placeholder = NuggetRecord {
            qid: "q".into(),
            nugget_id: "q_1".into(),
            nugget: FAILED.into(),
            importance: Grade::Value(1),
            assignment: Grade::Value(2),
        };
        assert!(judgments_from_records(&[placeholder.clone()], true).unwrap().is_empty());
        let kept = judgments_from_records(&[placeholder], false).unwrap();
        assert_eq!(kept["q"]["q_1"], Judgment::default());
    }

    #[test]
    fn repeated_rows_are_rejected() {
        let row = |support| NuggetRecord {
            qid: "q".into(),
            nugget_id: "q_1".into(),
            nugget: "text".into(),
            importance: Grade::Value(1),
            assignment: Grade::Value(support),
        };
        let err = judgments_from_records(&[row(2), row(0)], false).unwrap_err();
        assert!(matches!(err, NuggetError::MalformedInputTable { ref nugget_id, .. } if nugget_id == "q_1"));
    }
}
