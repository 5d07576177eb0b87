//! File formats shared between pipeline stages run as separate jobs.
//!
//! Nuggets travel as headerless TSV with the fixed columns
//! `qid, nugget_id, nugget_text, importance, assignment`. Labels are stored
//! numerically (importance `vital = 1`, `okay = 0`; assignment as its support
//! value), `-1` when not yet computed and `failed` when the window degraded.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{NuggetError, Result};
use crate::metrics::Metric;
use crate::types::{AssignMode, AssignedScoredNugget, Assignment, Importance, Nugget, Request, ScoredNugget, FAILED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Missing,
    Value(u8),
    Failed,
}

impl Grade {
    pub fn value(self) -> Option<u8> {
        match self {
            Grade::Value(v) => Some(v),
            Grade::Missing | Grade::Failed => None,
        }
    }

    fn from_option(v: Option<u8>, failed: bool) -> Self {
        match v {
            Some(v) => Grade::Value(v),
            None if failed => Grade::Failed,
            None => Grade::Missing,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Missing => f.write_str("-1"),
            Grade::Value(v) => write!(f, "{v}"),
            Grade::Failed => f.write_str(FAILED),
        }
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "-1" => Ok(Grade::Missing),
            FAILED => Ok(Grade::Failed),
            other => other.parse().map(Grade::Value).map_err(|_| format!("invalid grade '{other}'")),
        }
    }
}

impl Serialize for Grade {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Grade {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// One TSV row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NuggetRecord {
    pub qid: String,
    pub nugget_id: String,
    pub nugget: String,
    pub importance: Grade,
    pub assignment: Grade,
}

impl NuggetRecord {
    pub fn from_scored(qid: &str, n: &ScoredNugget) -> Self {
        Self {
            qid: qid.to_string(),
            nugget_id: n.nugget.id.clone(),
            nugget: n.nugget.text.clone(),
            importance: Grade::from_option(n.importance.value(), n.importance == Importance::Failed),
            assignment: Grade::Missing,
        }
    }

    pub fn from_assigned(qid: &str, n: &AssignedScoredNugget, mode: AssignMode) -> Self {
        Self {
            assignment: Grade::from_option(n.assignment.value(mode), n.assignment == Assignment::Failed),
            ..Self::from_scored(qid, &n.scored)
        }
    }
}

/// A candidate answer to judge against a query's nuggets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub qid: String,
    #[serde(default)]
    pub answer_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(alias = "qanswer", alias = "answer")]
    pub text: String,
}

fn tsv_writer<W: Write>(w: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b'\t').has_headers(false).from_writer(w)
}

pub fn write_nuggets<W: Write>(w: W, records: &[NuggetRecord]) -> Result<()> {
    let mut wtr = tsv_writer(w);
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_nuggets<R: Read>(r: R) -> Result<Vec<NuggetRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(true)
        .from_reader(r);
    rdr.deserialize().map(|row| row.map_err(NuggetError::from)).collect()
}

pub fn save_nuggets(path: impl AsRef<Path>, records: &[NuggetRecord]) -> Result<()> {
    write_nuggets(File::create(path)?, records)
}

pub fn load_nuggets(path: impl AsRef<Path>) -> Result<Vec<NuggetRecord>> {
    read_nuggets(File::open(path)?)
}

/// Rebuilds each query's scored nuggets, in file order, for the assign stage.
pub fn scored_from_records(records: &[NuggetRecord]) -> Result<BTreeMap<String, Vec<ScoredNugget>>> {
    let mut out: BTreeMap<String, Vec<ScoredNugget>> = BTreeMap::new();
    for r in records {
        let importance = match r.importance {
            Grade::Value(v) if v >= 1 => Importance::Vital,
            Grade::Value(_) => Importance::Okay,
            Grade::Failed => Importance::Failed,
            Grade::Missing => {
                return Err(NuggetError::MalformedInputTable {
                    query_id: r.qid.clone(),
                    nugget_id: r.nugget_id.clone(),
                    field: "importance",
                })
            }
        };
        out.entry(r.qid.clone()).or_default().push(ScoredNugget {
            nugget: Nugget { id: r.nugget_id.clone(), text: r.nugget.clone() },
            importance,
        });
    }
    Ok(out)
}

fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

pub fn read_requests(path: impl AsRef<Path>) -> Result<Vec<Request>> {
    read_jsonl(path.as_ref())
}

pub fn read_answers(path: impl AsRef<Path>) -> Result<Vec<Answer>> {
    read_jsonl(path.as_ref())
}

/// Metrics as `query_id<TAB>measure<TAB>value` lines, or JSON lines.
pub fn write_metrics<W: Write>(mut w: W, metrics: &[Metric], json: bool) -> Result<()> {
    for m in metrics {
        if json {
            serde_json::to_writer(&mut w, m)?;
            writeln!(w)?;
        } else {
            writeln!(w, "{}\t{}\t{:.4}", m.query_id, m.measure, m.value)?;
        }
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsv_uses_fixed_columns_and_minus_one_placeholders() {
        let scored = ScoredNugget { nugget: Nugget::new("7", 0, "Water boils at 100C"), importance: Importance::Vital };
        let mut buf = Vec::new();
        write_nuggets(&mut buf, &[NuggetRecord::from_scored("7", &scored)]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "7\t7_1\tWater boils at 100C\t1\t-1\n");
    }

    #[test]
    fn failed_labels_survive_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nuggets.tsv");
        let a = AssignedScoredNugget {
            scored: ScoredNugget { nugget: Nugget::new("q", 1, "text with \"quotes\""), importance: Importance::Okay },
            assignment: Assignment::Failed,
        };
        let rec = NuggetRecord::from_assigned("q", &a, AssignMode::SupportGrade3);
        save_nuggets(&path, &[rec.clone()]).unwrap();
        let back = load_nuggets(&path).unwrap();
        assert_eq!(back, vec![rec]);
        assert_eq!(back[0].assignment, Grade::Failed);
        assert_eq!(back[0].importance, Grade::Value(0));
    }

    #[test]
    fn scored_records_require_importance() {
        let rec = NuggetRecord {
            qid: "q".into(),
            nugget_id: "q_1".into(),
            nugget: "n".into(),
            importance: Grade::Missing,
            assignment: Grade::Missing,
        };
        assert!(matches!(scored_from_records(&[rec]), Err(NuggetError::MalformedInputTable { .. })));
    }

    #[test]
    fn answers_accept_original_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.jsonl");
        std::fs::write(&path, "{\"qid\":\"1\",\"qanswer\":\"forty two\"}\n\n{\"qid\":\"2\",\"text\":\"\"}\n").unwrap();
        let answers = read_answers(&path).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].text, "forty two");
        assert_eq!(answers[1].answer_id, None);
    }

    #[test]
    fn metrics_render_as_tsv() {
        let mut buf = Vec::new();
        let m = Metric { query_id: "q".into(), measure: "AllScore".into(), value: 0.5 };
        write_metrics(&mut buf, &[m], false).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "q\tAllScore\t0.5000\n");
    }
}
