//! Metric aggregation over per-query judgment tables.
//!
//! Support values follow the assigner encoding: `not_support = 0`,
//! `partial_support = 1`, `support = 2` in 3-grade mode and `support = 1` in
//! 2-grade mode. A value above `partial_rel` counts as full support, a
//! positive value at or below it as partial support.
//!
//! Every score is in `[0, 1]` and is 0 when its nugget set or denominator is
//! empty.

mod judgments;

pub use judgments::{judgments_from_assigned, judgments_from_records, Judgment, JudgmentTable, QueryJudgments};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{NuggetError, Result};
use crate::types::AssignMode;

/// Weight of an okay nugget relative to a vital one in [`ScoreKind::WeightedScore`].
pub const OKAY_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreKind {
    AllScore,
    VitalScore,
    WeightedScore,
}

/// Aggregation parameters shared by every score kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Drop partial credit. WeightedScore ignores it.
    pub strict: bool,
    /// Largest support value that still counts as partial.
    pub partial_rel: u8,
    pub partial_weight: f64,
    /// Smallest importance value that counts as vital.
    pub vital_threshold: u8,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self { strict: false, partial_rel: 1, partial_weight: 0.5, vital_threshold: 1 }
    }
}

impl MetricConfig {
    /// Defaults matching the assigner's grade encoding; 2-grade output has no
    /// partial tier, so every positive value is full support.
    pub fn for_mode(mode: AssignMode) -> Self {
        match mode {
            AssignMode::SupportGrade3 => Self::default(),
            AssignMode::SupportGrade2 => Self { partial_rel: 0, ..Self::default() },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.partial_weight) {
            return Err(NuggetError::UnsupportedMeasure(format!(
                "partial_weight must be within [0, 1], got {}",
                self.partial_weight
            )));
        }
        Ok(())
    }
}

type AggregateFn = fn(&[Judgment], &MetricConfig) -> f64;

const MEASURES: [(ScoreKind, &str, bool, AggregateFn); 3] = [
    (ScoreKind::AllScore, "AllScore", false, all_score),
    (ScoreKind::VitalScore, "VitalScore", true, vital_score),
    (ScoreKind::WeightedScore, "WeightedScore", true, weighted_score),
];

impl ScoreKind {
    fn entry(self) -> &'static (ScoreKind, &'static str, bool, AggregateFn) {
        // table rows follow declaration order
        &MEASURES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    fn needs_importance(self) -> bool {
        self.entry().2
    }

    pub fn from_name(name: &str) -> Result<Self> {
        MEASURES
            .iter()
            .find(|(_, n, ..)| *n == name)
            .map(|(k, ..)| *k)
            .ok_or_else(|| NuggetError::UnsupportedMeasure(name.to_string()))
    }
}

/// A score kind bound to its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub kind: ScoreKind,
    pub config: MetricConfig,
}

impl Measure {
    pub fn new(kind: ScoreKind, config: MetricConfig) -> Self {
        Self { kind, config }
    }

    /// Parses `Name` or `Name(key=value,...)` with keys `strict`,
    /// `partial_rel`, `partial_weight` and `rel` (vital threshold).
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with(raw, MetricConfig::default())
    }

    /// Like [`Measure::parse`], filling unnamed parameters from `base`.
    pub fn parse_with(raw: &str, base: MetricConfig) -> Result<Self> {
        let raw = raw.trim();
        let (name, params) = match raw.split_once('(') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| NuggetError::UnsupportedMeasure(format!("unbalanced parameters in '{raw}'")))?;
                (name.trim(), inner)
            }
            None => (raw, ""),
        };
        let kind = ScoreKind::from_name(name)?;
        let mut config = base;
        for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| NuggetError::UnsupportedMeasure(format!("parameter '{pair}' in '{raw}' has no value")))?;
            let bad = || NuggetError::UnsupportedMeasure(format!("invalid value for '{key}' in '{raw}'"));
            match key.trim() {
                "strict" => {
                    config.strict = match value.trim().to_lowercase().as_str() {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        _ => return Err(bad()),
                    }
                }
                "partial_rel" => config.partial_rel = value.trim().parse().map_err(|_| bad())?,
                "partial_weight" => config.partial_weight = value.trim().parse().map_err(|_| bad())?,
                "rel" => config.vital_threshold = value.trim().parse().map_err(|_| bad())?,
                other => {
                    return Err(NuggetError::UnsupportedMeasure(format!("unknown parameter '{other}' in '{raw}'")))
                }
            }
        }
        config.validate()?;
        Ok(Self { kind, config })
    }

    pub fn compute(&self, judgments: &[Judgment]) -> f64 {
        (self.kind.entry().3)(judgments, &self.config)
    }
}

/// Shows only the parameters that differ from [`MetricConfig::default`].
impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = MetricConfig::default();
        let mut params = Vec::new();
        if self.config.strict != d.strict {
            params.push(format!("strict={}", self.config.strict));
        }
        if self.config.partial_rel != d.partial_rel {
            params.push(format!("partial_rel={}", self.config.partial_rel));
        }
        if self.config.partial_weight != d.partial_weight {
            params.push(format!("partial_weight={}", self.config.partial_weight));
        }
        if self.config.vital_threshold != d.vital_threshold {
            params.push(format!("rel={}", self.config.vital_threshold));
        }
        if params.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}({})", self.kind.name(), params.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub query_id: String,
    pub measure: String,
    pub value: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    total: usize,
    full: usize,
    partial: usize,
}

fn tally<'a>(judgments: impl IntoIterator<Item = &'a Judgment>, partial_rel: u8) -> Tally {
    judgments.into_iter().fold(Tally::default(), |mut t, j| {
        let v = j.support.unwrap_or(0);
        t.total += 1;
        if v > partial_rel {
            t.full += 1;
        } else if v > 0 {
            t.partial += 1;
        }
        t
    })
}

/// Support credit of a set; nothing is earned without at least one full support.
fn credit(t: Tally, strict: bool, partial_weight: f64) -> f64 {
    if t.full == 0 {
        return 0.0;
    }
    let partial = if strict { 0.0 } else { partial_weight * t.partial as f64 };
    t.full as f64 + partial
}

fn ratio(t: Tally, strict: bool, partial_weight: f64) -> f64 {
    if t.total == 0 {
        return 0.0;
    }
    credit(t, strict, partial_weight) / t.total as f64
}

fn is_vital(j: &Judgment, cfg: &MetricConfig) -> bool {
    j.importance.is_some_and(|i| i >= cfg.vital_threshold)
}

pub fn all_score(judgments: &[Judgment], cfg: &MetricConfig) -> f64 {
    ratio(tally(judgments, cfg.partial_rel), cfg.strict, cfg.partial_weight)
}

pub fn vital_score(judgments: &[Judgment], cfg: &MetricConfig) -> f64 {
    let vital = tally(judgments.iter().filter(|j| is_vital(j, cfg)), cfg.partial_rel);
    ratio(vital, cfg.strict, cfg.partial_weight)
}

pub fn weighted_score(judgments: &[Judgment], cfg: &MetricConfig) -> f64 {
    let vital = tally(judgments.iter().filter(|j| is_vital(j, cfg)), cfg.partial_rel);
    let okay = tally(judgments.iter().filter(|j| !is_vital(j, cfg)), cfg.partial_rel);
    let denominator = vital.total as f64 + OKAY_WEIGHT * okay.total as f64;
    if denominator == 0.0 {
        return 0.0;
    }
    let numerator = credit(vital, false, cfg.partial_weight) + OKAY_WEIGHT * credit(okay, false, cfg.partial_weight);
    numerator / denominator
}

fn check_table(query_id: &str, judgments: &QueryJudgments, kind: ScoreKind) -> Result<()> {
    for (nugget_id, j) in judgments {
        let missing = if j.support.is_none() {
            Some("assignment")
        } else if kind.needs_importance() && j.importance.is_none() {
            Some("importance")
        } else {
            None
        };
        if let Some(field) = missing {
            return Err(NuggetError::MalformedInputTable {
                query_id: query_id.to_string(),
                nugget_id: nugget_id.clone(),
                field,
            });
        }
    }
    Ok(())
}

/// One metric per (query, measure). The output carries no ordering guarantee.
pub fn evaluate(table: &JudgmentTable, measures: &[Measure]) -> Result<Vec<Metric>> {
    for m in measures {
        m.config.validate()?;
    }
    let mut out = Vec::with_capacity(table.len() * measures.len());
    for (query_id, judgments) in table {
        let values: Vec<Judgment> = judgments.values().copied().collect();
        for m in measures {
            check_table(query_id, judgments, m.kind)?;
            out.push(Metric { query_id: query_id.clone(), measure: m.to_string(), value: m.compute(&values) });
        }
    }
    Ok(out)
}

/// Parses measure strings and evaluates them in one step.
pub fn evaluate_named(table: &JudgmentTable, names: &[&str], base: MetricConfig) -> Result<Vec<Metric>> {
    let measures = names.iter().map(|n| Measure::parse_with(n, base)).collect::<Result<Vec<_>>>()?;
    evaluate(table, &measures)
}

/// Mean of each measure over all queries, reported under query id `all`.
pub fn summarize_mean(metrics: &[Metric]) -> Vec<Metric> {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for m in metrics {
        let e = sums.entry(m.measure.as_str()).or_default();
        e.0 += m.value;
        e.1 += 1;
    }
    sums.into_iter()
        .map(|(measure, (sum, n))| Metric { query_id: "all".to_string(), measure: measure.to_string(), value: sum / n as f64 })
        .collect()
}

/// Strict and lenient variants of the three scores for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuggetMetrics {
    pub qid: String,
    pub strict_vital_score: f64,
    pub vital_score: f64,
    pub strict_weighted_score: f64,
    pub weighted_score: f64,
    pub strict_all_score: f64,
    pub all_score: f64,
}

impl NuggetMetrics {
    /// Strict WeightedScore is the weighted score with zero partial weight.
    pub fn compute(qid: &str, judgments: &[Judgment], base: MetricConfig) -> Self {
        let lenient = MetricConfig { strict: false, ..base };
        let strict = MetricConfig { strict: true, ..base };
        let no_partial = MetricConfig { partial_weight: 0.0, ..base };
        Self {
            qid: qid.to_string(),
            strict_vital_score: vital_score(judgments, &strict),
            vital_score: vital_score(judgments, &lenient),
            strict_weighted_score: weighted_score(judgments, &no_partial),
            weighted_score: weighted_score(judgments, &lenient),
            strict_all_score: all_score(judgments, &strict),
            all_score: all_score(judgments, &lenient),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn j(importance: u8, support: u8) -> Judgment {
        Judgment { importance: Some(importance), support: Some(support) }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn table(rows: &[(&str, &str, Judgment)]) -> JudgmentTable {
        let mut t: JudgmentTable = HashMap::new();
        for (qid, nid, judgment) in rows {
            t.entry(qid.to_string()).or_default().insert(nid.to_string(), *judgment);
        }
        t
    }

    #[test]
    fn all_score_strict_counts_only_full_support() {
        let cfg = MetricConfig { strict: true, ..MetricConfig::default() };
        assert!(close(all_score(&[j(1, 2), j(0, 0)], &cfg), 0.5));
    }

    #[test]
    fn all_score_lenient_adds_weighted_partials() {
        let cfg = MetricConfig::default();
        assert!(close(all_score(&[j(1, 2), j(0, 1), j(0, 0), j(1, 1)], &cfg), (1.0 + 0.5 * 2.0) / 4.0));
    }

    #[test]
    fn partial_only_answers_earn_nothing() {
        assert_eq!(all_score(&[j(1, 1), j(1, 1)], &MetricConfig::default()), 0.0);
    }

    #[test]
    fn empty_sets_score_zero() {
        let cfg = MetricConfig::default();
        assert_eq!(all_score(&[], &cfg), 0.0);
        assert_eq!(vital_score(&[j(0, 2)], &cfg), 0.0);
        assert_eq!(weighted_score(&[], &cfg), 0.0);
    }

    #[test]
    fn weighted_combines_vital_and_okay_subscores() {
        // vital: credit 1.0 over 2 nuggets; okay: credit 1.0 over 2 nuggets
        let js = [j(1, 2), j(1, 0), j(0, 2), j(0, 0)];
        let cfg = MetricConfig { partial_weight: 0.5, ..MetricConfig::default() };
        let v = weighted_score(&js, &cfg);
        assert!(close(v, (1.0 + 0.5 * 1.0) / 3.0));

        let js = [j(1, 2), j(1, 0), j(0, 2), j(0, 1), j(0, 0), j(0, 0)];
        // okay credit = 1 + 0.5 * 1 = 1.5
        assert!(close(weighted_score(&js, &cfg), (1.0 + 0.5 * 1.5) / (2.0 + 0.5 * 4.0)));
    }

    #[test]
    fn weighted_ignores_strict() {
        let js = [j(1, 2), j(1, 1)];
        let lenient = weighted_score(&js, &MetricConfig::default());
        let strict = weighted_score(&js, &MetricConfig { strict: true, ..MetricConfig::default() });
        assert_eq!(lenient, strict);
        assert!(close(lenient, 0.75));
    }

    #[test]
    fn vital_threshold_selects_subset() {
        let cfg = MetricConfig { vital_threshold: 2, ..MetricConfig::default() };
        assert!(close(vital_score(&[j(2, 2), j(1, 0)], &cfg), 1.0));
    }

    #[test]
    fn two_grade_defaults_treat_support_as_full() {
        let cfg = MetricConfig::for_mode(AssignMode::SupportGrade2);
        assert!(close(all_score(&[j(1, 1), j(0, 0)], &cfg), 0.5));
    }

    #[test]
    fn evaluate_emits_one_metric_per_query_and_measure() {
        let t = table(&[("q1", "q1_1", j(1, 2)), ("q1", "q1_2", j(0, 0)), ("q2", "q2_1", j(0, 2))]);
        let measures = [
            Measure::parse("AllScore").unwrap(),
            Measure::parse("VitalScore").unwrap(),
            Measure::parse("WeightedScore").unwrap(),
        ];
        let out = evaluate(&t, &measures).unwrap();
        assert_eq!(out.len(), 6);
        let by_key: HashMap<_, _> = out.iter().map(|m| ((m.query_id.as_str(), m.measure.as_str()), m.value)).collect();
        assert!(close(by_key[&("q1", "AllScore")], 0.5));
        assert!(close(by_key[&("q1", "VitalScore")], 1.0));
        assert!(close(by_key[&("q2", "VitalScore")], 0.0));
        assert!(close(by_key[&("q2", "WeightedScore")], 1.0));
    }

    #[test]
    fn evaluate_is_pure() {
        let t = table(&[("q1", "a", j(1, 2)), ("q1", "b", j(0, 1)), ("q2", "c", j(1, 0))]);
        let m = [Measure::parse("WeightedScore(partial_weight=0.25)").unwrap()];
        let mut a = evaluate(&t, &m).unwrap();
        let mut b = evaluate(&t, &m).unwrap();
        a.sort_by(|x, y| x.query_id.cmp(&y.query_id));
        b.sort_by(|x, y| x.query_id.cmp(&y.query_id));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_fields_are_reported_not_zeroed() {
        let t = table(&[("q1", "a", Judgment { importance: None, support: Some(2) })]);
        assert!(evaluate(&t, &[Measure::parse("AllScore").unwrap()]).is_ok());
        let err = evaluate(&t, &[Measure::parse("VitalScore").unwrap()]).unwrap_err();
        assert!(matches!(err, NuggetError::MalformedInputTable { field: "importance", .. }));

        let t = table(&[("q1", "a", Judgment { importance: Some(1), support: None })]);
        let err = evaluate(&t, &[Measure::parse("AllScore").unwrap()]).unwrap_err();
        assert!(matches!(err, NuggetError::MalformedInputTable { field: "assignment", .. }));
    }

    #[test]
    fn measure_strings_round_trip_through_display() {
        let m = Measure::parse("VitalScore(strict=True, partial_rel=1, rel=1)").unwrap();
        assert!(m.config.strict);
        assert_eq!(m.to_string(), "VitalScore(strict=true)");
        assert_eq!(Measure::parse("AllScore").unwrap().to_string(), "AllScore");
    }

    #[test]
    fn unknown_measures_and_parameters_are_rejected() {
        assert!(matches!(Measure::parse("P@10"), Err(NuggetError::UnsupportedMeasure(_))));
        assert!(matches!(Measure::parse("AllScore(cutoff=3)"), Err(NuggetError::UnsupportedMeasure(_))));
        assert!(matches!(Measure::parse("AllScore(partial_weight=1.5)"), Err(NuggetError::UnsupportedMeasure(_))));
        assert!(matches!(Measure::parse("AllScore(strict=maybe)"), Err(NuggetError::UnsupportedMeasure(_))));
    }

    #[test]
    fn mean_summary_is_per_measure() {
        let metrics = vec![
            Metric { query_id: "q1".into(), measure: "AllScore".into(), value: 1.0 },
            Metric { query_id: "q2".into(), measure: "AllScore".into(), value: 0.0 },
            Metric { query_id: "q1".into(), measure: "VitalScore".into(), value: 0.5 },
        ];
        let summary = summarize_mean(&metrics);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0], Metric { query_id: "all".into(), measure: "AllScore".into(), value: 0.5 });
        assert_eq!(summary[1].value, 0.5);
    }

    #[test]
    fn six_score_report() {
        let js = [j(1, 2), j(1, 1), j(0, 2), j(0, 0)];
        let m = NuggetMetrics::compute("q", &js, MetricConfig::default());
        assert!(close(m.strict_all_score, 0.5));
        assert!(close(m.all_score, 2.5 / 4.0));
        assert!(close(m.strict_vital_score, 0.5));
        assert!(close(m.vital_score, 0.75));
        assert!(close(m.strict_weighted_score, (1.0 + 0.5) / 3.0));
        assert!(close(m.weighted_score, (1.5 + 0.5) / 3.0));
    }
}
