use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text placed wherever a window could not be labelled within the retry budget.
pub const FAILED: &str = "failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(alias = "qid")]
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "docid")]
    pub id: String,
    #[serde(alias = "segment")]
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// One evaluation request: a query and its documents in traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub query: Query,
    #[serde(default)]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nugget {
    pub id: String,
    pub text: String,
}

impl Nugget {
    /// Ids are one-based positions in the creator's final list.
    pub fn new(query_id: &str, position: usize, text: impl Into<String>) -> Self {
        Self { id: format!("{query_id}_{}", position + 1), text: text.into() }
    }

    pub fn is_degraded(&self) -> bool {
        self.text == FAILED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredNugget {
    #[serde(flatten)]
    pub nugget: Nugget,
    pub importance: Importance,
}

impl ScoredNugget {
    pub fn is_degraded(&self) -> bool {
        self.nugget.is_degraded() || self.importance == Importance::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedScoredNugget {
    #[serde(flatten)]
    pub scored: ScoredNugget,
    pub assignment: Assignment,
}

impl AssignedScoredNugget {
    pub fn id(&self) -> &str {
        &self.scored.nugget.id
    }

    pub fn text(&self) -> &str {
        &self.scored.nugget.text
    }

    pub fn is_degraded(&self) -> bool {
        self.scored.is_degraded() || self.assignment == Assignment::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Vital,
    Okay,
    Failed,
}

impl Importance {
    /// Unrecognized labels count as `okay`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "vital" => Importance::Vital,
            _ => Importance::Okay,
        }
    }

    pub fn value(self) -> Option<u8> {
        match self {
            Importance::Vital => Some(1),
            Importance::Okay => Some(0),
            Importance::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Importance::Vital => "vital",
            Importance::Okay => "okay",
            Importance::Failed => FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    Support,
    PartialSupport,
    NotSupport,
    Failed,
}

impl Assignment {
    /// Maps a model label onto the grade set of `mode`; anything outside it is `not_support`.
    pub fn from_label(label: &str, mode: AssignMode) -> Self {
        match (label.trim().to_lowercase().as_str(), mode) {
            ("support", _) => Assignment::Support,
            ("partial_support", AssignMode::SupportGrade3) => Assignment::PartialSupport,
            _ => Assignment::NotSupport,
        }
    }

    /// Numeric support value consumed by the metric engine.
    pub fn value(self, mode: AssignMode) -> Option<u8> {
        match (self, mode) {
            (Assignment::Support, AssignMode::SupportGrade3) => Some(2),
            (Assignment::Support, AssignMode::SupportGrade2) => Some(1),
            (Assignment::PartialSupport, _) => Some(1),
            (Assignment::NotSupport, _) => Some(0),
            (Assignment::Failed, _) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Assignment::Support => "support",
            Assignment::PartialSupport => "partial_support",
            Assignment::NotSupport => "not_support",
            Assignment::Failed => FAILED,
        }
    }
}

/// Wording used when asking the model for nuggets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NuggetMode {
    #[default]
    Atomic,
    NounPhrase,
    Question,
}

/// Grade set used by the assigner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    #[serde(rename = "support_grade_2")]
    SupportGrade2,
    #[default]
    #[serde(rename = "support_grade_3")]
    SupportGrade3,
}

impl FromStr for AssignMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2" | "support_grade_2" => Ok(AssignMode::SupportGrade2),
            "3" | "support_grade_3" => Ok(AssignMode::SupportGrade3),
            other => Err(format!("unknown assign mode '{other}'")),
        }
    }
}

impl FromStr for NuggetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atomic" => Ok(NuggetMode::Atomic),
            "noun_phrase" => Ok(NuggetMode::NounPhrase),
            "question" => Ok(NuggetMode::Question),
            other => Err(format!("unknown nugget mode '{other}'")),
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one windowed stage. Cancellation between windows leaves
/// `windows_completed < windows_total` and keeps the committed items.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub items: Vec<T>,
    pub windows_completed: usize,
    pub windows_total: usize,
}

impl<T> StageOutput<T> {
    pub fn complete(items: Vec<T>, windows: usize) -> Self {
        Self { items, windows_completed: windows, windows_total: windows }
    }

    pub fn is_complete(&self) -> bool {
        self.windows_completed == self.windows_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_mode_names_match_across_json_and_cli() {
        for (name, mode) in [("support_grade_2", AssignMode::SupportGrade2), ("support_grade_3", AssignMode::SupportGrade3)] {
            assert_eq!(serde_json::to_string(&mode).unwrap(), format!("\"{name}\""));
            assert_eq!(serde_json::from_str::<AssignMode>(&format!("\"{name}\"")).unwrap(), mode);
            assert_eq!(name.parse::<AssignMode>().unwrap(), mode);
        }
    }

    #[test]
    fn importance_defaults_unknown_labels_to_okay() {
        assert_eq!(Importance::from_label(" Vital "), Importance::Vital);
        assert_eq!(Importance::from_label("okay"), Importance::Okay);
        assert_eq!(Importance::from_label("crucial"), Importance::Okay);
    }

    #[test]
    fn two_grade_mode_has_no_partial_tier() {
        let a = Assignment::from_label("partial_support", AssignMode::SupportGrade2);
        assert_eq!(a, Assignment::NotSupport);
        assert_eq!(Assignment::Support.value(AssignMode::SupportGrade2), Some(1));
        assert_eq!(Assignment::Support.value(AssignMode::SupportGrade3), Some(2));
        assert_eq!(Assignment::Failed.value(AssignMode::SupportGrade3), None);
    }

    #[test]
    fn nugget_ids_are_one_based() {
        let n = Nugget::new("q7", 0, "alpha");
        assert_eq!(n.id, "q7_1");
        assert!(!n.is_degraded());
        assert!(Nugget::new("q7", 3, FAILED).is_degraded());
    }

    #[test]
    fn request_accepts_original_field_names() {
        let raw = r#"{"query":{"qid":"1","text":"q"},"documents":[{"docid":"d","segment":"s"}]}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(req.query.id, "1");
        assert_eq!(req.documents[0].text, "s");
        assert_eq!(req.documents[0].title, None);
    }
}
