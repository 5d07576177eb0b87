//! Prompt templates for the three model-facing stages.
//!
//! Templates are addressed by [`Template`] and filled from a [`PromptContext`];
//! list-valued fields are rendered as JSON arrays, which the output parser also
//! accepts back.

use crate::llm::Prompt;
use crate::types::{AssignMode, NuggetMode};

const CREATOR_SYSTEM: &str = "You are NuggetizeLLM, an intelligent assistant that can update a list of atomic nuggets to best provide all the information required for the query.";
const SCORER_SYSTEM: &str = "You are NuggetizeScoreLLM, an intelligent assistant that can label a list of atomic nuggets based on their importance for a given search query.";
const ASSIGNER_SYSTEM: &str = "You are NuggetizeAssignerLLM, an intelligent assistant that can label a list of atomic nuggets based on if they are captured by a given passage.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Creator(NuggetMode),
    Scorer,
    Assigner(AssignMode),
}

#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub query: &'a str,
    pub context: &'a str,
    pub nuggets: &'a [String],
    pub max_nuggets: usize,
}

pub fn render(template: Template, ctx: &PromptContext<'_>) -> Prompt {
    match template {
        Template::Creator(mode) => Prompt { system: CREATOR_SYSTEM.to_string(), user: creator(mode, ctx) },
        Template::Scorer => Prompt { system: SCORER_SYSTEM.to_string(), user: scorer(ctx) },
        Template::Assigner(mode) => Prompt { system: ASSIGNER_SYSTEM.to_string(), user: assigner(mode, ctx) },
    }
}

fn list_literal(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn creator(mode: NuggetMode, ctx: &PromptContext<'_>) -> String {
    let (unit, form) = match mode {
        NuggetMode::Atomic => ("atomic nuggets of information (1-12 words)", "short nuggets (not questions)"),
        NuggetMode::NounPhrase => ("noun-phrase nuggets (1-6 words)", "noun phrases only"),
        NuggetMode::Question => ("nuggets phrased as short questions the answer should address", "short questions"),
    };
    format!(
        "Update the list of {unit}, if needed, so they best provide the information required for the query. \
Leverage only the initial list of nuggets (if exists) and the provided context (this is an iterative process). \
Return only the final list of all nuggets in a Pythonic list format (even if no updates). \
Make sure there is no redundant information. Ensure the updated nugget list has at most {max} nuggets (can be less), keeping only the most vital ones. \
Order them in decreasing order of importance. Prefer nuggets that provide more interesting information.\n\n\
Search Query: {query}\nContext:\n{context}\nSearch Query: {query}\n\
Initial Nugget List: {nuggets}\nInitial Nugget List Length: {len}\n\n\
Only update the list of nuggets (if needed, else return as is). Do not explain. Always answer in {form}. \
List in the form [\"a\", \"b\", ...] and a and b are strings with no mention of \".\n\
Updated Nugget List:",
        max = ctx.max_nuggets,
        query = ctx.query,
        context = ctx.context,
        nuggets = list_literal(ctx.nuggets),
        len = ctx.nuggets.len(),
    )
}

fn scorer(ctx: &PromptContext<'_>) -> String {
    format!(
        "Based on the query, label each of the {n} nuggets either a vital or okay based on the following criteria. \
Vital nuggets represent concepts that must be present in a \"good\" answer; on the other hand, okay nuggets contribute worthwhile information about the target but are not essential. \
Return the list of labels in a Pythonic list format (type: List[str]). The list should be in the same order as the input nuggets. \
Make sure to provide a label for each nugget.\n\n\
Search Query: {query}\nNugget List: {nuggets}\n\n\
Only return the list of labels (List[str]). Do not explain.\nLabels:",
        n = ctx.nuggets.len(),
        query = ctx.query,
        nuggets = list_literal(ctx.nuggets),
    )
}

fn assigner(mode: AssignMode, ctx: &PromptContext<'_>) -> String {
    let criteria = match mode {
        AssignMode::SupportGrade2 => "either as support or not_support using the following criteria. \
A nugget that is fully captured in the passage should be labeled as support; otherwise, label them as not_support.",
        AssignMode::SupportGrade3 => "either as support, partial_support, or not_support using the following criteria. \
A nugget that is fully captured in the passage should be labeled as support. \
A nugget that is partially captured in the passage should be labeled as partial_support. \
If the nugget is not captured at all, label it as not_support.",
    };
    format!(
        "Based on the query and passage, label each of the {n} nuggets {criteria} \
Return the list of labels in a Pythonic list format (type: List[str]). The list should be in the same order as the input nuggets. \
Make sure to provide a label for each nugget.\n\n\
Search Query: {query}\nPassage: {context}\nNugget List: {nuggets}\n\n\
Only return the list of labels (List[str]). Do not explain.\nLabels:",
        n = ctx.nuggets.len(),
        query = ctx.query,
        context = ctx.context,
        nuggets = list_literal(ctx.nuggets),
    )
}
