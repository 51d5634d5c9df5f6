use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A query with the set of tool names considered correct for it.
///
/// An empty `ground_truth` is valid and means "no tool applies".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledQuery {
    pub text: String,
    /// Instruction template the query was phrased from, if the source records one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub ground_truth: BTreeSet<String>,
    pub is_evaluation: bool,
}

impl LabeledQuery {
    pub fn new<I, S>(text: impl Into<String>, ground_truth: I, is_evaluation: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            template: None,
            ground_truth: ground_truth.into_iter().map(Into::into).collect(),
            is_evaluation,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// First ground-truth name in sorted order, used when a single label is displayed.
    pub fn primary_tool(&self) -> Option<&str> {
        self.ground_truth.iter().next().map(String::as_str)
    }
}
