use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome severity. Composite results take the maximum of their children.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Error,
    Cancel,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Cancel => "cancel",
        }
    }

    pub fn is_failure(self) -> bool {
        self >= Self::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A severity-tagged result that may carry nested child results.
///
/// `source` names the component that produced the result (an action id, a
/// touchpoint type, a phase id) so failures stay diagnosable after they are
/// folded into an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    severity: Severity,
    source: String,
    message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Status>,
}

impl Status {
    pub fn new(severity: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            source: source.into(),
            message: message.into(),
            children: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::default()
    }

    pub fn ok_from(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, source, message)
    }

    pub fn info(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, source, message)
    }

    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, source, message)
    }

    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, source, message)
    }

    pub fn cancel(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Cancel, source, message)
    }

    /// Converts a propagated error into an ERROR result, keeping the full
    /// context chain in the message.
    pub fn from_error(source: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::error(source, format!("{err:#}"))
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn children(&self) -> &[Status] {
        &self.children
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    pub fn is_failure(&self) -> bool {
        self.severity.is_failure()
    }

    pub fn is_cancel(&self) -> bool {
        self.severity == Severity::Cancel
    }

    /// Appends `child`, raising this result's severity to the child's if higher.
    pub fn merge(&mut self, child: Status) {
        if child.severity > self.severity {
            self.severity = child.severity;
        }
        self.children.push(child);
    }

    /// Like [`Status::merge`] but drops plain OK results with no detail.
    pub fn merge_problems(&mut self, child: Status) {
        if child.is_ok() && child.children.is_empty() {
            return;
        }
        self.merge(child);
    }

    /// Fills in `source` when the producer left it blank.
    pub fn or_source(mut self, source: &str) -> Self {
        if self.source.is_empty() {
            self.source = source.to_string();
        }
        self
    }

    pub fn into_children(self) -> Vec<Status> {
        self.children
    }

    pub fn with_child(mut self, child: Status) -> Self {
        self.merge(child);
        self
    }

    /// Returns the lone child when there is exactly one, else `self`.
    pub fn into_most_specific(mut self) -> Status {
        if self.children.len() == 1 {
            if let Some(child) = self.children.pop() {
                return child;
            }
        }
        self
    }

    /// Depth-first walk over every result without children.
    pub fn leaves(&self) -> Vec<&Status> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    pub fn find_by_source(&self, source: &str) -> Option<&Status> {
        if self.source == source {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_source(source))
    }
}

fn collect_leaves<'a>(status: &'a Status, out: &mut Vec<&'a Status>) {
    if status.children.is_empty() {
        out.push(status);
        return;
    }
    for child in &status.children {
        collect_leaves(child, out);
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} [{}]: {}", self.severity, self.source, self.message)
        }
    }
}
