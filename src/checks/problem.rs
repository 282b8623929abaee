use serde::{Deserialize, Serialize};

/// How serious a problem is. Ordered from least to most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "info")]
    Information,
    Warning,
    Bug,
    /// Parse or IO failure; nothing else can be checked.
    Fatal,
}

impl Severity {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "information" | "info" => Some(Self::Information),
            "warning" | "warn" => Some(Self::Warning),
            "bug" => Some(Self::Bug),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Information => write!(f, "information"),
            Self::Warning => write!(f, "warning"),
            Self::Bug => write!(f, "bug"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A finding produced by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Offending part of the rule, may be empty.
    pub fragment: String,
    /// Ascending, no duplicates.
    pub lines: Vec<usize>,
    /// Identifier of the check that reported it.
    pub reporter: String,
    pub text: String,
    pub severity: Severity,
}

impl Problem {
    pub fn new(
        fragment: impl Into<String>,
        lines: impl IntoIterator<Item = usize>,
        reporter: impl Into<String>,
        text: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let mut lines: Vec<usize> = lines.into_iter().collect();
        lines.sort_unstable();
        lines.dedup();
        Self {
            fragment: fragment.into(),
            lines,
            reporter: reporter.into(),
            text: text.into(),
            severity,
        }
    }

    pub fn first_line(&self) -> usize {
        self.lines.first().copied().unwrap_or(1)
    }
}
