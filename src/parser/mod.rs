//! Rule model and rule-file parsing.
//!
//! A rule file parses into a list of [`Rule`]s. Every rule is exactly one of
//! an alerting rule, a recording rule or an error placeholder for an item
//! that could not be turned into either. Each field remembers the source
//! lines it came from so findings can point at them.

pub mod promql;
pub mod yaml;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use promql::{Expr, PromQLError};

pub use yaml::YamlRuleParser;

/// Comment prefix for rule directives, e.g. `# alertlint disable query/series`.
pub const COMMENT_PREFIX: &str = "alertlint";

/// Parses raw rule-file content into rules. A returned error means the whole
/// file is unusable; per-rule problems become [`RuleKind::Error`] entries.
pub trait RuleParser: Send + Sync {
    fn parse(&self, content: &str) -> Result<Vec<Rule>, ParseError>;
}

/// File-level parse failure. `line` is 1-based and falls back to 1 when the
/// underlying error carries no position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: line.max(1),
            message: message.into(),
        }
    }
}

/// Inclusive span of 1-based source lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub first: usize,
    pub last: usize,
}

impl LineRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    pub fn single(line: usize) -> Self {
        Self::new(line, line)
    }

    pub fn merge(self, other: LineRange) -> LineRange {
        LineRange::new(self.first.min(other.first), self.last.max(other.last))
    }

    pub fn lines(&self) -> Vec<usize> {
        (self.first..=self.last).collect()
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// A scalar YAML value with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlNode {
    pub value: String,
    pub position: LineRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlKeyValue {
    pub key: YamlNode,
    pub value: YamlNode,
}

impl YamlKeyValue {
    pub fn position(&self) -> LineRange {
        self.key.position.merge(self.value.position)
    }

    pub fn lines(&self) -> Vec<usize> {
        self.position().lines()
    }
}

/// `labels:` / `annotations:` block with its entries in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamlMap {
    pub key: YamlNode,
    pub items: Vec<YamlKeyValue>,
}

impl YamlMap {
    pub fn get(&self, key: &str) -> Option<&YamlKeyValue> {
        self.items.iter().find(|kv| kv.key.value == key)
    }

    pub fn position(&self) -> LineRange {
        self.items
            .iter()
            .fold(self.key.position, |acc, kv| acc.merge(kv.position()))
    }
}

/// The `expr` field: raw text plus the parsed query or its syntax error.
#[derive(Debug, Clone, PartialEq)]
pub struct PromQLExpr {
    pub key: YamlNode,
    pub value: YamlNode,
    pub query: Result<Expr, PromQLError>,
}

impl PromQLExpr {
    pub fn new(key: YamlNode, value: YamlNode) -> Self {
        let query = promql::parse(&value.value);
        Self { key, value, query }
    }

    pub fn query(&self) -> Option<&Expr> {
        self.query.as_ref().ok()
    }

    pub fn syntax_error(&self) -> Option<&PromQLError> {
        self.query.as_ref().err()
    }

    pub fn position(&self) -> LineRange {
        self.key.position.merge(self.value.position)
    }

    pub fn lines(&self) -> Vec<usize> {
        self.position().lines()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertingRule {
    pub alert: YamlKeyValue,
    pub expr: PromQLExpr,
    pub for_: Option<YamlKeyValue>,
    pub labels: Option<YamlMap>,
    pub annotations: Option<YamlMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingRule {
    pub record: YamlKeyValue,
    pub expr: PromQLExpr,
    pub labels: Option<YamlMap>,
}

/// Placeholder for a rule entry that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleError {
    pub position: LineRange,
    pub fragment: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    Alerting(AlertingRule),
    Recording(RecordingRule),
    Error(RuleError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub kind: RuleKind,
    /// Text of comments attached to the rule, without the leading `#`.
    pub comments: Vec<String>,
}

impl Rule {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            comments: Vec::new(),
        }
    }

    pub fn alerting(&self) -> Option<&AlertingRule> {
        match &self.kind {
            RuleKind::Alerting(ar) => Some(ar),
            _ => None,
        }
    }

    pub fn recording(&self) -> Option<&RecordingRule> {
        match &self.kind {
            RuleKind::Recording(rr) => Some(rr),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RuleError> {
        match &self.kind {
            RuleKind::Error(err) => Some(err),
            _ => None,
        }
    }

    /// `alerting`, `recording` or `invalid`.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            RuleKind::Alerting(_) => "alerting",
            RuleKind::Recording(_) => "recording",
            RuleKind::Error(_) => "invalid",
        }
    }

    /// Alert or record name.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            RuleKind::Alerting(ar) => Some(&ar.alert.value.value),
            RuleKind::Recording(rr) => Some(&rr.record.value.value),
            RuleKind::Error(_) => None,
        }
    }

    pub fn expr(&self) -> Option<&PromQLExpr> {
        match &self.kind {
            RuleKind::Alerting(ar) => Some(&ar.expr),
            RuleKind::Recording(rr) => Some(&rr.expr),
            RuleKind::Error(_) => None,
        }
    }

    pub fn labels(&self) -> Option<&YamlMap> {
        match &self.kind {
            RuleKind::Alerting(ar) => ar.labels.as_ref(),
            RuleKind::Recording(rr) => rr.labels.as_ref(),
            RuleKind::Error(_) => None,
        }
    }

    pub fn annotations(&self) -> Option<&YamlMap> {
        self.alerting().and_then(|ar| ar.annotations.as_ref())
    }

    pub fn position(&self) -> LineRange {
        match &self.kind {
            RuleKind::Alerting(ar) => {
                let mut pos = ar.alert.position().merge(ar.expr.position());
                if let Some(f) = &ar.for_ {
                    pos = pos.merge(f.position());
                }
                if let Some(l) = &ar.labels {
                    pos = pos.merge(l.position());
                }
                if let Some(a) = &ar.annotations {
                    pos = pos.merge(a.position());
                }
                pos
            }
            RuleKind::Recording(rr) => {
                let mut pos = rr.record.position().merge(rr.expr.position());
                if let Some(l) = &rr.labels {
                    pos = pos.merge(l.position());
                }
                pos
            }
            RuleKind::Error(err) => err.position,
        }
    }

    /// Every line from the first to the last line of the rule.
    pub fn lines(&self) -> Vec<usize> {
        self.position().lines()
    }

    /// True when a `# alertlint <comment>` line is attached to this rule.
    pub fn has_comment(&self, comment: &str) -> bool {
        let wanted: Vec<&str> = comment.split_whitespace().collect();
        self.comments.iter().any(|text| {
            let mut fields = text.split_whitespace();
            fields.next() == Some(COMMENT_PREFIX) && fields.eq(wanted.iter().copied())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(value: &str, line: usize) -> YamlNode {
        YamlNode {
            value: value.into(),
            position: LineRange::single(line),
        }
    }

    fn recording(comments: &[&str]) -> Rule {
        Rule {
            kind: RuleKind::Recording(RecordingRule {
                record: YamlKeyValue {
                    key: node("record", 3),
                    value: node("foo", 3),
                },
                expr: PromQLExpr::new(node("expr", 4), node("sum(bar)", 4)),
                labels: Some(YamlMap {
                    key: node("labels", 5),
                    items: vec![YamlKeyValue {
                        key: node("team", 6),
                        value: node("infra", 6),
                    }],
                }),
            }),
            comments: comments.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn lines_span_all_fields() {
        assert_eq!(recording(&[]).lines(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn has_comment_requires_prefix_and_exact_words() {
        let rule = recording(&[" alertlint  disable   query/series", "alertlint disable promql/rate extra"]);
        assert!(rule.has_comment("disable query/series"));
        assert!(!rule.has_comment("disable promql/rate"));
        assert!(!rule.has_comment("disable query/cost"));

        let other = recording(&["otherlint disable query/series"]);
        assert!(!other.has_comment("disable query/series"));
    }

    #[test]
    fn expr_keeps_syntax_errors() {
        let expr = PromQLExpr::new(node("expr", 1), node("sum(foo) without(", 1));
        assert!(expr.query().is_none());
        assert!(expr.syntax_error().is_some());
    }

    #[test]
    fn line_range_normalises_order() {
        let r = LineRange::new(5, 2);
        assert_eq!((r.first, r.last), (2, 5));
        assert_eq!(r.to_string(), "2-5");
        assert_eq!(LineRange::single(7).to_string(), "7");
    }
}
