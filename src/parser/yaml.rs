//! Rule extraction from Prometheus rule files.
//!
//! The file is validated as a YAML stream first. Rules are then located by
//! scanning for sequence items (`- `) and each item is decoded on its own, so
//! both the `groups:` layout and a bare list of rules are accepted. Line
//! numbers come from the scan, values from serde_yaml.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::{
    AlertingRule, LineRange, ParseError, PromQLExpr, RecordingRule, Rule, RuleError, RuleKind,
    RuleParser, YamlKeyValue, YamlMap, YamlNode,
};
use crate::duration::parse_duration;

static KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<plain>[^\s"'#\-?][^:#]*?))\s*:(?:\s+(?P<rest>.*))?$"#,
    )
    .unwrap()
});

static LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?s)(.+?),? at line \d+ column \d+").unwrap());

/// Parser for Prometheus rule files in YAML.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlRuleParser;

impl RuleParser for YamlRuleParser {
    fn parse(&self, content: &str) -> Result<Vec<Rule>, ParseError> {
        validate(content)?;

        let lines = split_lines(content);
        let rules: Vec<Rule> = find_items(&lines)
            .iter()
            .filter_map(|item| {
                let mut rule = decode_item(item)?;
                rule.comments = collect_comments(&lines, item);
                Some(rule)
            })
            .collect();
        debug!(rules = rules.len(), "parsed rule file");
        Ok(rules)
    }
}

fn validate(content: &str) -> Result<(), ParseError> {
    for document in serde_yaml::Deserializer::from_str(content) {
        Value::deserialize(document).map_err(yaml_error)?;
    }
    Ok(())
}

fn yaml_error(err: serde_yaml::Error) -> ParseError {
    let line = err.location().map(|loc| loc.line()).unwrap_or(1);
    let full = err.to_string();
    let message = LOCATION_RE
        .captures(&full)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| full.clone());
    ParseError::new(line, message)
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

impl Line<'_> {
    fn is_ignorable(&self) -> bool {
        self.text.is_empty() || self.text.starts_with('#')
    }
}

fn split_lines(content: &str) -> Vec<Line<'_>> {
    content
        .lines()
        .enumerate()
        .map(|(idx, raw)| {
            let indent = raw.len() - raw.trim_start_matches(' ').len();
            Line {
                number: idx + 1,
                indent,
                text: raw[indent..].trim_end(),
            }
        })
        .collect()
}

/// One `- ` sequence item. `lines` holds the item as a standalone mapping:
/// the dash is dropped from the first line and `indent` is the column of the
/// mapping keys.
#[derive(Debug)]
struct Item<'a> {
    start: usize,
    indent: usize,
    lines: Vec<Line<'a>>,
}

impl Item<'_> {
    fn position(&self) -> LineRange {
        let first = self.lines.first().map(|l| l.number).unwrap_or(1);
        let last = self.lines.last().map(|l| l.number).unwrap_or(first);
        LineRange::new(first, last)
    }

    fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| {
                if l.is_ignorable() && l.indent < self.indent {
                    String::new()
                } else {
                    format!("{}{}", " ".repeat(l.indent.saturating_sub(self.indent)), l.text)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn find_items<'a>(lines: &[Line<'a>]) -> Vec<Item<'a>> {
    let mut items = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let rest = if line.text == "-" {
            ""
        } else if let Some(rest) = line.text.strip_prefix("- ") {
            rest
        } else {
            continue;
        };
        let dash = line.indent;
        let end = lines[idx + 1..]
            .iter()
            .position(|l| !l.is_ignorable() && l.indent <= dash)
            .map(|p| idx + 1 + p)
            .unwrap_or(lines.len());
        let body = &lines[idx + 1..end];

        let value = rest.trim_start();
        let mut item_lines = Vec::with_capacity(body.len() + 1);
        let indent = if value.is_empty() {
            match body.iter().find(|l| !l.is_ignorable()) {
                Some(l) => l.indent,
                None => continue,
            }
        } else {
            let indent = dash + 2 + (rest.len() - value.len());
            item_lines.push(Line {
                number: line.number,
                indent,
                text: value,
            });
            indent
        };
        item_lines.extend_from_slice(body);

        // Trailing comments belong to whatever follows the item.
        while item_lines.last().is_some_and(|l| l.is_ignorable()) {
            item_lines.pop();
        }
        if item_lines.is_empty() {
            continue;
        }
        items.push(Item {
            start: idx,
            indent,
            lines: item_lines,
        });
    }
    items
}

/// A `key: value` line inside an item and the lines nested under it.
#[derive(Debug)]
struct Entry<'a> {
    key: String,
    key_line: usize,
    inline: &'a str,
    body: &'a [Line<'a>],
}

impl<'a> Entry<'a> {
    fn key_node(&self) -> YamlNode {
        YamlNode {
            value: self.key.clone(),
            position: LineRange::single(self.key_line),
        }
    }

    fn value_position(&self) -> LineRange {
        let mut content = self.body.iter().filter(|l| !l.is_ignorable());
        let first_nested = content.next().map(|l| l.number);
        let last_nested = content.last().map(|l| l.number).or(first_nested);

        let block = self.inline.is_empty() || self.inline.starts_with(['|', '>']);
        let first = if block {
            first_nested.unwrap_or(self.key_line)
        } else {
            self.key_line
        };
        LineRange::new(first, last_nested.unwrap_or(self.key_line))
    }

    fn position(&self) -> LineRange {
        LineRange::single(self.key_line).merge(self.value_position())
    }

    fn key_value(&self, value: String) -> YamlKeyValue {
        YamlKeyValue {
            key: self.key_node(),
            value: YamlNode {
                value,
                position: self.value_position(),
            },
        }
    }

    fn children(&self) -> Vec<Entry<'a>> {
        match self.body.iter().find(|l| !l.is_ignorable()) {
            Some(first) => entries(self.body, first.indent),
            None => Vec::new(),
        }
    }
}

fn entries<'a>(lines: &'a [Line<'a>], indent: usize) -> Vec<Entry<'a>> {
    let mut out = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = &lines[idx];
        if line.is_ignorable() || line.indent != indent {
            idx += 1;
            continue;
        }
        let Some(caps) = KEY_RE.captures(line.text) else {
            idx += 1;
            continue;
        };
        let key = caps
            .name("dq")
            .or_else(|| caps.name("sq"))
            .or_else(|| caps.name("plain"))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
        let end = lines[idx + 1..]
            .iter()
            .position(|l| !l.is_ignorable() && l.indent <= indent)
            .map(|p| idx + 1 + p)
            .unwrap_or(lines.len());

        out.push(Entry {
            key,
            key_line: line.number,
            inline: split_comment(rest).0,
            body: &lines[idx + 1..end],
        });
        idx = end;
    }
    out
}

/// Split a trailing ` # comment` off a line, ignoring `#` inside quoted
/// scalars.
fn split_comment(text: &str) -> (&str, Option<&str>) {
    let mut quote: Option<char> = None;
    let mut after_space = true;

    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && after_space => quote = Some(c),
            None if c == '#' && after_space => {
                return (text[..idx].trim_end(), Some(text[idx + 1..].trim()));
            }
            None => {}
        }
        after_space = c.is_whitespace();
    }
    (text, None)
}

fn collect_comments(lines: &[Line<'_>], item: &Item<'_>) -> Vec<String> {
    let mut comments: Vec<String> = lines[..item.start]
        .iter()
        .rev()
        .take_while(|l| l.text.starts_with('#'))
        .map(|l| l.text[1..].trim().to_string())
        .collect();
    comments.reverse();

    for line in &item.lines {
        if let Some(text) = line.text.strip_prefix('#') {
            comments.push(text.trim().to_string());
        } else if let (_, Some(comment)) = split_comment(line.text) {
            comments.push(comment.to_string());
        }
    }
    comments
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn decode_item(item: &Item<'_>) -> Option<Rule> {
    let value: Value = match serde_yaml::from_str(&item.text()) {
        Ok(value) => value,
        Err(err) => {
            debug!(line = item.position().first, error = %err, "skipping undecodable item");
            return None;
        }
    };
    let Value::Mapping(map) = value else {
        return None;
    };
    // Groups and other non-rule mappings.
    if !["alert", "record", "expr"].iter().any(|k| map.contains_key(*k)) {
        return None;
    }
    let ctx = ItemContext {
        map: &map,
        fields: entries(&item.lines, item.indent),
        fallback: item.position(),
    };
    Some(ctx.rule().unwrap_or_else(|err| Rule::new(RuleKind::Error(err))))
}

struct ItemContext<'a> {
    map: &'a Mapping,
    fields: Vec<Entry<'a>>,
    fallback: LineRange,
}

impl<'a> ItemContext<'a> {
    fn field(&self, key: &str) -> Option<&Entry<'a>> {
        self.fields.iter().find(|e| e.key == key)
    }

    fn error(&self, key: &str, message: impl Into<String>) -> RuleError {
        RuleError {
            position: self.field(key).map(Entry::position).unwrap_or(self.fallback),
            fragment: key.to_string(),
            message: message.into(),
        }
    }

    fn key_value(&self, key: &str, value: String) -> YamlKeyValue {
        match self.field(key) {
            Some(entry) => entry.key_value(value),
            None => YamlKeyValue {
                key: YamlNode {
                    value: key.to_string(),
                    position: self.fallback,
                },
                value: YamlNode {
                    value,
                    position: self.fallback,
                },
            },
        }
    }

    fn string_field(&self, key: &str) -> Result<Option<YamlKeyValue>, RuleError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(value) => match scalar(value) {
                Some(s) => Ok(Some(self.key_value(key, s))),
                None => Err(self.error(key, format!("{key} value must be a string"))),
            },
        }
    }

    fn map_field(&self, key: &str) -> Result<Option<YamlMap>, RuleError> {
        let mapping = match self.map.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Mapping(m)) => m,
            Some(_) => return Err(self.error(key, format!("{key} must be a map of strings"))),
        };

        let entry = self.field(key);
        let children = entry.map(Entry::children).unwrap_or_default();
        let parent = entry.map(Entry::position).unwrap_or(self.fallback);

        let mut items = Vec::with_capacity(mapping.len());
        for (k, v) in mapping {
            let (Some(name), Some(value)) = (scalar(k), scalar(v)) else {
                return Err(self.error(key, format!("{key} must be a map of strings")));
            };
            let kv = match children.iter().find(|c| c.key == name) {
                Some(child) => child.key_value(value),
                None => YamlKeyValue {
                    key: YamlNode {
                        value: name,
                        position: parent,
                    },
                    value: YamlNode {
                        value,
                        position: parent,
                    },
                },
            };
            items.push(kv);
        }

        let key_node = entry.map(Entry::key_node).unwrap_or(YamlNode {
            value: key.to_string(),
            position: self.fallback,
        });
        Ok(Some(YamlMap {
            key: key_node,
            items,
        }))
    }

    fn expr(&self, name_key: &str) -> Result<PromQLExpr, RuleError> {
        match self.map.get("expr") {
            None | Some(Value::Null) => Err(self.error(name_key, "missing expr key")),
            Some(_) => {
                let kv = self
                    .string_field("expr")?
                    .ok_or_else(|| self.error(name_key, "missing expr key"))?;
                Ok(PromQLExpr::new(kv.key, kv.value))
            }
        }
    }

    fn rule(&self) -> Result<Rule, RuleError> {
        let is_alert = self.map.contains_key("alert");
        let is_record = self.map.contains_key("record");

        let kind = match (is_alert, is_record) {
            (true, true) => {
                return Err(self.error("alert", "got both alert and record keys in a single rule"))
            }
            (false, false) => {
                return Err(self.error("expr", "incomplete rule, no alert or record key"))
            }
            (true, false) => self.alerting()?,
            (false, true) => self.recording()?,
        };
        Ok(Rule::new(kind))
    }

    fn name(&self, key: &str) -> Result<YamlKeyValue, RuleError> {
        let kv = self
            .string_field(key)?
            .ok_or_else(|| self.error(key, format!("missing {key} key")))?;
        if kv.value.value.trim().is_empty() {
            return Err(self.error(key, format!("{key} value cannot be empty")));
        }
        Ok(kv)
    }

    fn alerting(&self) -> Result<RuleKind, RuleError> {
        let alert = self.name("alert")?;
        let expr = self.expr("alert")?;

        let for_ = self.string_field("for")?;
        if let Some(kv) = &for_ {
            if let Err(err) = parse_duration(&kv.value.value) {
                return Err(self.error("for", format!("invalid for value: {err}")));
            }
        }

        Ok(RuleKind::Alerting(AlertingRule {
            alert,
            expr,
            for_,
            labels: self.map_field("labels")?,
            annotations: self.map_field("annotations")?,
        }))
    }

    fn recording(&self) -> Result<RuleKind, RuleError> {
        let record = self.name("record")?;
        let expr = self.expr("record")?;

        for key in ["for", "keep_firing_for", "annotations"] {
            if self.map.contains_key(key) {
                return Err(self.error(key, format!("invalid field '{key}' in recording rule")));
            }
        }

        Ok(RuleKind::Recording(RecordingRule {
            record,
            expr,
            labels: self.map_field("labels")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RULES: &str = r#"groups:
- name: example
  rules:
  # alertlint disable promql/rate
  - record: job:up:sum
    expr: sum(up) by (job)
    labels:
      team: infra
  - alert: Down
    expr: |
      up == 0
    for: 5m # alertlint disable alerts/count
    annotations:
      summary: "instance down"
"#;

    fn parse(content: &str) -> Vec<Rule> {
        YamlRuleParser.parse(content).unwrap()
    }

    #[test]
    fn finds_rules_inside_groups() {
        let rules = parse(RULES);
        assert_eq!(rules.len(), 2);

        let rr = rules[0].recording().unwrap();
        assert_eq!(rr.record.value.value, "job:up:sum");
        assert_eq!(rr.expr.value.value, "sum(up) by (job)");
        assert!(rr.expr.query().is_some());
        assert_eq!(rules[0].lines(), vec![5, 6, 7, 8]);
        let team = rr.labels.as_ref().unwrap().get("team").unwrap();
        assert_eq!(team.value.value, "infra");
        assert_eq!(team.lines(), vec![8]);

        let ar = rules[1].alerting().unwrap();
        assert_eq!(ar.alert.value.value, "Down");
        assert_eq!(ar.expr.value.value, "up == 0\n");
        assert_eq!(ar.expr.lines(), vec![10, 11]);
        assert_eq!(ar.for_.as_ref().unwrap().value.value, "5m");
        assert_eq!(rules[1].lines(), (9..=14).collect::<Vec<_>>());
    }

    #[test]
    fn attaches_comments_above_and_trailing() {
        let rules = parse(RULES);
        assert!(rules[0].has_comment("disable promql/rate"));
        assert!(!rules[0].has_comment("disable alerts/count"));
        assert!(rules[1].has_comment("disable alerts/count"));
        assert!(!rules[1].has_comment("disable promql/rate"));
    }

    #[test]
    fn accepts_bare_rule_lists() {
        let rules = parse("- record: foo\n  expr: bar\n-\n  record: baz\n  expr: qux\n");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].name(), Some("baz"));
        assert_eq!(rules[1].lines(), vec![4, 5]);
    }

    #[test]
    fn empty_file_has_no_rules() {
        assert!(parse("").is_empty());
        assert!(parse("groups: []\n").is_empty());
    }

    #[test]
    fn reports_invalid_yaml_with_line() {
        let err = YamlRuleParser
            .parse("groups:\n- name: foo\n  rules: [\n")
            .unwrap_err();
        assert!(err.line >= 1);
        assert!(!err.message.contains("at line"), "{}", err.message);
    }

    #[test]
    fn rejects_alert_and_record_together() {
        let rules = parse("- alert: foo\n  record: bar\n  expr: up\n");
        let err = rules[0].error().unwrap();
        assert_eq!(err.message, "got both alert and record keys in a single rule");
        assert_eq!(err.position, LineRange::single(1));
    }

    #[test]
    fn rejects_missing_expr_and_bad_for() {
        let rules = parse("- record: foo\n- alert: bar\n  expr: up\n  for: soon\n");
        assert_eq!(rules[0].error().unwrap().message, "missing expr key");
        let err = rules[1].error().unwrap();
        assert!(err.message.starts_with("invalid for value"), "{}", err.message);
        assert_eq!(err.position, LineRange::single(4));
    }

    #[test]
    fn rejects_alerting_fields_on_recording_rules() {
        let rules = parse("- record: foo\n  expr: up\n  for: 5m\n");
        assert_eq!(
            rules[0].error().unwrap().message,
            "invalid field 'for' in recording rule"
        );
    }

    #[test]
    fn keeps_syntax_errors_on_the_rule() {
        let rules = parse("- record: foo\n  expr: sum(\n");
        let expr = rules[0].expr().unwrap();
        assert!(expr.syntax_error().is_some());
    }

    #[test]
    fn split_comment_respects_quotes() {
        assert_eq!(split_comment("foo # bar"), ("foo", Some("bar")));
        assert_eq!(split_comment(r#""a # b""#), (r#""a # b""#, None));
        assert_eq!(split_comment("up{a=\"#\"}"), ("up{a=\"#\"}", None));
    }
}
