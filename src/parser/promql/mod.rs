//! PromQL expression parser.
//!
//! A hand-written lexer plus precedence-climbing parser covering the
//! constructs rule expressions use: selectors with matchers, range and
//! subquery selectors, `offset` / `@` modifiers, function calls,
//! aggregations and binary operators with vector matching.

pub mod ast;
mod lexer;

use std::time::Duration;

use thiserror::Error;

pub use ast::{
    AtModifier, BinaryOp, Expr, Grouping, LabelMatcher, MatchOp, Offset, VectorMatching,
    VectorSelector,
};
use lexer::{Spanned, Token};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at char {}: {message}", .pos + 1)]
pub struct PromQLError {
    pub pos: usize,
    pub message: String,
}

impl PromQLError {
    pub fn new(pos: usize, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

const AGGREGATORS: &[&str] = &[
    "sum",
    "avg",
    "count",
    "min",
    "max",
    "group",
    "stddev",
    "stdvar",
    "topk",
    "bottomk",
    "count_values",
    "quantile",
    "limitk",
    "limit_ratio",
];

const PARAMETRIZED_AGGREGATORS: &[&str] = &[
    "topk",
    "bottomk",
    "count_values",
    "quantile",
    "limitk",
    "limit_ratio",
];

const FUNCTIONS: &[&str] = &[
    "abs",
    "absent",
    "absent_over_time",
    "acos",
    "acosh",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "avg_over_time",
    "ceil",
    "changes",
    "clamp",
    "clamp_max",
    "clamp_min",
    "cos",
    "cosh",
    "count_over_time",
    "day_of_month",
    "day_of_week",
    "day_of_year",
    "days_in_month",
    "deg",
    "delta",
    "deriv",
    "exp",
    "floor",
    "histogram_avg",
    "histogram_count",
    "histogram_fraction",
    "histogram_quantile",
    "histogram_stddev",
    "histogram_stdvar",
    "histogram_sum",
    "holt_winters",
    "hour",
    "idelta",
    "increase",
    "irate",
    "label_join",
    "label_replace",
    "last_over_time",
    "ln",
    "log10",
    "log2",
    "mad_over_time",
    "max_over_time",
    "min_over_time",
    "minute",
    "month",
    "pi",
    "predict_linear",
    "present_over_time",
    "quantile_over_time",
    "rad",
    "rate",
    "resets",
    "round",
    "scalar",
    "sgn",
    "sin",
    "sinh",
    "sort",
    "sort_by_label",
    "sort_by_label_desc",
    "sort_desc",
    "sqrt",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
    "tan",
    "tanh",
    "time",
    "timestamp",
    "vector",
    "year",
];

/// Parse a PromQL expression.
pub fn parse(input: &str) -> Result<Expr, PromQLError> {
    let tokens = lexer::tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    if parser.peek() == &Token::Eof {
        return Err(PromQLError::new(0, "no expression found in input"));
    }
    let expr = parser.parse_expr(0)?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected {}", other.describe()))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn current_pos(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> PromQLError {
        PromQLError::new(self.current_pos(), message)
    }

    fn expect(&mut self, want: Token, context: &str) -> Result<(), PromQLError> {
        if self.peek() == &want {
            self.advance();
            Ok(())
        } else if self.peek() == &Token::Eof {
            Err(self.error(format!("unexpected end of input {context}")))
        } else {
            Err(self.error(format!(
                "unexpected {} {context}, expected {}",
                self.peek().describe(),
                want.describe()
            )))
        }
    }

    fn peek_ident(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(keyword))
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, PromQLError> {
        let mut lhs = self.parse_unary()?;

        while let Some(op) = self.peek_binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();

            let return_bool = if self.peek_ident("bool") {
                if !op.is_comparison() {
                    return Err(self.error("bool modifier can only be used on comparison operators"));
                }
                self.advance();
                true
            } else {
                false
            };
            let matching = self.parse_vector_matching(op)?;

            let next_min = if op.is_right_associative() {
                prec
            } else {
                prec + 1
            };
            let rhs = self.parse_expr(next_min)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                return_bool,
                matching,
            };
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek() {
            Token::Add => BinaryOp::Add,
            Token::Sub => BinaryOp::Sub,
            Token::Mul => BinaryOp::Mul,
            Token::Div => BinaryOp::Div,
            Token::Mod => BinaryOp::Mod,
            Token::Pow => BinaryOp::Pow,
            Token::EqlC => BinaryOp::Eq,
            Token::Neq => BinaryOp::NotEq,
            Token::Gtr => BinaryOp::Gt,
            Token::Lss => BinaryOp::Lt,
            Token::Gte => BinaryOp::Gte,
            Token::Lte => BinaryOp::Lte,
            Token::Ident(s) => match s.to_ascii_lowercase().as_str() {
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "unless" => BinaryOp::Unless,
                "atan2" => BinaryOp::Atan2,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn parse_vector_matching(
        &mut self,
        op: BinaryOp,
    ) -> Result<Option<VectorMatching>, PromQLError> {
        let on = if self.peek_ident("on") {
            true
        } else if self.peek_ident("ignoring") {
            false
        } else {
            return Ok(None);
        };
        self.advance();
        let labels = self.parse_label_list()?;

        let group = if self.peek_ident("group_left") || self.peek_ident("group_right") {
            if op.is_set_operator() {
                return Err(self.error("no grouping allowed for set operations"));
            }
            let left = self.peek_ident("group_left");
            self.advance();
            let extra = if self.peek() == &Token::LParen {
                self.parse_label_list()?
            } else {
                Vec::new()
            };
            Some(if left {
                Grouping::Left(extra)
            } else {
                Grouping::Right(extra)
            })
        } else {
            None
        };

        Ok(Some(VectorMatching { on, labels, group }))
    }

    fn parse_label_list(&mut self) -> Result<Vec<String>, PromQLError> {
        self.expect(Token::LParen, "in grouping opts")?;
        let mut labels = Vec::new();
        loop {
            match self.advance() {
                Token::RParen => break,
                Token::Ident(name) => {
                    labels.push(name);
                    match self.advance() {
                        Token::Comma => continue,
                        Token::RParen => break,
                        Token::Eof => {
                            return Err(self.error("unexpected end of input in grouping opts"))
                        }
                        other => {
                            return Err(self.error(format!(
                                "unexpected {} in grouping opts, expected \",\" or \")\"",
                                other.describe()
                            )))
                        }
                    }
                }
                Token::Eof => return Err(self.error("unexpected end of input in grouping opts")),
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in grouping opts, expected label",
                        other.describe()
                    )))
                }
            }
        }
        Ok(labels)
    }

    fn parse_unary(&mut self) -> Result<Expr, PromQLError> {
        match self.peek() {
            Token::Sub | Token::Add => {
                let negative = self.advance() == Token::Sub;
                let inner = self.parse_expr(BinaryOp::Pow.precedence())?;
                if let (true, Expr::Number(v)) = (negative, &inner) {
                    return Ok(Expr::Number(-v));
                }
                Ok(Expr::Unary {
                    negative,
                    expr: Box::new(inner),
                })
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, PromQLError> {
        loop {
            match self.peek() {
                Token::LBracket => {
                    self.advance();
                    let range = self.expect_duration("in range selector")?;
                    if self.peek() == &Token::Colon {
                        self.advance();
                        let step = if let Token::Duration(_) = self.peek() {
                            Some(self.expect_duration("in subquery")?)
                        } else {
                            None
                        };
                        self.expect(Token::RBracket, "in subquery")?;
                        expr = Expr::Subquery {
                            expr: Box::new(expr),
                            range,
                            step,
                            offset: None,
                            at: None,
                        };
                    } else {
                        self.expect(Token::RBracket, "in range selector")?;
                        expr = match expr {
                            Expr::VectorSelector(selector) if selector.offset.is_none() && selector.at.is_none() => {
                                Expr::MatrixSelector { selector, range }
                            }
                            Expr::VectorSelector(_) => {
                                return Err(self.error("range must come before offset or @ modifiers"))
                            }
                            _ => {
                                return Err(self.error(
                                    "ranges only allowed for vector selectors",
                                ))
                            }
                        };
                    }
                }
                Token::Ident(s) if s.eq_ignore_ascii_case("offset") => {
                    self.advance();
                    let negative = if self.peek() == &Token::Sub {
                        self.advance();
                        true
                    } else {
                        false
                    };
                    let duration = self.expect_duration("in offset")?;
                    let offset = Offset { negative, duration };
                    expr = self.apply_offset(expr, offset)?;
                }
                Token::At => {
                    self.advance();
                    let at = self.parse_at()?;
                    expr = self.apply_at(expr, at)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn apply_offset(&self, expr: Expr, offset: Offset) -> Result<Expr, PromQLError> {
        match expr {
            Expr::VectorSelector(mut vs) if vs.offset.is_none() => {
                vs.offset = Some(offset);
                Ok(Expr::VectorSelector(vs))
            }
            Expr::MatrixSelector {
                mut selector,
                range,
            } if selector.offset.is_none() => {
                selector.offset = Some(offset);
                Ok(Expr::MatrixSelector { selector, range })
            }
            Expr::Subquery {
                expr,
                range,
                step,
                offset: None,
                at,
            } => Ok(Expr::Subquery {
                expr,
                range,
                step,
                offset: Some(offset),
                at,
            }),
            Expr::VectorSelector(_) | Expr::MatrixSelector { .. } | Expr::Subquery { .. } => {
                Err(self.error("offset may not be set multiple times"))
            }
            _ => Err(self.error(
                "offset modifier must be preceded by an instant vector selector or range vector selector or a subquery",
            )),
        }
    }

    fn parse_at(&mut self) -> Result<AtModifier, PromQLError> {
        match self.advance() {
            Token::Number(ts) => Ok(AtModifier::Timestamp(ts)),
            Token::Ident(name) if name == "start" || name == "end" => {
                self.expect(Token::LParen, "in @ modifier")?;
                self.expect(Token::RParen, "in @ modifier")?;
                Ok(if name == "start" {
                    AtModifier::Start
                } else {
                    AtModifier::End
                })
            }
            other => Err(self.error(format!(
                "unexpected {} in @ modifier, expected timestamp",
                other.describe()
            ))),
        }
    }

    fn apply_at(&self, expr: Expr, at: AtModifier) -> Result<Expr, PromQLError> {
        match expr {
            Expr::VectorSelector(mut vs) if vs.at.is_none() => {
                vs.at = Some(at);
                Ok(Expr::VectorSelector(vs))
            }
            Expr::MatrixSelector {
                mut selector,
                range,
            } if selector.at.is_none() => {
                selector.at = Some(at);
                Ok(Expr::MatrixSelector { selector, range })
            }
            Expr::Subquery {
                expr,
                range,
                step,
                offset,
                at: None,
            } => Ok(Expr::Subquery {
                expr,
                range,
                step,
                offset,
                at: Some(at),
            }),
            Expr::VectorSelector(_) | Expr::MatrixSelector { .. } | Expr::Subquery { .. } => {
                Err(self.error("@ may not be set multiple times"))
            }
            _ => Err(self.error(
                "@ modifier must be preceded by an instant vector selector or range vector selector or a subquery",
            )),
        }
    }

    fn expect_duration(&mut self, context: &str) -> Result<Duration, PromQLError> {
        match self.advance() {
            Token::Duration(d) => Ok(d),
            Token::Eof => Err(self.error(format!("unexpected end of input {context}"))),
            other => Err(self.error(format!(
                "unexpected {} {context}, expected duration",
                other.describe()
            ))),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, PromQLError> {
        match self.peek().clone() {
            Token::Number(v) => {
                self.advance();
                Ok(Expr::Number(v))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr(0)?;
                if self.peek() == &Token::Eof {
                    return Err(self.error("unclosed left parenthesis"));
                }
                self.expect(Token::RParen, "in parenthesized expression")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Token::LBrace => {
                let matchers = self.parse_matchers()?;
                if !matchers.iter().any(|m| !matches_empty(m)) {
                    return Err(self.error(
                        "vector selector must contain at least one non-empty matcher",
                    ));
                }
                Ok(Expr::VectorSelector(VectorSelector {
                    name: None,
                    matchers,
                    ..Default::default()
                }))
            }
            Token::Ident(name) => {
                let lower = name.to_ascii_lowercase();
                if lower == "inf" || lower == "nan" {
                    self.advance();
                    return Ok(Expr::Number(if lower == "nan" {
                        f64::NAN
                    } else {
                        f64::INFINITY
                    }));
                }
                let is_aggregation = AGGREGATORS.contains(&lower.as_str())
                    && match self.peek_at(1) {
                        Token::LParen => true,
                        Token::Ident(kw) => kw == "by" || kw == "without",
                        _ => false,
                    };
                if is_aggregation {
                    return self.parse_aggregate(lower);
                }
                if self.peek_at(1) == &Token::LParen {
                    return self.parse_call(name);
                }
                self.advance();
                let matchers = if self.peek() == &Token::LBrace {
                    self.parse_matchers()?
                } else {
                    Vec::new()
                };
                Ok(Expr::VectorSelector(VectorSelector {
                    name: Some(name),
                    matchers,
                    ..Default::default()
                }))
            }
            Token::Duration(_) => Err(self.error("unexpected duration, expected expression")),
            Token::Eof => Err(self.error("unexpected end of input")),
            other => Err(self.error(format!("unexpected {}", other.describe()))),
        }
    }

    fn parse_matchers(&mut self) -> Result<Vec<LabelMatcher>, PromQLError> {
        self.expect(Token::LBrace, "in label matching")?;
        let mut matchers = Vec::new();
        loop {
            let name = match self.advance() {
                Token::RBrace => break,
                Token::Ident(name) => name,
                Token::Eof => return Err(self.error("unexpected end of input inside braces")),
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in label matching, expected label",
                        other.describe()
                    )))
                }
            };
            let op = match self.advance() {
                Token::Assign => MatchOp::Equal,
                Token::Neq => MatchOp::NotEqual,
                Token::EqlRegex => MatchOp::Regex,
                Token::NeqRegex => MatchOp::NotRegex,
                Token::Eof => return Err(self.error("unexpected end of input inside braces")),
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in label matching, expected label matching operator",
                        other.describe()
                    )))
                }
            };
            let value = match self.advance() {
                Token::Str(s) => s,
                Token::Eof => return Err(self.error("unexpected end of input inside braces")),
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in label matching, expected string",
                        other.describe()
                    )))
                }
            };
            if matches!(op, MatchOp::Regex | MatchOp::NotRegex) {
                if let Err(err) = regex::Regex::new(&format!("^(?:{value})$")) {
                    return Err(self.error(format!("invalid regular expression {value:?}: {err}")));
                }
            }
            matchers.push(LabelMatcher { name, op, value });

            match self.advance() {
                Token::Comma => continue,
                Token::RBrace => break,
                Token::Eof => return Err(self.error("unexpected end of input inside braces")),
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in label matching, expected \",\" or \"}}\"",
                        other.describe()
                    )))
                }
            }
        }
        Ok(matchers)
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, PromQLError> {
        if !FUNCTIONS.contains(&name.as_str()) {
            return Err(self.error(format!("unknown function with name {name:?}")));
        }
        self.advance();
        let args = self.parse_args("function call")?;
        Ok(Expr::Call { func: name, args })
    }

    fn parse_args(&mut self, context: &str) -> Result<Vec<Expr>, PromQLError> {
        self.expect(Token::LParen, context)?;
        let mut args = Vec::new();
        if self.peek() == &Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                Token::Eof => return Err(self.error("unclosed left parenthesis")),
                other => {
                    return Err(self.error(format!(
                        "unexpected {} in {context}, expected \",\" or \")\"",
                        other.describe()
                    )))
                }
            }
        }
        Ok(args)
    }

    fn parse_aggregate(&mut self, op: String) -> Result<Expr, PromQLError> {
        self.advance();
        let mut grouping = None;
        if self.peek_ident("by") || self.peek_ident("without") {
            grouping = Some(self.parse_grouping()?);
        }

        let context = "aggregation";
        let mut args = self.parse_args(context)?;

        if grouping.is_none() && (self.peek_ident("by") || self.peek_ident("without")) {
            grouping = Some(self.parse_grouping()?);
        }

        let wants_param = PARAMETRIZED_AGGREGATORS.contains(&op.as_str());
        let expected = if wants_param { 2 } else { 1 };
        if args.len() != expected {
            return Err(self.error(format!(
                "wrong number of arguments for aggregate expression provided, expected {expected}, got {}",
                args.len()
            )));
        }
        let expr = args.pop().map(Box::new).ok_or_else(|| self.error("missing aggregation body"))?;
        let param = args.pop().map(Box::new);
        let (without, grouping) = grouping.unwrap_or((false, Vec::new()));

        Ok(Expr::Aggregate {
            op,
            expr,
            param,
            grouping,
            without,
        })
    }

    fn parse_grouping(&mut self) -> Result<(bool, Vec<String>), PromQLError> {
        let without = self.peek_ident("without");
        self.advance();
        Ok((without, self.parse_label_list()?))
    }
}

fn matches_empty(m: &LabelMatcher) -> bool {
    match m.op {
        MatchOp::Equal => m.value.is_empty(),
        MatchOp::NotEqual => !m.value.is_empty(),
        MatchOp::Regex | MatchOp::NotRegex => {
            regex::Regex::new(&format!("^(?:{})$", m.value))
                .map(|re| re.is_match("") == (m.op == MatchOp::Regex))
                .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(input: &str) -> String {
        parse(input).unwrap().to_string()
    }

    #[test]
    fn parses_plain_selector() {
        let expr = parse("up").unwrap();
        assert_eq!(
            expr,
            Expr::VectorSelector(VectorSelector {
                name: Some("up".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn sorts_matchers_when_rendering() {
        assert_eq!(
            roundtrip(r#"disk_info{type="sat",interface_speed!="6.0 Gb/s"}"#),
            r#"disk_info{interface_speed!="6.0 Gb/s",type="sat"}"#
        );
    }

    #[test]
    fn parses_aggregation_grouping_before_and_after() {
        assert_eq!(roundtrip("sum(foo) by (job)"), "sum by (job) (foo)");
        assert_eq!(roundtrip("sum without(instance) (foo)"), "sum without (instance) (foo)");
        assert_eq!(roundtrip("topk(5, foo)"), "topk (5, foo)");
    }

    #[test]
    fn respects_operator_precedence() {
        let expr = parse("a + b * c").unwrap();
        match expr {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(op, BinaryOp::Add);
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }

        let expr = parse("a or b and c").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn power_is_right_associative() {
        let expr = parse("2 ^ 3 ^ 2").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Pow, lhs, rhs, .. } => {
                assert_eq!(*lhs, Expr::Number(2.0));
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_vector_matching() {
        assert_eq!(
            roundtrip("foo * on (job) group_left (team) bar"),
            "foo * on (job) group_left (team) bar"
        );
        assert_eq!(roundtrip("foo > bool 0"), "foo > bool 0");
    }

    #[test]
    fn parses_offsets_ranges_and_subqueries() {
        assert_eq!(
            roundtrip("rate(foo[5m] offset 1h)"),
            "rate(foo[5m] offset 1h)"
        );
        assert_eq!(
            roundtrip("max_over_time(sum(foo)[1h:5m])"),
            "max_over_time(sum (foo)[1h:5m])"
        );
        assert_eq!(roundtrip("foo offset -5m"), "foo offset -5m");
        assert_eq!(roundtrip("foo @ 1609746000"), "foo @ 1609746000");
    }

    #[test]
    fn parses_label_replace_with_string_args() {
        let expr = parse(
            r#"label_replace(node_filesystem_readonly{mountpoint!=""}, "device", "$2", "device", "/dev/(sd[a-z])")"#,
        )
        .unwrap();
        let selectors: Vec<String> = expr.selectors().iter().map(|s| s.to_string()).collect();
        assert_eq!(selectors, vec![r#"node_filesystem_readonly{mountpoint!=""}"#.to_string()]);
    }

    #[test]
    fn keeps_recording_rule_names_with_colons() {
        assert_eq!(roundtrip("job:http_requests:rate5m"), "job:http_requests:rate5m");
    }

    #[test]
    fn reports_unclosed_parenthesis() {
        let err = parse("sum(foo) without(").unwrap_err();
        assert!(err.message.contains("end of input"), "{err}");
        assert!(parse("sum(foo").is_err());
    }

    #[test]
    fn rejects_unknown_functions() {
        let err = parse("foo_bar(up)").unwrap_err();
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn rejects_empty_matchers() {
        assert!(parse(r#"{job=""}"#).is_err());
        assert!(parse(r#"{job="api"}"#).is_ok());
    }

    #[test]
    fn rejects_range_on_non_selector() {
        assert!(parse("sum(foo)[5m]").is_err());
    }

    #[test]
    fn negative_numbers_fold_into_literals() {
        assert_eq!(parse("-1").unwrap(), Expr::Number(-1.0));
    }
}
