use std::fmt;
use std::time::Duration;

use crate::duration::format_duration;

/// Label matcher operator inside `{...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::Regex => write!(f, "=~"),
            Self::NotRegex => write!(f, "!~"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, quote(&self.value))
    }
}

/// `@` modifier on a selector or subquery.
#[derive(Debug, Clone, PartialEq)]
pub enum AtModifier {
    Timestamp(f64),
    Start,
    End,
}

impl fmt::Display for AtModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ts) => write!(f, "@ {}", format_number(*ts)),
            Self::Start => write!(f, "@ start()"),
            Self::End => write!(f, "@ end()"),
        }
    }
}

/// Signed offset, `offset -5m` looks forward in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    pub negative: bool,
    pub duration: Duration,
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        write!(f, "offset {}{}", sign, format_duration(self.duration))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorSelector {
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub offset: Option<Offset>,
    pub at: Option<AtModifier>,
}

impl VectorSelector {
    /// Metric name, from the bare name or an equality `__name__` matcher.
    pub fn metric_name(&self) -> Option<&str> {
        if let Some(name) = &self.name {
            return Some(name);
        }
        self.matchers
            .iter()
            .find(|m| m.name == "__name__" && m.op == MatchOp::Equal)
            .map(|m| m.value.as_str())
    }

    /// Matchers other than the one carrying the metric name.
    pub fn label_matchers(&self) -> impl Iterator<Item = &LabelMatcher> {
        let named = self.name.is_some();
        self.matchers
            .iter()
            .filter(move |m| !(named && m.name == "__name__"))
    }

    /// Same selector with every label matcher and modifier removed.
    pub fn bare(&self) -> VectorSelector {
        VectorSelector {
            name: self.metric_name().map(str::to_string),
            ..Default::default()
        }
    }

    /// Selector without `offset` / `@`, used when rendering range selectors.
    fn write_base(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name}")?;
        }
        let mut matchers: Vec<&LabelMatcher> = self.label_matchers().collect();
        matchers.sort_by(|a, b| a.name.cmp(&b.name));
        if !matchers.is_empty() || self.name.is_none() {
            let rendered: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
            write!(f, "{{{}}}", rendered.join(","))?;
        }
        Ok(())
    }

    fn write_modifiers(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(at) = &self.at {
            write!(f, " {at}")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " {offset}")?;
        }
        Ok(())
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_base(f)?;
        self.write_modifiers(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And | Self::Unless => 2,
            Self::Eq | Self::NotEq | Self::Gt | Self::Lt | Self::Gte | Self::Lte => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div | Self::Mod | Self::Atan2 => 5,
            Self::Pow => 6,
        }
    }

    pub fn is_right_associative(self) -> bool {
        self == Self::Pow
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Gt | Self::Lt | Self::Gte | Self::Lte
        )
    }

    pub fn is_set_operator(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Unless)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Atan2 => "atan2",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Unless => "unless",
        };
        write!(f, "{s}")
    }
}

/// `on(...)` / `ignoring(...)` plus optional `group_left` / `group_right`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VectorMatching {
    pub on: bool,
    pub labels: Vec<String>,
    pub group: Option<Grouping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grouping {
    Left(Vec<String>),
    Right(Vec<String>),
}

impl fmt::Display for VectorMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kw = if self.on { "on" } else { "ignoring" };
        write!(f, "{kw} ({})", self.labels.join(", "))?;
        match &self.group {
            Some(Grouping::Left(l)) => write!(f, " group_left ({})", l.join(", ")),
            Some(Grouping::Right(l)) => write!(f, " group_right ({})", l.join(", ")),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    VectorSelector(VectorSelector),
    MatrixSelector {
        selector: VectorSelector,
        range: Duration,
    },
    Subquery {
        expr: Box<Expr>,
        range: Duration,
        step: Option<Duration>,
        offset: Option<Offset>,
        at: Option<AtModifier>,
    },
    Paren(Box<Expr>),
    Unary {
        negative: bool,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        return_bool: bool,
        matching: Option<VectorMatching>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Aggregate {
        op: String,
        expr: Box<Expr>,
        param: Option<Box<Expr>>,
        grouping: Vec<String>,
        without: bool,
    },
}

impl Expr {
    /// Direct sub-expressions, in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Number(_)
            | Self::String(_)
            | Self::VectorSelector(_)
            | Self::MatrixSelector { .. } => vec![],
            Self::Subquery { expr, .. } | Self::Paren(expr) | Self::Unary { expr, .. } => {
                vec![expr.as_ref()]
            }
            Self::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            Self::Call { args, .. } => args.iter().collect(),
            Self::Aggregate { expr, param, .. } => {
                let mut out: Vec<&Expr> = Vec::with_capacity(2);
                if let Some(p) = param {
                    out.push(p.as_ref());
                }
                out.push(expr.as_ref());
                out
            }
        }
    }

    /// Pre-order traversal over this node and all its descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Every vector selector in the expression, including the ones wrapped
    /// in range selectors.
    pub fn selectors(&self) -> Vec<&VectorSelector> {
        let mut out = Vec::new();
        self.walk(&mut |node| match node {
            Expr::VectorSelector(vs) => out.push(vs),
            Expr::MatrixSelector { selector, .. } => out.push(selector),
            _ => {}
        });
        out
    }

    /// Strip any number of wrapping parentheses.
    pub fn unparen(&self) -> &Expr {
        match self {
            Self::Paren(inner) => inner.unparen(),
            other => other,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", format_number(*v)),
            Self::String(s) => write!(f, "{}", quote(s)),
            Self::VectorSelector(vs) => write!(f, "{vs}"),
            Self::MatrixSelector { selector, range } => {
                selector.write_base(f)?;
                write!(f, "[{}]", format_duration(*range))?;
                selector.write_modifiers(f)
            }
            Self::Subquery {
                expr,
                range,
                step,
                offset,
                at,
            } => {
                let step = step.map(format_duration).unwrap_or_default();
                write!(f, "{expr}[{}:{step}]", format_duration(*range))?;
                if let Some(at) = at {
                    write!(f, " {at}")?;
                }
                if let Some(offset) = offset {
                    write!(f, " {offset}")?;
                }
                Ok(())
            }
            Self::Paren(inner) => write!(f, "({inner})"),
            Self::Unary { negative, expr } => {
                write!(f, "{}{expr}", if *negative { "-" } else { "+" })
            }
            Self::Binary {
                op,
                lhs,
                rhs,
                return_bool,
                matching,
            } => {
                write!(f, "{lhs} {op}")?;
                if *return_bool {
                    write!(f, " bool")?;
                }
                if let Some(m) = matching {
                    write!(f, " {m}")?;
                }
                write!(f, " {rhs}")
            }
            Self::Call { func, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{func}({})", rendered.join(", "))
            }
            Self::Aggregate {
                op,
                expr,
                param,
                grouping,
                without,
            } => {
                write!(f, "{op}")?;
                if *without {
                    write!(f, " without ({})", grouping.join(", "))?;
                } else if !grouping.is_empty() {
                    write!(f, " by ({})", grouping.join(", "))?;
                }
                write!(f, " (")?;
                if let Some(p) = param {
                    write!(f, "{p}, ")?;
                }
                write!(f, "{expr})")
            }
        }
    }
}

pub(crate) fn format_number(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        format!("{v}")
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
