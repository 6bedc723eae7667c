//! Minimal comparison grammar for condition nodes
//!
//! `<left> <op> <right>` with `op` one of `>=`, `<=`, `==`, `!=`, `>`, `<`,
//! tried in that order. The first operator that splits the expression into
//! exactly two parts wins, so `>=` is never read as `>` followed by `=`.

use crate::error::NodeError;
use std::cmp::Ordering;

const OPERATORS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];

/// Parsed operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Operand {
    /// Numbers first, then booleans, then quoted strings, else the raw text
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(n) = js_number(trimmed) {
            return Operand::Number(n);
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Operand::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Operand::Bool(false);
        }
        if let Some(inner) = unquote(trimmed) {
            return Operand::Text(inner.to_string());
        }
        Operand::Text(trimmed.to_string())
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            Operand::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Operand::Text(s) => js_number(s.trim()),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Operand::Number(n) => format_number(*n),
            Operand::Bool(b) => b.to_string(),
            Operand::Text(s) => s.clone(),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Ge,
    Le,
    Eq,
    Ne,
    Gt,
    Lt,
}

impl Comparison {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            ">=" => Some(Comparison::Ge),
            "<=" => Some(Comparison::Le),
            "==" => Some(Comparison::Eq),
            "!=" => Some(Comparison::Ne),
            ">" => Some(Comparison::Gt),
            "<" => Some(Comparison::Lt),
            _ => None,
        }
    }
}

/// A parsed `<left> <op> <right>` expression
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub op: Comparison,
    pub right: Operand,
}

impl Condition {
    pub fn parse(expression: &str) -> Result<Self, NodeError> {
        for token in OPERATORS {
            let parts: Vec<&str> = expression.split(token).collect();
            if parts.len() == 2 {
                if let Some(op) = Comparison::from_token(token) {
                    return Ok(Condition {
                        left: Operand::parse(parts[0]),
                        op,
                        right: Operand::parse(parts[1]),
                    });
                }
            }
        }
        Err(NodeError::InvalidExpression(expression.to_string()))
    }

    pub fn evaluate(&self) -> bool {
        match self.op {
            Comparison::Eq => loosely_equal(&self.left, &self.right),
            Comparison::Ne => !loosely_equal(&self.left, &self.right),
            Comparison::Gt => compare(&self.left, &self.right) == Some(Ordering::Greater),
            Comparison::Lt => compare(&self.left, &self.right) == Some(Ordering::Less),
            Comparison::Ge => matches!(
                compare(&self.left, &self.right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Le => matches!(
                compare(&self.left, &self.right),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// Parse and evaluate in one step
pub fn evaluate(expression: &str) -> Result<bool, NodeError> {
    Ok(Condition::parse(expression)?.evaluate())
}

fn loosely_equal(left: &Operand, right: &Operand) -> bool {
    match (left, right) {
        (Operand::Text(a), Operand::Text(b)) => a == b,
        (Operand::Bool(a), Operand::Bool(b)) => a == b,
        (Operand::Text(_), _) | (_, Operand::Text(_)) => left.as_text() == right.as_text(),
        _ => left.as_number() == right.as_number(),
    }
}

/// Numbers compare numerically, two strings lexicographically, anything else
/// through numeric coercion (`None` when a side is not numeric)
fn compare(left: &Operand, right: &Operand) -> Option<Ordering> {
    match (left, right) {
        (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(b)),
        _ => left.as_number()?.partial_cmp(&right.as_number()?),
    }
}

/// `Number(x)` semantics: empty is 0, hex/octal/binary prefixes, `Infinity`
fn js_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return Some(0.0);
    }
    match s {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&s[2..], radix).ok().map(|n| n as f64);
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'))
    {
        return None;
    }
    s.parse::<f64>().ok()
}

fn unquote(s: &str) -> Option<&str> {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparisons() {
        assert!(evaluate("15 > 10").unwrap());
        assert!(!evaluate("5 > 10").unwrap());
        assert!(evaluate("10 >= 10").unwrap());
        assert!(evaluate("3 <= 3.5").unwrap());
        assert!(evaluate("2 < 10").unwrap());
        assert!(evaluate("1e3 == 1000").unwrap());
        assert!(evaluate("0x10 == 16").unwrap());
    }

    #[test]
    fn test_two_char_operators_win() {
        let parsed = Condition::parse("5 >= 5").unwrap();
        assert_eq!(parsed.op, Comparison::Ge);
        assert_eq!(parsed.right, Operand::Number(5.0));

        let parsed = Condition::parse("a != b").unwrap();
        assert_eq!(parsed.op, Comparison::Ne);
        assert!(parsed.evaluate());
    }

    #[test]
    fn test_strings_and_booleans() {
        assert!(evaluate("\"open\" == 'open'").unwrap());
        assert!(evaluate("status == status").unwrap());
        assert!(evaluate("TRUE == true").unwrap());
        assert!(evaluate("true == 1").unwrap());
        assert!(evaluate("'apple' < 'banana'").unwrap());
        assert!(!evaluate("abc > 5").unwrap());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(evaluate("not an expr"), Err(NodeError::InvalidExpression(_))));
        // two `>` splits into three parts, no operator applies
        assert!(evaluate("1 > 2 > 3").is_err());
    }

    #[test]
    fn test_operand_parsing() {
        assert_eq!(Operand::parse("  42 "), Operand::Number(42.0));
        assert_eq!(Operand::parse(""), Operand::Number(0.0));
        assert_eq!(Operand::parse("False"), Operand::Bool(false));
        assert_eq!(Operand::parse("'quoted'"), Operand::Text("quoted".into()));
        assert_eq!(Operand::parse("nan"), Operand::Text("nan".into()));
        assert_eq!(Operand::parse("1.2.3"), Operand::Text("1.2.3".into()));
    }
}
