//! Scalar pattern atoms: an optional comparison operator and an operand.

use serde_json::Value;

/// The comparison operator of a pattern atom. A bare operand means equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    More,
    Less,
    MoreEqual,
    LessEqual,
}

// === impl Operator ===

impl Operator {
    /// Splits a string pattern into its operator and operand. Two-character
    /// operators are matched before their one-character prefixes.
    pub fn parse(pattern: &str) -> (Operator, &str) {
        for (prefix, operator) in [
            (">=", Operator::MoreEqual),
            ("<=", Operator::LessEqual),
            ("!=", Operator::NotEqual),
            (">", Operator::More),
            ("<", Operator::Less),
            ("!", Operator::NotEqual),
            ("=", Operator::Equal),
        ] {
            if let Some(operand) = pattern.strip_prefix(prefix) {
                return (operator, operand);
            }
        }

        (Operator::Equal, pattern)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "",
            Operator::NotEqual => "!=",
            Operator::More => ">",
            Operator::Less => "<",
            Operator::MoreEqual => ">=",
            Operator::LessEqual => "<=",
        }
    }
}

/// Decides whether a resource leaf matches a pattern atom.
///
/// Non-string pattern literals compare structurally, with numbers coerced
/// through `f64`. String patterns carry an optional operator; their operands
/// are compared numerically when both sides parse as decimal numbers, and as
/// `*`/`?` wildcards otherwise. The atom `"*"` matches any non-null value;
/// `null` matches only missing or null fields. This function never fails:
/// a malformed atom is a mismatch, reported by the caller with its path.
pub fn validate_value_with_pattern(value: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Null => value.is_null(),
        Value::Bool(b) => value.as_bool() == Some(*b),
        Value::Number(n) => match (n.as_f64(), as_float(value)) {
            (Some(want), Some(have)) => have == want,
            _ => false,
        },
        Value::String(s) => validate_string_pattern(value, s),
        pattern => {
            tracing::warn!(?pattern, "pattern atom must be a scalar");
            false
        }
    }
}

/// Exact structural equality with numeric coercion; wildcard and operator
/// interpretation are disabled. Used for equality-anchored fields.
pub fn equal_values(value: &Value, pattern: &Value) -> bool {
    match (pattern, value) {
        (Value::Number(want), have) => as_float(have) == want.as_f64(),
        (want, have) => want == have,
    }
}

fn validate_string_pattern(value: &Value, pattern: &str) -> bool {
    if pattern == "*" {
        return !value.is_null();
    }

    let (operator, operand) = Operator::parse(pattern);
    match operator {
        Operator::Equal => matches_operand(value, operand),
        Operator::NotEqual => !matches_operand(value, operand),
        operator => compare_numeric(value, operand, operator),
    }
}

/// Equality between a resource leaf and a string operand: numeric when both
/// sides parse as numbers, a wildcard match when the operand carries `*` or
/// `?`, and literal comparison otherwise.
fn matches_operand(value: &Value, operand: &str) -> bool {
    if let Ok(want) = operand.parse::<f64>() {
        return as_float(value) == Some(want);
    }

    match value {
        Value::String(have) => {
            if operand.contains('*') || operand.contains('?') {
                wildcard(operand, have)
            } else {
                have == operand
            }
        }
        Value::Bool(have) => operand == if *have { "true" } else { "false" },
        _ => false,
    }
}

fn compare_numeric(value: &Value, operand: &str, operator: Operator) -> bool {
    let (have, want) = match (as_float(value), operand.parse::<f64>().ok()) {
        (Some(have), Some(want)) => (have, want),
        _ => {
            tracing::debug!(?value, %operand, "operands are not comparable numbers");
            return false;
        }
    };

    match operator {
        Operator::More => have > want,
        Operator::Less => have < want,
        Operator::MoreEqual => have >= want,
        Operator::LessEqual => have <= want,
        Operator::Equal | Operator::NotEqual => unreachable!("handled by the caller"),
    }
}

/// Coerces a leaf to `f64` for comparison: numbers directly, strings by
/// parsing. Everything else is not a number.
pub(crate) fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Matches `candidate` against a Unix shell style wildcard: `*` matches any
/// run of characters and `?` exactly one. A pattern without wildcards is an
/// exact comparison.
pub(crate) fn wildcard(pattern: &str, candidate: &str) -> bool {
    match globset::GlobBuilder::new(pattern).build() {
        Ok(glob) => glob.compile_matcher().is_match(candidate),
        Err(error) => {
            tracing::warn!(%pattern, %error, "malformed wildcard pattern");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_operators() {
        assert_eq!(Operator::parse("10"), (Operator::Equal, "10"));
        assert_eq!(Operator::parse(">10"), (Operator::More, "10"));
        assert_eq!(Operator::parse(">=10"), (Operator::MoreEqual, "10"));
        assert_eq!(Operator::parse("<=10"), (Operator::LessEqual, "10"));
        assert_eq!(Operator::parse("<10"), (Operator::Less, "10"));
        assert_eq!(Operator::parse("!10"), (Operator::NotEqual, "10"));
        assert_eq!(Operator::parse("!=10"), (Operator::NotEqual, "10"));
        assert_eq!(Operator::parse("=10"), (Operator::Equal, "10"));
    }

    #[test]
    fn literal_atoms() {
        assert!(validate_value_with_pattern(&json!(true), &json!(true)));
        assert!(!validate_value_with_pattern(&json!(false), &json!(true)));
        assert!(validate_value_with_pattern(&json!(null), &json!(null)));
        assert!(!validate_value_with_pattern(&json!("x"), &json!(null)));
        assert!(validate_value_with_pattern(&json!(3), &json!(3.0)));
        assert!(validate_value_with_pattern(&json!("3"), &json!(3)));
        assert!(!validate_value_with_pattern(&json!("three"), &json!(3)));
    }

    #[test]
    fn relational_atoms() {
        for (value, pattern, matches) in &[
            (json!(5), ">4", true),
            (json!(5), ">5", false),
            (json!(5), ">=5", true),
            (json!(4), "<5", true),
            (json!(4), "<=3", false),
            (json!("512"), ">100", true),
            (json!("abc"), ">100", false),
            (json!(true), ">100", false),
        ] {
            assert_eq!(
                validate_value_with_pattern(value, &json!(pattern)),
                *matches,
                "{value} {pattern}"
            );
        }
    }

    #[test]
    fn equality_atoms() {
        assert!(validate_value_with_pattern(&json!("nginx"), &json!("nginx")));
        assert!(!validate_value_with_pattern(&json!("nginx"), &json!("httpd")));
        assert!(validate_value_with_pattern(&json!("10"), &json!("10.0")));
        assert!(validate_value_with_pattern(&json!("httpd"), &json!("!nginx")));
        assert!(!validate_value_with_pattern(&json!("nginx"), &json!("!nginx")));
    }

    #[test]
    fn wildcard_atoms() {
        assert!(validate_value_with_pattern(
            &json!("nginx:1.19"),
            &json!("nginx:*")
        ));
        assert!(validate_value_with_pattern(
            &json!("nginx:1.19"),
            &json!("!*:latest")
        ));
        assert!(!validate_value_with_pattern(
            &json!("nginx:latest"),
            &json!("!*:latest")
        ));
        assert!(validate_value_with_pattern(&json!("abc"), &json!("a?c")));
        assert!(!validate_value_with_pattern(&json!("abbc"), &json!("a?c")));
    }

    #[test]
    fn star_requires_presence() {
        assert!(validate_value_with_pattern(&json!("anything"), &json!("*")));
        assert!(validate_value_with_pattern(&json!(0), &json!("*")));
        assert!(!validate_value_with_pattern(&json!(null), &json!("*")));
    }

    #[test]
    fn exact_equality_disables_wildcards() {
        assert!(equal_values(&json!("a*c"), &json!("a*c")));
        assert!(!equal_values(&json!("abc"), &json!("a*c")));
        assert!(equal_values(&json!(3), &json!(3.0)));
    }
}
