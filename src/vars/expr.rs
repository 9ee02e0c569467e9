//! Expression tree and tree-walking evaluator

use std::cmp::Ordering;

use crate::types::Value;

/// Namespaces an expression may read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Decoded DCS-BIOS controls
    Bios,
    /// Lua export values
    Lo,
    /// Raw cockpit arguments
    CockpitArgs,
    /// Variables resolved so far
    Vars,
}

impl Namespace {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bios" => Some(Namespace::Bios),
            "lo" => Some(Namespace::Lo),
            "cockpit_args" => Some(Namespace::CockpitArgs),
            "vars" => Some(Namespace::Vars),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtE,
    Lt,
    LtE,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::GtE => ">=",
            CompareOp::Lt => "<",
            CompareOp::LtE => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed variable expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `namespace.key[.more...]`; anything past the key reads as absent
    Attribute { namespace: Namespace, path: Vec<String> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Bool { op: BoolOp, operands: Vec<Expr> },
    /// Chained comparison: `a < b <= c`
    Compare { left: Box<Expr>, comparisons: Vec<(CompareOp, Expr)> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
}

/// Read access to the namespaces during evaluation.
pub trait Scope {
    fn lookup(&self, namespace: Namespace, key: &str) -> Value;
}

impl Expr {
    /// Evaluate against `scope`. Errors describe runtime type problems such
    /// as ordering a string against a number or dividing by zero.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value, String> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Attribute { namespace, path } => match path.as_slice() {
                [key] => Ok(scope.lookup(*namespace, key)),
                _ => Ok(Value::Null),
            },
            Expr::Unary { op: UnaryOp::Not, operand } => {
                Ok(Value::Bool(!operand.evaluate(scope)?.is_truthy()))
            }
            Expr::Unary { op: UnaryOp::Neg, operand } => negate(operand.evaluate(scope)?),
            Expr::Bool { op, operands } => {
                for operand in operands {
                    let truthy = operand.evaluate(scope)?.is_truthy();
                    match (op, truthy) {
                        (BoolOp::And, false) => return Ok(Value::Bool(false)),
                        (BoolOp::Or, true) => return Ok(Value::Bool(true)),
                        _ => {}
                    }
                }
                Ok(Value::Bool(matches!(op, BoolOp::And)))
            }
            Expr::Compare { left, comparisons } => {
                let mut left = left.evaluate(scope)?;
                for (op, right) in comparisons {
                    let right = right.evaluate(scope)?;
                    if left.is_null() || right.is_null() || !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Binary { op, left, right } => {
                let left = left.evaluate(scope)?;
                let right = right.evaluate(scope)?;
                if left.is_null() || right.is_null() {
                    return Ok(Value::Null);
                }
                binary(*op, &left, &right)
            }
        }
    }
}

fn negate(value: Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
        Value::Int(i) => Ok(i.checked_neg().map(Value::Int).unwrap_or(Value::Float(-(i as f64)))),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Text(_) => Err("bad operand type for unary -: 'str'".to_string()),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, String> {
    match op {
        CompareOp::Eq => Ok(left.loose_eq(right)),
        CompareOp::NotEq => Ok(!left.loose_eq(right)),
        _ => {
            let ordering = left.partial_order(right).ok_or_else(|| {
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                )
            })?;
            Ok(match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtE => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtE => ordering != Ordering::Greater,
                CompareOp::Eq | CompareOp::NotEq => false,
            })
        }
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
    if let (BinOp::Add, Value::Text(a), Value::Text(b)) = (op, left, right) {
        return Ok(Value::Text(format!("{}{}", a, b)));
    }
    let unsupported = || {
        format!(
            "unsupported operand types for {}: '{}' and '{}'",
            match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "/",
            },
            left.type_name(),
            right.type_name()
        )
    };
    let result = match op {
        BinOp::Add => left.arith(right, i64::checked_add, |a, b| a + b),
        BinOp::Sub => left.arith(right, i64::checked_sub, |a, b| a - b),
        BinOp::Mul => left.arith(right, i64::checked_mul, |a, b| a * b),
        BinOp::Div => {
            // true division: always a float, never integral
            let divisor = right.as_f64().ok_or_else(unsupported)?;
            if divisor == 0.0 {
                return Err("division by zero".to_string());
            }
            left.as_f64().map(|dividend| Value::Float(dividend / divisor))
        }
    };
    result.ok_or_else(unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Scope for Fixed {
        fn lookup(&self, namespace: Namespace, key: &str) -> Value {
            match (namespace, key) {
                (Namespace::Bios, "RPM") => Value::Int(60),
                (Namespace::Bios, "NAME") => Value::Text("A-10C".into()),
                _ => Value::Null,
            }
        }
    }

    fn attr(namespace: Namespace, key: &str) -> Box<Expr> {
        Box::new(Expr::Attribute { namespace, path: vec![key.to_string()] })
    }

    fn lit(value: impl Into<Value>) -> Box<Expr> {
        Box::new(Expr::Literal(value.into()))
    }

    #[test]
    fn absent_operand_makes_comparison_false() {
        let expr = Expr::Compare {
            left: attr(Namespace::Bios, "MISSING"),
            comparisons: vec![(CompareOp::NotEq, Expr::Literal(Value::Int(1)))],
        };
        assert_eq!(expr.evaluate(&Fixed), Ok(Value::Bool(false)));
    }

    #[test]
    fn absent_operand_makes_arithmetic_absent() {
        let expr = Expr::Binary { op: BinOp::Add, left: attr(Namespace::Lo, "x"), right: lit(1i64) };
        assert_eq!(expr.evaluate(&Fixed), Ok(Value::Null));
    }

    #[test]
    fn division_is_true_division() {
        let expr = Expr::Binary { op: BinOp::Div, left: attr(Namespace::Bios, "RPM"), right: lit(120i64) };
        assert_eq!(expr.evaluate(&Fixed), Ok(Value::Float(0.5)));

        let by_zero = Expr::Binary { op: BinOp::Div, left: lit(1i64), right: lit(0i64) };
        assert_eq!(by_zero.evaluate(&Fixed), Err("division by zero".to_string()));
    }

    #[test]
    fn ordering_mismatched_types_is_an_error() {
        let expr = Expr::Compare {
            left: attr(Namespace::Bios, "NAME"),
            comparisons: vec![(CompareOp::Lt, Expr::Literal(Value::Int(3)))],
        };
        assert!(expr.evaluate(&Fixed).unwrap_err().contains("'<' not supported"));
    }

    #[test]
    fn boolean_ops_short_circuit() {
        // the second operand would fail if evaluated
        let failing = Expr::Binary { op: BinOp::Div, left: lit(1i64), right: lit(0i64) };
        let expr = Expr::Bool { op: BoolOp::Or, operands: vec![Expr::Literal(Value::Bool(true)), failing] };
        assert_eq!(expr.evaluate(&Fixed), Ok(Value::Bool(true)));
    }

    #[test]
    fn nested_attribute_is_absent() {
        let expr = Expr::Attribute { namespace: Namespace::Bios, path: vec!["RPM".into(), "x".into()] };
        assert_eq!(expr.evaluate(&Fixed), Ok(Value::Null));
    }
}
