//! Comparison, arithmetic and union operators with XPath 1.0 coercions.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::{XPathValue, string_to_number};
use crate::error::XPathError;

/// A non-node-set operand after node-sets have been broken into string values.
enum Scalar {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Scalar {
    fn to_number(&self) -> f64 {
        match self {
            Scalar::Str(s) => string_to_number(s),
            Scalar::Num(n) => *n,
            Scalar::Bool(b) => f64::from(u8::from(*b)),
        }
    }

    fn to_bool(&self) -> bool {
        match self {
            Scalar::Str(s) => !s.is_empty(),
            Scalar::Num(n) => *n != 0.0 && !n.is_nan(),
            Scalar::Bool(b) => *b,
        }
    }
}

/// Evaluates every operator except the short-circuiting `and`/`or`, which the
/// engine handles itself.
pub fn evaluate<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    use BinaryOperator::*;
    match op {
        Or => Ok(XPathValue::Boolean(left.to_bool() || right.to_bool())),
        And => Ok(XPathValue::Boolean(left.to_bool() && right.to_bool())),
        Equals | NotEquals | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            Ok(XPathValue::Boolean(compare(op, &left, &right)))
        }
        Plus => Ok(XPathValue::Number(left.to_number() + right.to_number())),
        Minus => Ok(XPathValue::Number(left.to_number() - right.to_number())),
        Multiply => Ok(XPathValue::Number(left.to_number() * right.to_number())),
        Divide => Ok(XPathValue::Number(left.to_number() / right.to_number())),
        // f64 remainder keeps the sign of the dividend, as XPath requires.
        Modulo => Ok(XPathValue::Number(left.to_number() % right.to_number())),
        Union => union(left, right),
    }
}

fn union<'a, N: DataSourceNode<'a>>(
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    let mut nodes = left.into_node_set("the '|' operator")?;
    nodes.extend(right.into_node_set("the '|' operator")?);
    nodes.sort();
    nodes.dedup();
    Ok(XPathValue::NodeSet(nodes))
}

fn to_scalar<'a, N: DataSourceNode<'a>>(value: &XPathValue<N>) -> Scalar {
    match value {
        XPathValue::String(s) => Scalar::Str(s.clone()),
        XPathValue::Number(n) => Scalar::Num(*n),
        XPathValue::Boolean(b) => Scalar::Bool(*b),
        XPathValue::NodeSet(nodes) => Scalar::Bool(!nodes.is_empty()),
    }
}

fn compare<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(a), XPathValue::NodeSet(b)) => {
            let right_values: Vec<Scalar> =
                b.iter().map(|n| Scalar::Str(n.string_value())).collect();
            a.iter().any(|x| {
                let x = Scalar::Str(x.string_value());
                right_values.iter().any(|y| compare_scalars(op, &x, y))
            })
        }
        // A node-set compared with a boolean is converted as a whole.
        (XPathValue::NodeSet(_), XPathValue::Boolean(_))
        | (XPathValue::Boolean(_), XPathValue::NodeSet(_)) => {
            compare_scalars(op, &to_scalar(left), &to_scalar(right))
        }
        (XPathValue::NodeSet(a), other) => {
            let other = to_scalar(other);
            a.iter()
                .any(|x| compare_scalars(op, &Scalar::Str(x.string_value()), &other))
        }
        (other, XPathValue::NodeSet(b)) => {
            let other = to_scalar(other);
            b.iter()
                .any(|y| compare_scalars(op, &other, &Scalar::Str(y.string_value())))
        }
        (l, r) => compare_scalars(op, &to_scalar(l), &to_scalar(r)),
    }
}

fn compare_scalars(op: BinaryOperator, left: &Scalar, right: &Scalar) -> bool {
    match op {
        BinaryOperator::Equals | BinaryOperator::NotEquals => {
            let equal = match (left, right) {
                (Scalar::Bool(_), _) | (_, Scalar::Bool(_)) => left.to_bool() == right.to_bool(),
                (Scalar::Num(_), _) | (_, Scalar::Num(_)) => left.to_number() == right.to_number(),
                (Scalar::Str(a), Scalar::Str(b)) => a == b,
            };
            if op == BinaryOperator::Equals {
                equal
            } else {
                !equal
            }
        }
        _ => {
            let (a, b) = (left.to_number(), right.to_number());
            match op {
                BinaryOperator::LessThan => a < b,
                BinaryOperator::LessThanOrEqual => a <= b,
                BinaryOperator::GreaterThan => a > b,
                BinaryOperator::GreaterThanOrEqual => a >= b,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{XmlNode, parse_document};

    type Value<'a> = XPathValue<XmlNode<'a, 'a>>;

    fn s<'a>(text: &str) -> Value<'a> {
        XPathValue::String(text.to_string())
    }

    fn truth<'a>(op: BinaryOperator, l: Value<'a>, r: Value<'a>) -> bool {
        evaluate(op, l, r).unwrap().to_bool()
    }

    #[test]
    fn test_scalar_equality_coercions() {
        use BinaryOperator::*;
        assert!(truth(Equals, s("1.0"), XPathValue::Number(1.0)));
        assert!(!truth(Equals, s("1.0"), s("1")));
        assert!(truth(Equals, s("x"), XPathValue::Boolean(true)));
        assert!(truth(NotEquals, XPathValue::Number(f64::NAN), XPathValue::Number(f64::NAN)));
        assert!(truth(LessThan, s("2"), s("10")));
    }

    #[test]
    fn test_node_set_comparisons_are_existential() {
        use BinaryOperator::*;
        let doc = parse_document("<r><a>1</a><a>2</a></r>").unwrap();
        let r = XmlNode::root(&doc).children().next().unwrap();
        let nodes: Vec<_> = r.children().collect();
        let set = || XPathValue::NodeSet(nodes.clone());
        assert!(truth(Equals, set(), s("2")));
        assert!(truth(NotEquals, set(), s("2")));
        assert!(truth(GreaterThan, set(), XPathValue::Number(1.5)));
        assert!(!truth(Equals, XPathValue::NodeSet(vec![]), s("")));
        assert!(truth(Equals, XPathValue::NodeSet(vec![]), XPathValue::Boolean(false)));
    }

    #[test]
    fn test_arithmetic() {
        use BinaryOperator::*;
        let n = |v: f64| -> Value<'static> { XPathValue::Number(v) };
        assert_eq!(evaluate(Modulo, n(-5.0), n(2.0)).unwrap(), n(-1.0));
        assert_eq!(evaluate(Divide, n(1.0), n(0.0)).unwrap(), n(f64::INFINITY));
        assert_eq!(evaluate(Plus, s("2"), n(3.0)).unwrap(), n(5.0));
    }

    #[test]
    fn test_union_rejects_scalars() {
        let err = evaluate(BinaryOperator::Union, s("a"), XPathValue::NodeSet(vec![])).unwrap_err();
        assert!(matches!(err, XPathError::TypeError(_)));
    }
}
