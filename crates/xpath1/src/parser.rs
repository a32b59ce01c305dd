//! A `nom`-based parser for the XPath 1.0 expression language.

use super::ast::*;
use crate::error::XPathError;
use crate::namespaces::NamespaceMap;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, not, opt, peek, recognize, value},
    error::ErrorKind,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

// --- Main Public Parser ---

/// Parses an expression and binds its prefixed name tests through `namespaces`.
pub fn parse_expression(input: &str, namespaces: &NamespaceMap) -> Result<Expression, XPathError> {
    let mut expr = match expression(input.trim()) {
        Ok(("", expr)) => expr,
        Ok((rem, _)) => {
            return Err(XPathError::XPathParse(
                input.to_string(),
                format!("Parser did not consume all input. Remainder: '{}'", rem),
            ));
        }
        Err(e) => return Err(XPathError::XPathParse(input.to_string(), e.to_string())),
    };
    expr.resolve_names(namespaces)?;
    Ok(expr)
}

// --- Combinators & Helpers ---

fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// An operator name such as `and` or `div`, which must not run into a name.
fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag(word), not(satisfy(is_name_char)))
}

type OperandParser = for<'a> fn(&'a str) -> IResult<&'a str, Expression>;
type OperatorParser = for<'a> fn(&'a str) -> IResult<&'a str, BinaryOperator>;

/// Parses `operand (operator operand)*` into a left-associative tree.
fn binary_chain(
    input: &str,
    operand: OperandParser,
    operator: OperatorParser,
) -> IResult<&str, Expression> {
    let (mut rest, mut left) = operand(input)?;
    loop {
        let attempt = preceded(multispace0, operator)
            .parse(rest)
            .and_then(|(i, op)| preceded(multispace0, operand).parse(i).map(|(i, r)| (i, (op, r))));
        match attempt {
            Ok((i, (op, right))) => {
                left = Expression::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
                rest = i;
            }
            Err(nom::Err::Error(_)) => return Ok((rest, left)),
            Err(e) => return Err(e),
        }
    }
}

// --- Expression Parsers (in order of precedence) ---

fn expression(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::Or, keyword("or")).parse(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::And, keyword("and")).parse(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::NotEquals, tag("!=")),
        value(BinaryOperator::Equals, char('=')),
    ))
    .parse(input)
}

fn relational_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::LessThanOrEqual, tag("<=")),
        value(BinaryOperator::GreaterThanOrEqual, tag(">=")),
        value(BinaryOperator::LessThan, char('<')),
        value(BinaryOperator::GreaterThan, char('>')),
    ))
    .parse(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Plus, char('+')),
        value(BinaryOperator::Minus, char('-')),
    ))
    .parse(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Multiply, char('*')),
        value(BinaryOperator::Divide, keyword("div")),
        value(BinaryOperator::Modulo, keyword("mod")),
    ))
    .parse(input)
}

fn union_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::Union, char('|')).parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, and_expr, or_op)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, equality_expr, and_op)
}

fn equality_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, relational_expr, equality_op)
}

fn relational_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, additive_expr, relational_op)
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, multiplicative_expr, additive_op)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, unary_expr, multiplicative_op)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    let (i, negations) = many0(ws(char('-'))).parse(input)?;
    let (i, mut expr) = union_expr(i)?;
    for _ in 0..negations.len() {
        expr = Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(expr),
        };
    }
    Ok((i, expr))
}

fn union_expr(input: &str) -> IResult<&str, Expression> {
    binary_chain(input, path_expr, union_op)
}

fn path_separator(input: &str) -> IResult<&str, &str> {
    alt((tag("//"), tag("/"))).parse(input)
}

fn append_steps(steps: &mut Vec<Step>, remainder: Vec<(&str, Step)>) {
    for (sep, next_step) in remainder {
        if sep == "//" {
            steps.push(Step::descendant_or_self());
        }
        steps.push(next_step);
    }
}

/// Handles the ambiguity between location paths and primary expressions that
/// may be followed by further steps (`$var/item`, `key('k', .)//p`).
fn path_expr(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0(input)?;
    // Primary expressions go first so that `position()` is not read as a step.
    let (i, start_expr) =
        alt((filter_expr, map(location_path, Expression::LocationPath))).parse(input)?;

    let (i, remainder) = many0(pair(ws(path_separator), step)).parse(i)?;
    if remainder.is_empty() {
        return Ok((i, start_expr));
    }

    let (start_point, is_absolute, mut steps) = match start_expr {
        Expression::LocationPath(lp) => (lp.start_point, lp.is_absolute, lp.steps),
        other => (Some(Box::new(other)), false, vec![]),
    };
    append_steps(&mut steps, remainder);

    Ok((
        i,
        Expression::LocationPath(LocationPath {
            start_point,
            is_absolute,
            steps,
        }),
    ))
}

fn filter_expr(input: &str) -> IResult<&str, Expression> {
    let (i, primary) = primary_expr(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    if predicates.is_empty() {
        Ok((i, primary))
    } else {
        Ok((
            i,
            Expression::Filter {
                primary: Box::new(primary),
                predicates,
            },
        ))
    }
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    alt((
        variable_reference,
        number_literal,
        map(string_literal, Expression::Literal),
        function_call,
        delimited(ws(char('(')), expression, ws(char(')'))),
    ))
    .parse(input)
}

// --- Literal Parsers ---

/// `Digits ('.' Digits?)? | '.' Digits`. The literal is sliced off by length so
/// a fraction ending the input is kept.
fn number_literal(input: &str) -> IResult<&str, Expression> {
    let is_digit = |c: char| c.is_ascii_digit();
    let (rest, whole) = take_while(is_digit).parse(input)?;
    let (rest, fraction) = match rest.strip_prefix('.') {
        Some(after) => {
            let (rest, digits) = take_while(is_digit).parse(after)?;
            (rest, Some(digits))
        }
        None => (rest, None),
    };
    if whole.is_empty() && fraction.is_none_or(str::is_empty) {
        return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Digit)));
    }
    let text = &input[..input.len() - rest.len()];
    Ok((rest, Expression::Number(text.parse().unwrap_or(f64::NAN))))
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

fn variable_reference(input: &str) -> IResult<&str, Expression> {
    map(preceded(char('$'), q_name), |name| {
        Expression::Variable(name.to_string())
    })
    .parse(input)
}

// --- Name and NodeTest Parsers ---

fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_name_start), take_while(is_name_char))).parse(input)
}

fn q_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(nc_name, opt(pair(char(':'), nc_name)))).parse(input)
}

const NODE_TYPE_NAMES: [&str; 4] = ["text", "node", "comment", "processing-instruction"];

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    let empty_parens = || pair(ws(char('(')), char(')'));
    alt((
        value(
            NodeTest::NodeType(NodeTypeTest::Text),
            terminated(tag("text"), empty_parens()),
        ),
        value(
            NodeTest::NodeType(NodeTypeTest::Node),
            terminated(tag("node"), empty_parens()),
        ),
        value(
            NodeTest::NodeType(NodeTypeTest::Comment),
            terminated(tag("comment"), empty_parens()),
        ),
        map(
            preceded(
                tag("processing-instruction"),
                delimited(ws(char('(')), opt(ws(string_literal)), char(')')),
            ),
            |target| NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(target)),
        ),
    ))
    .parse(input)
}

pub fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        value(NodeTest::Wildcard, char('*')),
        map(terminated(nc_name, tag(":*")), |prefix: &str| {
            NodeTest::NamespaceWildcard {
                prefix: prefix.to_string(),
                namespace: None,
            }
        }),
        node_type_test,
        map(q_name, |name| NodeTest::Name(NameTest::new(name))),
    ))
    .parse(input)
}

// --- Path Parsers ---

fn axis(input: &str) -> IResult<&str, Axis> {
    let (i, name) = nc_name(input)?;
    let axis = match name {
        "child" => Axis::Child,
        "descendant" => Axis::Descendant,
        "descendant-or-self" => Axis::DescendantOrSelf,
        "attribute" => Axis::Attribute,
        "parent" => Axis::Parent,
        "ancestor" => Axis::Ancestor,
        "ancestor-or-self" => Axis::AncestorOrSelf,
        "self" => Axis::SelfAxis,
        "following-sibling" => Axis::FollowingSibling,
        "preceding-sibling" => Axis::PrecedingSibling,
        "following" => Axis::Following,
        "preceding" => Axis::Preceding,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Tag)));
        }
    };
    let (i, _) = ws(tag("::")).parse(i)?;
    Ok((i, axis))
}

fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), expression, ws(char(']'))).parse(input)
}

fn full_step(input: &str) -> IResult<&str, Step> {
    let (i, (axis, node_test)) = alt((
        map(preceded(pair(char('@'), multispace0), node_test), |nt| {
            (Axis::Attribute, nt)
        }),
        map(pair(opt(axis), node_test), |(ax, nt)| {
            (ax.unwrap_or(Axis::Child), nt)
        }),
    ))
    .parse(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((
        i,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

pub(crate) fn step(input: &str) -> IResult<&str, Step> {
    alt((
        value(
            Step::new(Axis::Parent, NodeTest::NodeType(NodeTypeTest::Node)),
            tag(".."),
        ),
        value(
            Step::new(Axis::SelfAxis, NodeTest::NodeType(NodeTypeTest::Node)),
            char('.'),
        ),
        full_step,
    ))
    .parse(input)
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (i, is_absolute, mut steps) = match path_separator(input) {
        Ok((rest, "//")) => {
            let (rest, first) = preceded(multispace0, step).parse(rest)?;
            (rest, true, vec![Step::descendant_or_self(), first])
        }
        Ok((rest, _)) => match preceded(multispace0, step).parse(rest) {
            Ok((rest, first)) => (rest, true, vec![first]),
            // A path that is just "/".
            Err(_) => (rest, true, vec![]),
        },
        Err(_) => {
            let (rest, first) = step(input)?;
            (rest, false, vec![first])
        }
    };

    // After the first step, subsequent steps must be preceded by / or //.
    let (i, remainder) = many0(pair(ws(path_separator), step)).parse(i)?;
    append_steps(&mut steps, remainder);

    Ok((
        i,
        LocationPath {
            start_point: None,
            is_absolute,
            steps,
        },
    ))
}

// --- Function Call Parser ---

fn function_call(input: &str) -> IResult<&str, Expression> {
    // A function call must be a QName followed by '('. The lookahead keeps a
    // plain step name (like 'foo' in 'foo/bar') from being read as a call.
    let (i, name) = q_name(input)?;
    let (i, _) = peek(ws(char('('))).parse(i)?;

    // Node-type tests like text() are handled by the step parser.
    if NODE_TYPE_NAMES.contains(&name) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Verify,
        )));
    }

    let (i, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )
    .parse(i)?;

    Ok((
        i,
        Expression::FunctionCall {
            name: name.to_string(),
            args,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEI: &str = "http://www.monasterium.net/NS/cei";

    fn parse(input: &str) -> Expression {
        parse_expression(input, &NamespaceMap::new()).unwrap()
    }

    fn name(local: &str) -> NodeTest {
        NodeTest::Name(NameTest::new(local))
    }

    #[test]
    fn test_parse_simple_path() {
        assert_eq!(
            parse("foo/bar"),
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: false,
                steps: vec![Step::new(Axis::Child, name("foo")), Step::new(Axis::Child, name("bar"))],
            })
        );
    }

    #[test]
    fn test_prefixed_names_are_resolved() {
        let namespaces = NamespaceMap::new().with("cei", CEI);
        let expr = parse_expression("//cei:tenor", &namespaces).unwrap();
        let Expression::LocationPath(path) = expr else {
            panic!("expected a location path");
        };
        assert!(path.is_absolute);
        assert_eq!(path.steps[0], Step::descendant_or_self());
        match &path.steps[1].node_test {
            NodeTest::Name(test) => {
                assert_eq!(test.local, "tenor");
                assert_eq!(test.namespace.as_deref(), Some(CEI));
            }
            other => panic!("unexpected node test {:?}", other),
        }
    }

    #[test]
    fn test_unbound_prefix_is_an_error() {
        let err = parse_expression("tei:div", &NamespaceMap::new()).unwrap_err();
        assert_eq!(err, XPathError::UnboundPrefix("tei".to_string()));
    }

    #[test]
    fn test_parse_unary_minus() {
        assert_eq!(
            parse("-5"),
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(Expression::Number(5.0))
            }
        );
        assert!(matches!(
            parse("10 - -5"),
            Expression::BinaryOp {
                op: BinaryOperator::Minus,
                ..
            }
        ));
    }

    #[test]
    fn test_decimal_literals_keep_their_fraction() {
        assert_eq!(parse("0.5"), Expression::Number(0.5));
        assert_eq!(parse("10.25"), Expression::Number(10.25));
        assert_eq!(parse(".75"), Expression::Number(0.75));
        assert_eq!(parse("3."), Expression::Number(3.0));
        assert_eq!(
            parse("-0.5"),
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(Expression::Number(0.5))
            }
        );
        match parse("a=0.5") {
            Expression::BinaryOp { left, op, right } => {
                assert!(left.is_location_path());
                assert_eq!(op, BinaryOperator::Equals);
                assert_eq!(*right, Expression::Number(0.5));
            }
            other => panic!("unexpected {:?}", other),
        }
        let Expression::LocationPath(lp) = parse("x[. > 1.5]") else {
            panic!("expected a location path");
        };
        match &lp.steps[0].predicates[..] {
            [Expression::BinaryOp { op: BinaryOperator::GreaterThan, right, .. }] => {
                assert_eq!(**right, Expression::Number(1.5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse(".").is_location_path());
        assert!(parse("..").is_location_path());
    }

    #[test]
    fn test_operator_keywords_do_not_swallow_names() {
        // div div div: the element `div` divided by the element `div`.
        match parse("div div div") {
            Expression::BinaryOp { left, op, right } => {
                assert_eq!(op, BinaryOperator::Divide);
                assert!(left.is_location_path());
                assert!(right.is_location_path());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("order").is_location_path());
        assert!(parse("android").is_location_path());
    }

    #[test]
    fn test_precedence() {
        match parse("1 + 2 * 3 = 7 and true()") {
            Expression::BinaryOp { op, left, .. } => {
                assert_eq!(op, BinaryOperator::And);
                assert!(matches!(
                    *left,
                    Expression::BinaryOp {
                        op: BinaryOperator::Equals,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_axes_and_abbreviations() {
        let Expression::LocationPath(lp) = parse("following-sibling::foo/../@*") else {
            panic!("expected a location path");
        };
        assert_eq!(lp.steps[0].axis, Axis::FollowingSibling);
        assert_eq!(lp.steps[1].axis, Axis::Parent);
        assert_eq!(lp.steps[2], Step::new(Axis::Attribute, NodeTest::Wildcard));
    }

    #[test]
    fn test_parse_path_starting_with_variable() {
        let Expression::LocationPath(lp) = parse("$rows/item") else {
            panic!("expected a location path");
        };
        assert_eq!(
            lp.start_point,
            Some(Box::new(Expression::Variable("rows".to_string())))
        );
        assert_eq!(lp.steps, vec![Step::new(Axis::Child, name("item"))]);
    }

    #[test]
    fn test_parse_filter_expression() {
        match parse("(//p)[1]") {
            Expression::Filter { primary, predicates } => {
                assert!(primary.is_location_path());
                assert_eq!(predicates, vec![Expression::Number(1.0)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_predicates_and_functions() {
        let Expression::LocationPath(lp) = parse("p[@type = 'tenor'][last()]") else {
            panic!("expected a location path");
        };
        assert_eq!(lp.steps[0].predicates.len(), 2);
        assert_eq!(
            lp.steps[0].predicates[1],
            Expression::FunctionCall {
                name: "last".to_string(),
                args: vec![]
            }
        );
    }

    #[test]
    fn test_node_type_names_are_still_element_names() {
        let Expression::LocationPath(lp) = parse("text/text()") else {
            panic!("expected a location path");
        };
        assert_eq!(lp.steps[0].node_test, name("text"));
        assert_eq!(lp.steps[1].node_test, NodeTest::NodeType(NodeTypeTest::Text));
    }

    #[test]
    fn test_root_only_path() {
        assert_eq!(
            parse("/"),
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: true,
                steps: vec![],
            })
        );
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        assert!(parse_expression("foo]", &NamespaceMap::new()).is_err());
        assert!(parse_expression("concat('a',", &NamespaceMap::new()).is_err());
    }
}
