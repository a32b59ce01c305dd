//! Attribute value templates: `type="{@kind}-{position()}"`.

use cei2tei_xpath1::{Expression, NamespaceMap, XPathError, parse_expression};

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValueTemplate {
    pub parts: Vec<AvtPart>,
}

#[derive(Debug)]
pub enum AvtError {
    /// A `{` without a matching `}` or a lone `}`.
    Unbalanced(String),
    XPath(String, XPathError),
}

impl AttributeValueTemplate {
    /// A template with no expressions.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![AvtPart::Literal(text.into())],
        }
    }

    /// The fixed value, if the template contains no expressions.
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                AvtPart::Literal(s) => out.push_str(s),
                AvtPart::Expr(_) => return None,
            }
        }
        Some(out)
    }

    pub fn parse(text: &str, namespaces: &NamespaceMap) -> Result<Self, AvtError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|(_, n)| *n == '{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().is_some_and(|(_, n)| *n == '}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let rest = &text[i + 1..];
                    let end = find_closing_brace(rest)
                        .ok_or_else(|| AvtError::Unbalanced(text.to_string()))?;
                    let source = &rest[..end];
                    let expr = parse_expression(source, namespaces)
                        .map_err(|e| AvtError::XPath(source.to_string(), e))?;
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expr(expr));
                    // Skip the expression and its closing brace.
                    let resume = i + 1 + end;
                    while chars.peek().is_some_and(|(j, _)| *j <= resume) {
                        chars.next();
                    }
                }
                '}' => return Err(AvtError::Unbalanced(text.to_string())),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Self { parts })
    }
}

/// Finds the `}` that ends an embedded expression, skipping string literals.
fn find_closing_brace(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_literal() {
        let avt = AttributeValueTemplate::parse("tenor", &NamespaceMap::new()).unwrap();
        assert_eq!(avt.as_literal().as_deref(), Some("tenor"));
        let empty = AttributeValueTemplate::parse("", &NamespaceMap::new()).unwrap();
        assert_eq!(empty.as_literal().as_deref(), Some(""));
    }

    #[test]
    fn test_expressions_and_escapes() {
        let avt = AttributeValueTemplate::parse("{{x}}-{@n}-{'}'}", &NamespaceMap::new()).unwrap();
        assert_eq!(avt.parts.len(), 4);
        assert_eq!(avt.parts[0], AvtPart::Literal("{x}-".to_string()));
        assert!(matches!(avt.parts[1], AvtPart::Expr(_)));
        assert_eq!(avt.parts[2], AvtPart::Literal("-".to_string()));
        assert_eq!(avt.parts[3], AvtPart::Expr(Expression::Literal("}".to_string())));
        assert!(avt.as_literal().is_none());
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(matches!(
            AttributeValueTemplate::parse("{@n", &NamespaceMap::new()),
            Err(AvtError::Unbalanced(_))
        ));
        assert!(matches!(
            AttributeValueTemplate::parse("a}b", &NamespaceMap::new()),
            Err(AvtError::Unbalanced(_))
        ));
    }
}
