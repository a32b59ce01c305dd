//! The rule table and the text matching it drives.

use crate::error::PipelineError;
use cei2tei_xpath1::{
    DataSourceNode, EvaluationContext, Expression, KeyIndex, NamespaceMap, XPathError, XPathValue, XmlNode,
    evaluate, parse_expression,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How a source text is paired with a target text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum MatchMode {
    /// Equal after whitespace normalization.
    Exact,
    /// Jaccard similarity of the word sets at or above `threshold`.
    Similarity { threshold: f64 },
}

/// One row of the table: elements selected by `source` in the input must
/// reappear among the elements selected by `target` in the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRule {
    pub source: String,
    pub target: String,
    #[serde(flatten)]
    pub mode: MatchMode,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ComparisonRule,
    source: Expression,
    target: Expression,
}

impl CompiledRule {
    pub fn compile(rule: &ComparisonRule, namespaces: &NamespaceMap) -> Result<Self, PipelineError> {
        if let MatchMode::Similarity { threshold } = rule.mode
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(PipelineError::config(format!(
                "similarity threshold {} of rule '{}' is outside [0, 1]",
                threshold, rule.source
            )));
        }
        let parse = |selector: &str| {
            parse_expression(selector, namespaces)
                .map_err(|e| PipelineError::config(format!("comparison selector '{}': {}", selector, e)))
        };
        Ok(Self {
            rule: rule.clone(),
            source: parse(&rule.source)?,
            target: parse(&rule.target)?,
        })
    }

    pub fn source_texts(&self, doc: &roxmltree::Document) -> Result<Vec<String>, XPathError> {
        select_texts(&self.source, doc)
    }

    pub fn target_texts(&self, doc: &roxmltree::Document) -> Result<Vec<String>, XPathError> {
        select_texts(&self.target, doc)
    }

    /// Scores `text` against every candidate and returns the best score and
    /// whether it is good enough for this rule.
    pub fn best_match(&self, text: &str, candidates: &[String]) -> (f64, bool) {
        let best = candidates
            .iter()
            .map(|candidate| match self.rule.mode {
                MatchMode::Exact if candidate == text => 1.0,
                _ => jaccard(text, candidate),
            })
            .fold(0.0_f64, f64::max);
        let matched = match self.rule.mode {
            MatchMode::Exact => candidates.iter().any(|c| c == text),
            MatchMode::Similarity { threshold } => !candidates.is_empty() && best >= threshold,
        };
        (best, matched)
    }
}

/// Normalized, non-blank string values of the selected nodes in document order.
fn select_texts(expr: &Expression, doc: &roxmltree::Document) -> Result<Vec<String>, XPathError> {
    let root = XmlNode::root(doc);
    let variables: HashMap<String, XPathValue<XmlNode>> = HashMap::new();
    let keys: KeyIndex<XmlNode> = KeyIndex::new();
    let context = EvaluationContext::new(root, root, &variables, &keys);
    let nodes = evaluate(expr, &context)?.into_node_set("comparison selector")?;
    Ok(nodes
        .iter()
        .map(|node| normalize_space(&node.string_value()))
        .filter(|text| !text.is_empty())
        .collect())
}

pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Jaccard similarity of the whitespace-separated word sets. Two empty texts
/// are identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: BTreeSet<&str> = a.split_whitespace().collect();
    let b: BTreeSet<&str> = b.split_whitespace().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CEI_NAMESPACE, TEI_NAMESPACE};
    use cei2tei_xpath1::parse_document;

    fn namespaces() -> NamespaceMap {
        NamespaceMap::new().with("cei", CEI_NAMESPACE).with("tei", TEI_NAMESPACE)
    }

    fn rule(mode: MatchMode) -> CompiledRule {
        CompiledRule::compile(
            &ComparisonRule {
                source: "//cei:tenor".to_string(),
                target: "//tei:div[@type='tenor']".to_string(),
                mode,
            },
            &namespaces(),
        )
        .unwrap()
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "b c"), 1.0 / 3.0);
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("a", ""), 0.0);
    }

    #[test]
    fn test_select_texts_normalizes_and_skips_blank() {
        let source = format!(
            r#"<cei:text xmlns:cei="{CEI_NAMESPACE}"><cei:tenor>  Nos
                 Rudolfus </cei:tenor><cei:tenor>   </cei:tenor></cei:text>"#
        );
        let doc = parse_document(&source).unwrap();
        assert_eq!(rule(MatchMode::Exact).source_texts(&doc).unwrap(), vec!["Nos Rudolfus"]);
    }

    #[test]
    fn test_best_match_modes() {
        let candidates = vec!["in nomine domini amen".to_string()];
        assert_eq!(rule(MatchMode::Exact).best_match("in nomine domini amen", &candidates), (1.0, true));
        let (score, matched) = rule(MatchMode::Exact).best_match("in nomine domini", &candidates);
        assert!(!matched);
        assert_eq!(score, 0.75);

        let similar = rule(MatchMode::Similarity { threshold: 0.7 });
        assert!(similar.best_match("in nomine domini", &candidates).1);
        assert!(!similar.best_match("in nomine domini", &[]).1);
    }

    #[test]
    fn test_bad_rules_are_config_errors() {
        let bad_prefix = ComparisonRule {
            source: "//x:tenor".to_string(),
            target: "//tei:div".to_string(),
            mode: MatchMode::Exact,
        };
        assert!(matches!(
            CompiledRule::compile(&bad_prefix, &namespaces()),
            Err(PipelineError::Config(_))
        ));

        let bad_threshold = ComparisonRule {
            mode: MatchMode::Similarity { threshold: 1.5 },
            ..bad_prefix
        };
        assert!(matches!(
            CompiledRule::compile(&bad_threshold, &namespaces()),
            Err(PipelineError::Config(_))
        ));
    }
}
