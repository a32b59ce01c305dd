//! Schema validation of a random sample of the corpus.
//!
//! From each sampled file the first node selected by the configured XPath is
//! cut out as a standalone document, with the namespace declarations it
//! needs, and handed to a [`FragmentValidator`].

pub mod xsd;

pub use xsd::{SchemaError, XsdSchema};

use crate::corpus::{CorpusWalker, portable_path};
use crate::error::PipelineError;
use cei2tei_xpath1::{
    DataSourceNode, EvaluationContext, Expression, KeyIndex, NamespaceMap, NodeType, XPathValue, XmlNode,
    evaluate, parse_document, parse_expression,
};
use cei2tei_xslt::{OutputSettings, copy_to_document, serialize_to_string};
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    pub directory: PathBuf,
    pub schema: PathBuf,
    pub suffix: String,
    pub sample_size: usize,
    /// Fixes the sample for reproducible runs.
    pub seed: Option<u64>,
    /// XPath selecting the fragment to validate.
    pub fragment: String,
    pub namespaces: NamespaceMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationOutcome {
    Valid,
    Invalid(Vec<String>),
}

/// Anything that can judge a standalone XML fragment.
pub trait FragmentValidator: Send + Sync {
    fn validate(&self, fragment: &str) -> ValidationOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SampleStatus {
    Valid,
    Invalid { errors: Vec<String> },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleResult {
    pub file: String,
    #[serde(flatten)]
    pub status: SampleStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    /// Files eligible for sampling.
    pub population: usize,
    pub valid: usize,
    pub invalid: usize,
    pub skipped: usize,
    /// In walk order.
    pub results: Vec<SampleResult>,
}

/// Picks `size` files without replacement, keeping their walk order. Asking
/// for more files than there are returns all of them.
pub fn draw_sample<T: Clone>(population: &[T], size: usize, seed: Option<u64>) -> Vec<T> {
    if size >= population.len() {
        return population.to_vec();
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut picked = rand::seq::index::sample(&mut rng, population.len(), size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| population[i].clone()).collect()
}

/// Serializes the first node `selector` picks out of `source` as a standalone
/// document. `Ok(None)` when nothing is selected.
pub fn extract_fragment(source: &str, selector: &Expression) -> Result<Option<String>, String> {
    let doc = parse_document(source.trim_start_matches('\u{feff}')).map_err(|e| e.to_string())?;
    let root = XmlNode::root(&doc);
    let variables: HashMap<String, XPathValue<XmlNode>> = HashMap::new();
    let keys: KeyIndex<XmlNode> = KeyIndex::new();
    let context = EvaluationContext::new(root, root, &variables, &keys);
    let nodes = evaluate(selector, &context)
        .and_then(|value| value.into_node_set("fragment selector"))
        .map_err(|e| e.to_string())?;
    let Some(node) = nodes.into_iter().find(|n| n.node_type() == NodeType::Element) else {
        return Ok(None);
    };
    let output = OutputSettings {
        indent: false,
        ..OutputSettings::default()
    };
    let fragment = copy_to_document(node, output).map_err(|e| e.to_string())?;
    serialize_to_string(&fragment).map(Some).map_err(|e| e.to_string())
}

fn check_file(path: &Path, selector: &Expression, validator: &dyn FragmentValidator) -> SampleStatus {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => return SampleStatus::Skipped { reason: e.to_string() },
    };
    match extract_fragment(&source, selector) {
        Ok(Some(fragment)) => match validator.validate(&fragment) {
            ValidationOutcome::Valid => SampleStatus::Valid,
            ValidationOutcome::Invalid(errors) => SampleStatus::Invalid { errors },
        },
        Ok(None) => SampleStatus::Skipped {
            reason: "no fragment selected".to_string(),
        },
        Err(reason) => SampleStatus::Invalid { errors: vec![reason] },
    }
}

/// Validates a sample of the corpus with the given validator.
pub fn validate_sample(
    config: &ValidationConfig,
    validator: &dyn FragmentValidator,
) -> Result<ValidationSummary, PipelineError> {
    let selector = parse_expression(&config.fragment, &config.namespaces)
        .map_err(|e| PipelineError::config(format!("fragment selector '{}': {}", config.fragment, e)))?;
    let listing = CorpusWalker::new(&config.directory, &config.suffix).walk()?;
    let sample = draw_sample(&listing.files, config.sample_size, config.seed);
    info!(
        "Validating {} of {} files from '{}'.",
        sample.len(),
        listing.files.len(),
        config.directory.display()
    );

    let results: Vec<SampleResult> = sample
        .par_iter()
        .map(|relative| SampleResult {
            file: portable_path(relative),
            status: check_file(&listing.root.join(relative), &selector, validator),
        })
        .collect();

    let mut summary = ValidationSummary {
        population: listing.files.len(),
        ..ValidationSummary::default()
    };
    for result in &results {
        match &result.status {
            SampleStatus::Valid => summary.valid += 1,
            SampleStatus::Invalid { errors } => {
                summary.invalid += 1;
                warn!("{} is invalid: {}", result.file, errors.join("; "));
            }
            SampleStatus::Skipped { reason } => {
                summary.skipped += 1;
                warn!("{} skipped: {}", result.file, reason);
            }
        }
    }
    summary.results = results;
    info!(
        "{} valid, {} invalid, {} skipped.",
        summary.valid, summary.invalid, summary.skipped
    );
    Ok(summary)
}

/// Loads the configured schema and validates a sample against it.
pub fn validate_corpus(config: &ValidationConfig) -> Result<ValidationSummary, PipelineError> {
    let schema = XsdSchema::load(&config.schema)
        .map_err(|e| PipelineError::config(format!("schema '{}': {}", config.schema.display(), e)))?;
    validate_sample(config, &schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CEI_NAMESPACE, Settings};
    use tempfile::tempdir;

    struct AcceptEverything;

    impl FragmentValidator for AcceptEverything {
        fn validate(&self, _fragment: &str) -> ValidationOutcome {
            ValidationOutcome::Valid
        }
    }

    fn cei_selector() -> Expression {
        parse_expression("//cei:text", &Settings::default().namespace_map()).unwrap()
    }

    #[test]
    fn test_draw_sample_is_reproducible_and_ordered() {
        let population: Vec<usize> = (0..100).collect();
        let a = draw_sample(&population, 10, Some(7));
        let b = draw_sample(&population, 10, Some(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(draw_sample(&population, 500, None), population);
    }

    #[test]
    fn test_extract_fragment_carries_namespaces() {
        let source = format!(
            r#"<cei:charter xmlns:cei="{CEI_NAMESPACE}"><cei:idno>1</cei:idno><cei:text type="charter"><cei:p>x</cei:p></cei:text></cei:charter>"#
        );
        let fragment = extract_fragment(&source, &cei_selector()).unwrap().unwrap();
        assert!(
            fragment.contains(&format!(
                r#"<cei:text xmlns:cei="{CEI_NAMESPACE}" type="charter"><cei:p>x</cei:p></cei:text>"#
            )),
            "{}",
            fragment
        );
        assert_eq!(extract_fragment("<other/>", &cei_selector()).unwrap(), None);
        assert!(extract_fragment("<broken", &cei_selector()).is_err());
    }

    #[test]
    fn test_validate_sample_counts() {
        let corpus = tempdir().unwrap();
        let text = format!(r#"<cei:charter xmlns:cei="{CEI_NAMESPACE}"><cei:text/></cei:charter>"#);
        for i in 0..5 {
            fs::write(corpus.path().join(format!("{}.cei.xml", i)), &text).unwrap();
        }
        fs::write(corpus.path().join("5.cei.xml"), "<charter/>").unwrap();
        fs::write(corpus.path().join("6.cei.xml"), "<charter>").unwrap();

        let mut settings = Settings::default();
        settings.validation.directory = Some(corpus.path().to_path_buf());
        settings.validation.schema = Some(PathBuf::from("unused.xsd"));
        settings.validation.seed = Some(1);
        let config = settings.validation_config().unwrap();

        let summary = validate_sample(&config, &AcceptEverything).unwrap();
        assert_eq!(summary.population, 7);
        assert_eq!((summary.valid, summary.invalid, summary.skipped), (5, 1, 1));
        assert_eq!(summary.results[5].file, "5.cei.xml");
        assert!(matches!(summary.results[5].status, SampleStatus::Skipped { .. }));

        let smaller = ValidationConfig { sample_size: 3, ..config };
        assert_eq!(validate_sample(&smaller, &AcceptEverything).unwrap().results.len(), 3);
    }

    #[test]
    fn test_validate_corpus_with_schema() {
        let corpus = tempdir().unwrap();
        let schema_path = corpus.path().join("cei.xsd");
        fs::write(
            &schema_path,
            format!(
                r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="{CEI_NAMESPACE}" elementFormDefault="qualified">
                     <xs:element name="text"><xs:complexType><xs:sequence><xs:element name="p" type="xs:string" maxOccurs="unbounded"/></xs:sequence></xs:complexType></xs:element>
                   </xs:schema>"#
            ),
        )
        .unwrap();
        let data = corpus.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("good.cei.xml"),
            format!(r#"<cei:charter xmlns:cei="{CEI_NAMESPACE}"><cei:text><cei:p>a</cei:p></cei:text></cei:charter>"#),
        )
        .unwrap();
        fs::write(
            data.join("bad.cei.xml"),
            format!(r#"<cei:charter xmlns:cei="{CEI_NAMESPACE}"><cei:text><cei:q/></cei:text></cei:charter>"#),
        )
        .unwrap();

        let mut settings = Settings::default();
        settings.validation.directory = Some(data);
        settings.validation.schema = Some(schema_path);
        let summary = validate_corpus(&settings.validation_config().unwrap()).unwrap();
        assert_eq!((summary.valid, summary.invalid), (1, 1));
        assert_eq!(summary.results[0].file, "bad.cei.xml");

        settings.validation.schema = Some(corpus.path().join("missing.xsd"));
        let err = validate_corpus(&settings.validation_config().unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
