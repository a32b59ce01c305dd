//! Settings loaded from `settings.json`.
//!
//! The file is read once by the binary and the resulting [`Settings`] value is
//! handed to each tool as an explicit parameter. Every command reads only the
//! keys it needs, so a file written for `transform` can be reused for
//! `compare` without changes. Unknown keys are ignored.

use crate::compare::{ComparisonConfig, ComparisonRule, MatchMode};
use crate::discovery::DiscoveryConfig;
use crate::error::PipelineError;
use crate::pipeline::BatchConfig;
use crate::validate::ValidationConfig;
use cei2tei_xpath1::NamespaceMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CEI_NAMESPACE: &str = "http://www.monasterium.net/NS/cei";
pub const TEI_NAMESPACE: &str = "http://www.tei-c.org/ns/1.0";
pub const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub input_directory: Option<PathBuf>,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    #[serde(default)]
    pub xslt_stylesheet: Option<PathBuf>,
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Prefix bindings for every XPath written in this file.
    #[serde(default = "default_namespaces")]
    pub namespaces: BTreeMap<String, String>,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub comparison: ComparisonSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Corpus to crawl. Falls back to `input_directory`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    #[serde(default = "default_corpus_suffix")]
    pub suffix: String,
    /// Parser threads, `0` for one per CPU.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSettings {
    #[serde(default = "default_rules")]
    pub rules: Vec<ComparisonRule>,
    /// Where to write the JSON report. Nothing is written when absent.
    #[serde(default)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSettings {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub schema: Option<PathBuf>,
    #[serde(default = "default_corpus_suffix")]
    pub suffix: String,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_fragment")]
    pub fragment: String,
}

fn default_error_log() -> PathBuf {
    PathBuf::from("error_log.csv")
}

fn default_workers() -> usize {
    4
}

fn default_suffix() -> String {
    ".xml".to_string()
}

fn default_corpus_suffix() -> String {
    "cei.xml".to_string()
}

fn default_sample_size() -> usize {
    1000
}

fn default_fragment() -> String {
    "//cei:text".to_string()
}

fn default_namespaces() -> BTreeMap<String, String> {
    [
        ("cei", CEI_NAMESPACE),
        ("tei", TEI_NAMESPACE),
        ("atom", ATOM_NAMESPACE),
        ("xsi", XSI_NAMESPACE),
    ]
    .into_iter()
    .map(|(p, u)| (p.to_string(), u.to_string()))
    .collect()
}

fn default_rules() -> Vec<ComparisonRule> {
    vec![ComparisonRule {
        source: "//cei:tenor".to_string(),
        target: "//tei:div[@type='tenor']".to_string(),
        mode: MatchMode::Exact,
    }]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_directory: None,
            output_directory: None,
            xslt_stylesheet: None,
            error_log: default_error_log(),
            workers: default_workers(),
            suffix: default_suffix(),
            namespaces: default_namespaces(),
            discovery: DiscoverySettings::default(),
            comparison: ComparisonSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            directory: None,
            output_directory: None,
            suffix: default_corpus_suffix(),
            threads: 0,
        }
    }
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            report: None,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            directory: None,
            schema: None,
            suffix: default_corpus_suffix(),
            sample_size: default_sample_size(),
            seed: None,
            fragment: default_fragment(),
        }
    }
}

impl Settings {
    /// Reads and parses a settings file. Any failure is a configuration error.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read settings '{}': {}", path.display(), e))
        })?;
        Self::from_json(&text)
            .map_err(|e| PipelineError::config(format!("invalid settings '{}': {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn namespace_map(&self) -> NamespaceMap {
        self.namespaces.iter().collect()
    }

    pub fn batch_config(&self) -> Result<BatchConfig, PipelineError> {
        Ok(BatchConfig {
            input_root: required(&self.input_directory, "input_directory")?,
            output_root: required(&self.output_directory, "output_directory")?,
            stylesheet: required(&self.xslt_stylesheet, "xslt_stylesheet")?,
            report_path: self.error_log.clone(),
            worker_count: self.workers,
            suffix: self.suffix.clone(),
        })
    }

    pub fn discovery_config(&self) -> Result<DiscoveryConfig, PipelineError> {
        let directory = self
            .discovery
            .directory
            .clone()
            .or_else(|| self.input_directory.clone());
        Ok(DiscoveryConfig {
            directory: required(&directory, "discovery.directory")?,
            output_directory: required(&self.discovery.output_directory, "discovery.output_directory")?,
            suffix: self.discovery.suffix.clone(),
            threads: self.discovery.threads,
        })
    }

    pub fn comparison_config(&self) -> Result<ComparisonConfig, PipelineError> {
        Ok(ComparisonConfig {
            input_root: required(&self.input_directory, "input_directory")?,
            output_root: required(&self.output_directory, "output_directory")?,
            suffix: self.suffix.clone(),
            namespaces: self.namespace_map(),
            rules: self.comparison.rules.clone(),
            report: self.comparison.report.clone(),
        })
    }

    pub fn validation_config(&self) -> Result<ValidationConfig, PipelineError> {
        let directory = self
            .validation
            .directory
            .clone()
            .or_else(|| self.input_directory.clone());
        Ok(ValidationConfig {
            directory: required(&directory, "validation.directory")?,
            schema: required(&self.validation.schema, "validation.schema")?,
            suffix: self.validation.suffix.clone(),
            sample_size: self.validation.sample_size,
            seed: self.validation.seed,
            fragment: self.validation.fragment.clone(),
            namespaces: self.namespace_map(),
        })
    }
}

fn required(value: &Option<PathBuf>, key: &str) -> Result<PathBuf, PipelineError> {
    value
        .clone()
        .ok_or_else(|| PipelineError::config(format!("missing required setting '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let settings = Settings::from_json(
            r#"{"input_directory": "in", "output_directory": "out", "xslt_stylesheet": "t.xsl", "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.suffix, ".xml");
        assert_eq!(settings.error_log, PathBuf::from("error_log.csv"));
        assert_eq!(settings.namespaces["cei"], CEI_NAMESPACE);
        assert_eq!(settings.validation.sample_size, 1000);
        assert_eq!(settings.comparison.rules.len(), 1);

        let batch = settings.batch_config().unwrap();
        assert_eq!(batch.input_root, PathBuf::from("in"));
        assert_eq!(batch.worker_count, 4);
    }

    #[test]
    fn test_missing_required_key_is_a_config_error() {
        let settings = Settings::from_json(r#"{"input_directory": "in"}"#).unwrap();
        match settings.batch_config() {
            Err(PipelineError::Config(message)) => assert!(message.contains("output_directory")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_section_falls_back_to_input_directory() {
        let settings = Settings::from_json(
            r#"{"input_directory": "in", "discovery": {"output_directory": "shapes"}}"#,
        )
        .unwrap();
        let discovery = settings.discovery_config().unwrap();
        assert_eq!(discovery.directory, PathBuf::from("in"));
        assert_eq!(discovery.suffix, "cei.xml");
    }

    #[test]
    fn test_comparison_rules_parse() {
        let settings = Settings::from_json(
            r#"{"comparison": {"rules": [
                {"source": "//cei:abstract", "target": "//tei:summary", "mode": "similarity", "threshold": 0.8},
                {"source": "//cei:tenor", "target": "//tei:div", "mode": "exact"}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(settings.comparison.rules[0].mode, MatchMode::Similarity { threshold: 0.8 });
        assert_eq!(settings.comparison.rules[1].mode, MatchMode::Exact);
    }

    #[test]
    fn test_unreadable_settings_file() {
        let err = Settings::load(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
