//! Checks that text selected in each source document survives in its
//! transformed counterpart.
//!
//! Pairs are found by mirroring: `input_root/a/b.xml` is compared with
//! `output_root/a/b.xml`. Every pair is checked against every rule of the
//! table; problems are collected as findings rather than raised, so one run
//! reports on the whole corpus.

pub mod rules;

pub use rules::{ComparisonRule, CompiledRule, MatchMode, jaccard, normalize_space};

use crate::corpus::{CorpusWalker, portable_path};
use crate::error::PipelineError;
use cei2tei_xpath1::{NamespaceMap, parse_document};
use log::{error, info};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub suffix: String,
    pub namespaces: NamespaceMap,
    pub rules: Vec<ComparisonRule>,
    /// Where the JSON report goes, if anywhere.
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    MissingTarget,
    Unreadable {
        side: Side,
        message: String,
    },
    /// A selector could not be evaluated on this document.
    RuleError {
        rule: usize,
        message: String,
    },
    CountMismatch {
        rule: usize,
        source: usize,
        target: usize,
    },
    /// A source text with no acceptable counterpart; `best_score` is the
    /// closest similarity seen.
    Unmatched {
        rule: usize,
        text: String,
        best_score: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub file: String,
    pub matched: usize,
    pub findings: Vec<Finding>,
}

impl PairReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub rules: Vec<ComparisonRule>,
    pub pairs_compared: usize,
    pub pairs_with_findings: usize,
    pub matched: usize,
    /// One entry per source document, ordered by path.
    pub pairs: Vec<PairReport>,
}

/// Compares one source document with its transformed counterpart.
pub fn compare_pair(rules: &[CompiledRule], file: &str, source: &Path, target: &Path) -> PairReport {
    let mut report = PairReport {
        file: file.to_string(),
        matched: 0,
        findings: Vec::new(),
    };
    if !target.is_file() {
        report.findings.push(Finding::MissingTarget);
        return report;
    }

    let read = |path: &Path, side: Side| {
        fs::read_to_string(path).map_err(|e| Finding::Unreadable {
            side,
            message: e.to_string(),
        })
    };
    let texts = read(source, Side::Source).and_then(|s| read(target, Side::Target).map(|t| (s, t)));
    let (source_text, target_text) = match texts {
        Ok(texts) => texts,
        Err(finding) => {
            report.findings.push(finding);
            return report;
        }
    };
    let source_doc = match parse_document(source_text.trim_start_matches('\u{feff}')) {
        Ok(doc) => doc,
        Err(e) => {
            report.findings.push(Finding::Unreadable { side: Side::Source, message: e.to_string() });
            return report;
        }
    };
    let target_doc = match parse_document(target_text.trim_start_matches('\u{feff}')) {
        Ok(doc) => doc,
        Err(e) => {
            report.findings.push(Finding::Unreadable { side: Side::Target, message: e.to_string() });
            return report;
        }
    };

    for (index, rule) in rules.iter().enumerate() {
        let selected = rule
            .source_texts(&source_doc)
            .and_then(|s| rule.target_texts(&target_doc).map(|t| (s, t)));
        let (sources, targets) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                report.findings.push(Finding::RuleError { rule: index, message: e.to_string() });
                continue;
            }
        };

        if sources.len() != targets.len() {
            report.findings.push(Finding::CountMismatch {
                rule: index,
                source: sources.len(),
                target: targets.len(),
            });
        }
        for text in sources {
            let (best_score, matched) = rule.best_match(&text, &targets);
            if matched {
                info!(
                    "Content matched for '{}' and '{}' in {}",
                    rule.rule.source, rule.rule.target, file
                );
                report.matched += 1;
            } else {
                report.findings.push(Finding::Unmatched { rule: index, text, best_score });
            }
        }
    }
    report
}

/// Compares every document of the input tree with its mirror in the output
/// tree and writes the JSON report when one is configured.
pub fn compare_trees(config: &ComparisonConfig) -> Result<ComparisonReport, PipelineError> {
    let rules = config
        .rules
        .iter()
        .map(|rule| CompiledRule::compile(rule, &config.namespaces))
        .collect::<Result<Vec<_>, _>>()?;
    let listing = CorpusWalker::new(&config.input_root, &config.suffix).walk()?;
    info!("Comparing {} documents against {} rules.", listing.files.len(), rules.len());

    let pairs: Vec<PairReport> = listing
        .files
        .par_iter()
        .map(|relative| {
            compare_pair(
                &rules,
                &portable_path(relative),
                &config.input_root.join(relative),
                &config.output_root.join(relative),
            )
        })
        .collect();

    for pair in pairs.iter().filter(|p| !p.is_clean()) {
        for finding in &pair.findings {
            error!("{}: {}", pair.file, describe(finding, &config.rules));
        }
    }

    let report = ComparisonReport {
        rules: config.rules.clone(),
        pairs_compared: pairs.len(),
        pairs_with_findings: pairs.iter().filter(|p| !p.is_clean()).count(),
        matched: pairs.iter().map(|p| p.matched).sum(),
        pairs,
    };
    if let Some(path) = &config.report {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Wrote comparison report '{}'.", path.display());
    }
    info!(
        "{} pairs compared, {} with findings, {} texts matched.",
        report.pairs_compared, report.pairs_with_findings, report.matched
    );
    Ok(report)
}

fn describe(finding: &Finding, rules: &[ComparisonRule]) -> String {
    let rule_name = |index: usize| {
        rules
            .get(index)
            .map(|r| format!("{} -> {}", r.source, r.target))
            .unwrap_or_default()
    };
    match finding {
        Finding::MissingTarget => "no transformed counterpart".to_string(),
        Finding::Unreadable { side, message } => format!("{:?} document unreadable: {}", side, message),
        Finding::RuleError { rule, message } => format!("rule {} failed: {}", rule_name(*rule), message),
        Finding::CountMismatch { rule, source, target } => {
            format!("rule {}: {} source elements, {} target elements", rule_name(*rule), source, target)
        }
        Finding::Unmatched { rule, text, best_score } => format!(
            "rule {}: no match for '{}' (best score {:.2})",
            rule_name(*rule),
            text,
            best_score
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CEI_NAMESPACE, Settings, TEI_NAMESPACE};
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn source(tenor: &str) -> String {
        format!(r#"<cei:text xmlns:cei="{CEI_NAMESPACE}"><cei:tenor>{tenor}</cei:tenor></cei:text>"#)
    }

    fn target(tenor: &str) -> String {
        format!(r#"<TEI xmlns="{TEI_NAMESPACE}"><div type="tenor">{tenor}</div></TEI>"#)
    }

    #[test]
    fn test_compare_trees_reports_each_kind_of_finding() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let report_path = output.path().join("reports/compare.json");

        write(&input.path().join("a/1.xml"), &source("Nos  Rudolfus"));
        write(&output.path().join("a/1.xml"), &target("Nos Rudolfus"));
        write(&input.path().join("a/2.xml"), &source("Nos Rudolfus"));
        write(&output.path().join("a/2.xml"), &target("Nos Albertus"));
        write(&input.path().join("b/3.xml"), &source("Nos"));
        write(&input.path().join("b/4.xml"), &source("Nos"));
        write(&output.path().join("b/4.xml"), "<TEI>");

        let mut config = Settings::default();
        config.input_directory = Some(input.path().to_path_buf());
        config.output_directory = Some(output.path().to_path_buf());
        config.comparison.report = Some(report_path.clone());
        let report = compare_trees(&config.comparison_config().unwrap()).unwrap();

        assert_eq!(report.pairs_compared, 4);
        assert_eq!(report.pairs_with_findings, 3);
        assert_eq!(report.matched, 1);
        assert!(report.pairs[0].is_clean());
        assert!(matches!(
            &report.pairs[1].findings[..],
            [Finding::Unmatched { rule: 0, best_score, .. }] if (*best_score - 1.0 / 3.0).abs() < 1e-9
        ));
        assert_eq!(report.pairs[2].findings, vec![Finding::MissingTarget]);
        assert!(matches!(
            &report.pairs[3].findings[..],
            [Finding::Unreadable { side: Side::Target, .. }]
        ));

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(written["pairs"][2]["findings"][0]["kind"], "missing_target");
        assert_eq!(written["rules"][0]["mode"], "exact");
    }

    #[test]
    fn test_count_mismatch() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("s.xml");
        let dst = dir.path().join("t.xml");
        write(
            &src,
            &format!(r#"<cei:text xmlns:cei="{CEI_NAMESPACE}"><cei:tenor>a</cei:tenor><cei:tenor>b</cei:tenor></cei:text>"#),
        );
        write(&dst, &target("a"));
        let namespaces = Settings::default().namespace_map();
        let rules = vec![CompiledRule::compile(&Settings::default().comparison.rules[0], &namespaces).unwrap()];

        let pair = compare_pair(&rules, "s.xml", &src, &dst);
        assert_eq!(pair.matched, 1);
        assert_eq!(pair.findings[0], Finding::CountMismatch { rule: 0, source: 2, target: 1 });
        assert!(matches!(pair.findings[1], Finding::Unmatched { .. }));
    }
}
