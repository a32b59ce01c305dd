//! Inventory of the element and attribute paths used across a corpus.
//!
//! Each element contributes its absolute path, written the way the document
//! spells its names (`/cei:charter/cei:chDesc/cei:abstract`), with a 1-based
//! `[n]` after every step that has same-named siblings. Each attribute adds
//! `<element path>/@name`. The truncated form drops every `[n]`.

use crate::corpus::{CorpusWalker, portable_path};
use crate::error::PipelineError;
use cei2tei_xpath1::{DataSourceNode, NodeType, XmlNode, parse_document};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FULL_PATHS_FILE: &str = "xpaths.txt";
pub const TRUNCATED_PATHS_FILE: &str = "xpaths_truncated.txt";
pub const EVIDENCE_FILE: &str = "xpaths_evidence.json";

const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub directory: PathBuf,
    pub output_directory: PathBuf,
    pub suffix: String,
    /// `0` uses one thread per CPU.
    pub threads: usize,
}

/// Where a truncated path was first seen and how many documents use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evidence {
    pub first_file: String,
    pub documents: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeInventory {
    pub files_scanned: usize,
    /// Files that could not be read or parsed.
    pub files_skipped: Vec<PathBuf>,
    pub full: BTreeSet<String>,
    pub truncated: BTreeSet<String>,
    pub evidence: BTreeMap<String, Evidence>,
}

impl ShapeInventory {
    /// Folds one document's paths in. Documents must be added in walk order
    /// for the evidence to name the first occurrence.
    pub fn add_document(&mut self, file: &str, paths: BTreeSet<String>) {
        self.files_scanned += 1;
        let truncated: BTreeSet<String> = paths.iter().map(|p| truncate(p)).collect();
        for path in truncated {
            self.evidence
                .entry(path.clone())
                .and_modify(|e| e.documents += 1)
                .or_insert_with(|| Evidence {
                    first_file: file.to_string(),
                    documents: 1,
                });
            self.truncated.insert(path);
        }
        self.full.extend(paths);
    }
}

/// Removes every `[n]` position qualifier from a path.
pub fn truncate(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with(']') {
            rest = &after[digits + 1..];
        } else {
            out.push('[');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Every element and attribute path of one document.
pub fn document_paths<'a>(root: XmlNode<'a, 'a>) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    let mut stack = vec![(root, String::new())];
    while let Some((node, path)) = stack.pop() {
        let elements: Vec<XmlNode> = node
            .children()
            .filter(|c| c.node_type() == NodeType::Element)
            .collect();

        let mut totals: HashMap<(Option<&str>, &str), usize> = HashMap::new();
        for element in &elements {
            if let Some(name) = element.name() {
                *totals.entry((name.namespace, name.local_part)).or_default() += 1;
            }
        }

        let mut seen: HashMap<(Option<&str>, &str), usize> = HashMap::new();
        for element in elements {
            let Some(name) = element.name() else { continue };
            let key = (name.namespace, name.local_part);
            let position = seen.entry(key).or_default();
            *position += 1;
            let step = if totals.get(&key).copied().unwrap_or(0) > 1 {
                format!("{}[{}]", name, position)
            } else {
                name.to_string()
            };
            let element_path = format!("{}/{}", path, step);

            for attribute in element.attributes() {
                if let Some(attr_name) = attribute.name() {
                    paths.insert(format!("{}/@{}", element_path, attr_name));
                }
            }
            paths.insert(element_path.clone());
            stack.push((element, element_path));
        }
    }
    paths
}

fn scan_file(path: &Path) -> Result<BTreeSet<String>, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let doc = parse_document(text).map_err(|e| e.to_string())?;
    Ok(document_paths(XmlNode::root(&doc)))
}

/// Scans the corpus in parallel and builds the inventory. Unparseable files
/// are logged and skipped.
pub fn scan(config: &DiscoveryConfig) -> Result<ShapeInventory, PipelineError> {
    let listing = CorpusWalker::new(&config.directory, &config.suffix).walk()?;
    let threads = if config.threads == 0 { num_cpus::get() } else { config.threads };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| PipelineError::Internal(format!("cannot start discovery threads: {}", e)))?;

    let total = listing.files.len();
    info!("Scanning {} files under '{}' on {} threads.", total, config.directory.display(), threads);
    let done = AtomicUsize::new(0);
    let scanned: Vec<Result<BTreeSet<String>, String>> = pool.install(|| {
        listing
            .files
            .par_iter()
            .map(|relative| {
                let result = scan_file(&listing.root.join(relative));
                let count = done.fetch_add(1, Ordering::Relaxed) + 1;
                if count % PROGRESS_INTERVAL == 0 {
                    info!("{}/{} files scanned.", count, total);
                }
                result
            })
            .collect()
    });

    let mut inventory = ShapeInventory::default();
    for (relative, result) in listing.files.iter().zip(scanned) {
        match result {
            Ok(paths) => inventory.add_document(&portable_path(relative), paths),
            Err(e) => {
                warn!("Skipping '{}': {}", relative.display(), e);
                inventory.files_skipped.push(relative.clone());
            }
        }
    }
    Ok(inventory)
}

/// Writes the two sorted path lists and the evidence file.
pub fn write_inventory(inventory: &ShapeInventory, output_directory: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(output_directory)?;
    fs::write(output_directory.join(FULL_PATHS_FILE), lines(&inventory.full))?;
    fs::write(output_directory.join(TRUNCATED_PATHS_FILE), lines(&inventory.truncated))?;
    let evidence = serde_json::to_string_pretty(&inventory.evidence)?;
    fs::write(output_directory.join(EVIDENCE_FILE), evidence)?;
    Ok(())
}

fn lines(paths: &BTreeSet<String>) -> String {
    paths.iter().fold(String::new(), |mut out, path| {
        out.push_str(path);
        out.push('\n');
        out
    })
}

/// Scans the corpus and writes the inventory files.
pub fn discover(config: &DiscoveryConfig) -> Result<ShapeInventory, PipelineError> {
    let inventory = scan(config)?;
    write_inventory(&inventory, &config.output_directory)?;
    info!(
        "Found {} paths ({} truncated) in {} files, {} skipped.",
        inventory.full.len(),
        inventory.truncated.len(),
        inventory.files_scanned,
        inventory.files_skipped.len()
    );
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CEI: &str = "http://www.monasterium.net/NS/cei";

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("/a/b[2]/c[10]/@id"), "/a/b/c/@id");
        assert_eq!(truncate("/a[x]/b[]"), "/a[x]/b[]");
        assert_eq!(truncate("/plain"), "/plain");
    }

    #[test]
    fn test_document_paths_qualify_repeated_siblings() {
        let xml = format!(
            r#"<cei:text xmlns:cei="{CEI}" type="charter"><cei:p n="1"/><cei:p/><cei:note/><plain/></cei:text>"#
        );
        let doc = parse_document(&xml).unwrap();
        let paths: Vec<String> = document_paths(XmlNode::root(&doc)).into_iter().collect();
        assert_eq!(
            paths,
            vec![
                "/cei:text",
                "/cei:text/@type",
                "/cei:text/cei:note",
                "/cei:text/cei:p[1]",
                "/cei:text/cei:p[1]/@n",
                "/cei:text/cei:p[2]",
                "/cei:text/plain",
            ]
        );
    }

    #[test]
    fn test_discover_writes_inventory_and_evidence() {
        let corpus = tempdir().unwrap();
        let out = tempdir().unwrap();
        fs::create_dir_all(corpus.path().join("A")).unwrap();
        fs::write(
            corpus.path().join("A/1.cei.xml"),
            format!(r#"<cei:text xmlns:cei="{CEI}"><cei:p/><cei:p/></cei:text>"#),
        )
        .unwrap();
        fs::write(
            corpus.path().join("A/2.cei.xml"),
            format!(r#"<cei:text xmlns:cei="{CEI}"><cei:p id="x"/></cei:text>"#),
        )
        .unwrap();
        fs::write(corpus.path().join("A/3.cei.xml"), "<broken>").unwrap();

        let config = DiscoveryConfig {
            directory: corpus.path().to_path_buf(),
            output_directory: out.path().join("shapes"),
            suffix: "cei.xml".to_string(),
            threads: 2,
        };
        let inventory = discover(&config).unwrap();

        assert_eq!(inventory.files_scanned, 2);
        assert_eq!(inventory.files_skipped, vec![PathBuf::from("A/3.cei.xml")]);
        assert!(inventory.full.contains("/cei:text/cei:p[2]"));
        assert!(!inventory.truncated.iter().any(|p| p.contains('[')));
        assert_eq!(
            inventory.evidence["/cei:text/cei:p"],
            Evidence { first_file: "A/1.cei.xml".to_string(), documents: 2 }
        );
        assert_eq!(inventory.evidence["/cei:text/cei:p/@id"].first_file, "A/2.cei.xml");

        let truncated = fs::read_to_string(out.path().join("shapes").join(TRUNCATED_PATHS_FILE)).unwrap();
        assert_eq!(truncated, "/cei:text\n/cei:text/cei:p\n/cei:text/cei:p/@id\n");
        let evidence: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.path().join("shapes").join(EVIDENCE_FILE)).unwrap())
                .unwrap();
        assert_eq!(evidence["/cei:text"]["documents"], 2);
    }
}
