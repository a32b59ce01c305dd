#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const CEI: &str = "http://www.monasterium.net/NS/cei";
pub const TEI: &str = "http://www.tei-c.org/ns/1.0";

/// Copies every node and attribute unchanged.
pub const IDENTITY: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>
</xsl:stylesheet>"#;

/// Turns every `cei:tenor` into a TEI tenor division and refuses documents
/// without one.
pub const TENOR_TO_TEI: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
    xmlns:cei="http://www.monasterium.net/NS/cei" xmlns:tei="http://www.tei-c.org/ns/1.0" exclude-result-prefixes="cei">
  <xsl:template match="/">
    <xsl:if test="not(//cei:tenor)"><xsl:message terminate="yes">no tenor</xsl:message></xsl:if>
    <tei:TEI><tei:text><tei:body><xsl:apply-templates select="//cei:tenor"/></tei:body></tei:text></tei:TEI>
  </xsl:template>
  <xsl:template match="cei:tenor"><tei:div type="tenor"><xsl:value-of select="normalize-space(.)"/></tei:div></xsl:template>
</xsl:stylesheet>"#;

pub fn charter(tenor: &str) -> String {
    format!(
        r#"<cei:text xmlns:cei="{CEI}" type="charter"><cei:idno>1</cei:idno><cei:body><cei:tenor>{tenor}</cei:tenor></cei:body></cei:text>"#
    )
}

/// A scratch area with `in/`, `out/` and room for stylesheets and reports.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("in")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn report(&self) -> PathBuf {
        self.dir.path().join("error_log.csv")
    }

    /// Writes `content` to `in/<relative>`, creating parent directories.
    pub fn add(&self, relative: &str, content: &str) -> &Self {
        let path = self.input().join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create input dir");
        fs::write(path, content).expect("write input");
        self
    }

    pub fn add_dir(&self, relative: &str) -> &Self {
        fs::create_dir_all(self.input().join(relative)).expect("create input dir");
        self
    }

    pub fn stylesheet(&self, name: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, source).expect("write stylesheet");
        path
    }

    pub fn read_output(&self, relative: &str) -> String {
        fs::read_to_string(self.output().join(relative)).expect("read output")
    }
}

/// Relative paths of every regular file under `root`, sorted.
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
