use cei2tei_xpath1::XPathError;
use thiserror::Error;

/// A position in the stylesheet source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub col: u32,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

impl From<roxmltree::TextPos> for Location {
    fn from(pos: roxmltree::TextPos) -> Self {
        Location {
            line: pos.row,
            col: pos.col,
        }
    }
}

/// Errors raised while loading, compiling or serializing.
#[derive(Error, Debug)]
pub enum XsltError {
    #[error("XML parsing error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("XPath error in '{expression}' at {location}: {source}")]
    XPath {
        expression: String,
        location: Location,
        source: XPathError,
    },

    #[error("Stylesheet compilation error at {location}: {message}")]
    Compilation { message: String, location: Location },

    #[error("Unsupported feature at {location}: {feature}")]
    Unsupported { feature: String, location: Location },

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while applying a compiled stylesheet to a document.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("XPath evaluation error: {0}")]
    XPath(#[from] XPathError),

    #[error("Template execution error: {0}")]
    Execution(String),

    #[error("Transformation terminated by xsl:message: {0}")]
    Terminated(String),
}
