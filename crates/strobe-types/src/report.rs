use facet::Facet;
use std::error::Error;
use std::fmt;

/// Category labels that may appear in a report besides resolved function names.
pub mod labels {
    pub const HOST: &str = "<host>";
    pub const EVAL: &str = "<eval>";
    pub const GLOBAL: &str = "<global>";
    pub const MODULE: &str = "<module>";
    pub const ANONYMOUS_FUNCTION: &str = "<anonymous-function>";
    pub const UNKNOWN: &str = "<unknown>";
}

/// Frame labels of one trace, deepest frame first.
#[derive(Facet, Clone, Debug, Default, PartialEq, Eq)]
#[facet(transparent)]
pub struct TraceLabels(pub Vec<String>);

/// All traces in capture order. Serialises as an array of arrays of strings.
#[derive(Facet, Clone, Debug, Default, PartialEq, Eq)]
#[facet(transparent)]
pub struct Report(pub Vec<TraceLabels>);

#[derive(Debug)]
pub enum ReportError {
    Json(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "report json: {err}"),
        }
    }
}

impl Error for ReportError {}

impl Report {
    pub fn traces(&self) -> &[TraceLabels] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        facet_json::to_string(self).map_err(|e| ReportError::Json(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ReportError> {
        facet_json::from_str(json).map_err(|e| ReportError::Json(e.to_string()))
    }
}

impl TraceLabels {
    pub fn labels(&self) -> &[String] {
        &self.0
    }
}
