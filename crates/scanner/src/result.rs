use codescan_capture::CodeType;
use serde::Serialize;

/// A decoded code and the symbology it was read as.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ScanResult {
    /// The error-corrected payload decoded into a string.
    pub value: String,
    /// Tag of the matching symbology, e.g. `qr`.
    pub metadata_type: String,
}

impl ScanResult {
    pub fn new(value: impl Into<String>, metadata_type: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            metadata_type: metadata_type.into(),
        }
    }

    pub(crate) fn from_code(value: &str, code_type: CodeType) -> Self {
        Self::new(value, code_type.as_str())
    }
}
