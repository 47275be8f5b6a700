use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseTypeError;

/// Raw frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Gray8,
}

/// Physical side of the device a camera faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePosition {
    #[default]
    Back,
    Front,
}

impl CapturePosition {
    pub fn as_str(self) -> &'static str {
        match self {
            CapturePosition::Back => "back",
            CapturePosition::Front => "front",
        }
    }
}

impl fmt::Display for CapturePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapturePosition {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "back" | "rear" => Ok(CapturePosition::Back),
            "front" => Ok(CapturePosition::Front),
            other => Err(ParseTypeError::Position(other.to_string())),
        }
    }
}

/// Machine-readable symbologies a capture facility may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeType {
    #[serde(rename = "qr")]
    Qr,
    #[serde(rename = "data-matrix")]
    DataMatrix,
    #[serde(rename = "aztec")]
    Aztec,
    #[serde(rename = "pdf417")]
    Pdf417,
    #[serde(rename = "code128")]
    Code128,
    #[serde(rename = "code39")]
    Code39,
    #[serde(rename = "code39-mod43")]
    Code39Mod43,
    #[serde(rename = "code93")]
    Code93,
    #[serde(rename = "ean8")]
    Ean8,
    #[serde(rename = "ean13")]
    Ean13,
    #[serde(rename = "upce")]
    Upce,
    #[serde(rename = "itf14")]
    Itf14,
    #[serde(rename = "interleaved2of5")]
    Interleaved2of5,
}

impl CodeType {
    pub const ALL: [CodeType; 13] = [
        CodeType::Qr,
        CodeType::DataMatrix,
        CodeType::Aztec,
        CodeType::Pdf417,
        CodeType::Code128,
        CodeType::Code39,
        CodeType::Code39Mod43,
        CodeType::Code93,
        CodeType::Ean8,
        CodeType::Ean13,
        CodeType::Upce,
        CodeType::Itf14,
        CodeType::Interleaved2of5,
    ];

    /// Stable tag reported as a result's metadata type.
    pub fn as_str(self) -> &'static str {
        match self {
            CodeType::Qr => "qr",
            CodeType::DataMatrix => "data-matrix",
            CodeType::Aztec => "aztec",
            CodeType::Pdf417 => "pdf417",
            CodeType::Code128 => "code128",
            CodeType::Code39 => "code39",
            CodeType::Code39Mod43 => "code39-mod43",
            CodeType::Code93 => "code93",
            CodeType::Ean8 => "ean8",
            CodeType::Ean13 => "ean13",
            CodeType::Upce => "upce",
            CodeType::Itf14 => "itf14",
            CodeType::Interleaved2of5 => "interleaved2of5",
        }
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        CodeType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == wanted)
            .ok_or(ParseTypeError::Code(wanted))
    }
}

/// Identifies a physical capture device.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub id: String,
    pub label: String,
    pub position: CapturePosition,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, label: impl Into<String>, position: CapturePosition) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            position,
        }
    }
}

/// A single candidate produced by frame analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum DetectedObject {
    /// A code of a known symbology; `value` is absent when the payload could not be decoded.
    MachineReadable {
        #[serde(rename = "type")]
        code_type: CodeType,
        #[serde(default)]
        value: Option<String>,
    },
    /// Anything the analyzer found that is not a machine-readable code.
    Other { kind: String },
}

impl DetectedObject {
    pub fn code(code_type: CodeType, value: impl Into<String>) -> Self {
        DetectedObject::MachineReadable {
            code_type,
            value: Some(value.into()),
        }
    }

    pub fn undecoded(code_type: CodeType) -> Self {
        DetectedObject::MachineReadable {
            code_type,
            value: None,
        }
    }

    pub fn other(kind: impl Into<String>) -> Self {
        DetectedObject::Other { kind: kind.into() }
    }

    /// Symbology and payload when the object carries a non-empty decoded string.
    pub fn decoded(&self) -> Option<(CodeType, &str)> {
        match self {
            DetectedObject::MachineReadable {
                code_type,
                value: Some(value),
            } if !value.is_empty() => Some((*code_type, value.as_str())),
            _ => None,
        }
    }
}

/// Detections produced together from one analyzed frame, in analyzer order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub objects: Vec<DetectedObject>,
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl DetectionBatch {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self {
            objects,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_type_tags_parse_back() {
        for ty in CodeType::ALL {
            assert_eq!(ty.as_str().parse::<CodeType>().unwrap(), ty);
        }
        assert_eq!("QR".parse::<CodeType>().unwrap(), CodeType::Qr);
        assert_eq!("data_matrix".parse::<CodeType>().unwrap(), CodeType::DataMatrix);
        assert!("maxicode".parse::<CodeType>().is_err());
    }

    #[test]
    fn serde_tag_matches_display() {
        for ty in CodeType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{ty}\""));
        }
    }

    #[test]
    fn decoded_requires_non_empty_value() {
        assert_eq!(
            DetectedObject::code(CodeType::Qr, "HELLO").decoded(),
            Some((CodeType::Qr, "HELLO"))
        );
        assert_eq!(DetectedObject::code(CodeType::Qr, "").decoded(), None);
        assert_eq!(DetectedObject::undecoded(CodeType::Qr).decoded(), None);
        assert_eq!(DetectedObject::other("face").decoded(), None);
    }

    #[test]
    fn batch_parses_from_json_line() {
        let line = r#"{"objects":[{"object":"machine_readable","type":"qr","value":"HELLO"},{"object":"other","kind":"face"}]}"#;
        let batch: DetectionBatch = serde_json::from_str(line).unwrap();
        assert_eq!(batch.timestamp_ms, 0);
        assert_eq!(
            batch.objects,
            vec![
                DetectedObject::code(CodeType::Qr, "HELLO"),
                DetectedObject::other("face")
            ]
        );
    }

    #[test]
    fn position_parses_case_insensitively() {
        assert_eq!("Back".parse::<CapturePosition>().unwrap(), CapturePosition::Back);
        assert_eq!("front".parse::<CapturePosition>().unwrap(), CapturePosition::Front);
        assert!("side".parse::<CapturePosition>().is_err());
    }
}
