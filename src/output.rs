//! Result types produced by one extraction.

use serde::{Deserialize, Serialize};

/// Everything one run produced, serialised by `rx-extract --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The image path or URL as given on the command line.
    pub source: String,
    /// Text recognised by the OCR stage.
    pub ocr_text: String,
    /// Prompt sent to the generator.
    pub prompt: String,
    /// Decoded generator output (prompt echo included unless disabled).
    pub result: String,
    /// Completion alone, without the echoed prompt.
    pub completion: String,
    /// Parsed record in structured mode, when the model produced valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<PrescriptionRecord>,
    pub stats: ExtractionStats,
}

/// Timings and token counts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub ocr_duration_ms: u64,
    pub generation_duration_ms: u64,
    pub total_duration_ms: u64,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Whether generation stopped on the length bound rather than end-of-sequence.
    pub truncated: bool,
}

/// Structured view of a prescription.
///
/// Every field is optional on input: models routinely omit keys, and a
/// partially-filled record is still useful.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrescriptionRecord {
    pub medicines: Vec<Medicine>,
    pub patient_info: PatientInfo,
    pub doctor_info: DoctorInfo,
    pub warnings: Vec<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Medicine {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientInfo {
    pub name: String,
    pub age: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorInfo {
    pub name: String,
    pub clinic: String,
}

impl PrescriptionRecord {
    /// Records whose medicines all have empty names carry no information.
    pub fn is_empty(&self) -> bool {
        self.medicines.iter().all(|m| m.name.trim().is_empty())
    }
}
