//! Prompt templates for the instruction synthesizer.
//!
//! Every template is kept here so a wording change touches one file and unit
//! tests can pin the exact bytes the model receives. Callers override the
//! default through [`crate::config::ExtractionConfig::prompt_template`].

/// Placeholder replaced by the OCR text.
pub const TEXT_PLACEHOLDER: &str = "{text}";

/// Default prompt: instruction, blank line, then the raw OCR text.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Extract the medicine names, dosages, and instructions from the following prescription text:\n\n{text}";

/// Prompt used in structured mode. The model is asked for one JSON object
/// matching [`crate::output::PrescriptionRecord`].
pub const STRUCTURED_PROMPT_TEMPLATE: &str = r#"
Analyze this prescription text and extract structured information:

Prescription: "{text}"

Extract and format as JSON:
{
  "medicines": [{"name": "", "dosage": "", "frequency": "", "duration": "", "instructions": ""}],
  "patient_info": {"name": "", "age": ""},
  "doctor_info": {"name": "", "clinic": ""},
  "warnings": [],
  "confidence": 0.85
}"#;

/// Substitute `text` into `template`.
///
/// Only the first placeholder is replaced so OCR text that happens to contain
/// `{text}` is not expanded again.
pub fn render_prompt(template: &str, text: &str) -> String {
    template.replacen(TEXT_PLACEHOLDER, text, 1)
}

/// Build the default extraction prompt for `text`.
pub fn build_prompt(text: &str) -> String {
    render_prompt(DEFAULT_PROMPT_TEMPLATE, text)
}
