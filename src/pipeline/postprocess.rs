//! Post-processing: deterministic cleanup of generated text.
//!
//! Decoded model output carries tokenizer artefacts that have nothing to do
//! with the prescription: Windows line endings, trailing spaces left by
//! byte-level BPE, runs of blank lines, zero-width characters. The rules here
//! remove those without touching content.
//!
//! Structured mode additionally recovers a JSON object from the completion.
//! Models wrap it in prose or code fences more often than not, so the
//! recovery takes the span from the first `{` to the last `}`.

use crate::output::PrescriptionRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Apply all cleanup rules to decoded model output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Trim trailing whitespace per line
/// 3. Collapse 3+ consecutive blank lines down to 2
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 5. Trim leading and trailing blank space of the whole text
pub fn clean_output(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 4: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Structured mode ─────────────────────────────────────────────────────────

static RE_JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// The widest `{ … }` span in `text`, if any.
pub fn extract_json_block(text: &str) -> Option<&str> {
    RE_JSON_OBJECT.find(text).map(|m| m.as_str())
}

/// Recover a [`PrescriptionRecord`] from model output.
///
/// Returns `None` when there is no JSON object or it does not match the
/// record shape.
pub fn parse_record(text: &str) -> Option<PrescriptionRecord> {
    let block = extract_json_block(text)?;
    match serde_json::from_str::<PrescriptionRecord>(block) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!("JSON block did not parse as a prescription record: {}", e);
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_output_keeps_plain_text_unchanged() {
        let input = "Medicine: Amoxicillin, Dosage: 500mg, Instructions: twice daily";
        assert_eq!(clean_output(input), input);
    }

    #[test]
    fn clean_output_normalises_whitespace() {
        let input = "Medicine: A   \r\nDosage: 5mg\r\n\r\n\r\n\r\n\r\nDone\n\n";
        assert_eq!(clean_output(input), "Medicine: A\nDosage: 5mg\n\n\nDone");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "Amox\u{200B}icillin\u{FEFF} 500\u{00AD}mg";
        assert_eq!(remove_invisible_chars(input), "Amoxicillin 500mg");
    }

    #[test]
    fn extract_json_from_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"medicines\": []}\n```\nHope this helps.";
        assert_eq!(extract_json_block(reply), Some("{\"medicines\": []}"));
    }

    #[test]
    fn no_json_block() {
        assert_eq!(extract_json_block("Take one tablet daily."), None);
        assert!(parse_record("Take one tablet daily.").is_none());
    }

    #[test]
    fn parse_record_full_schema() {
        let reply = r#"Result:
{
  "medicines": [{"name": "Metformin", "dosage": "500mg", "frequency": "twice daily", "duration": "30 days", "instructions": "after meals"}],
  "patient_info": {"name": "J. Doe", "age": "54"},
  "doctor_info": {"name": "Dr. Rao", "clinic": "City Clinic"},
  "warnings": ["monitor blood sugar"],
  "confidence": 0.9
}"#;
        let record = parse_record(reply).unwrap();
        assert_eq!(record.medicines[0].name, "Metformin");
        assert_eq!(record.medicines[0].instructions, "after meals");
        assert_eq!(record.patient_info.age, "54");
        assert_eq!(record.doctor_info.clinic, "City Clinic");
        assert_eq!(record.warnings, vec!["monitor blood sugar"]);
        assert_eq!(record.confidence, Some(0.9));
    }

    #[test]
    fn malformed_json_is_none() {
        assert!(parse_record("{\"medicines\": [ {\"name\": }").is_none());
    }
}
