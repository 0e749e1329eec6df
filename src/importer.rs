//! Parses bulk-import text into patient field maps.
//!
//! The text is a sequence of blocks. A block starts at any line whose first
//! word is `Patient` (any case) and holds the `key: value` lines that follow
//! it, up to the next block or the end of the text:
//!
//! ```text
//! Patient 1
//! VHID: vh-100
//! Name: Asha Rao
//! Past History: asthma
//! ```

use std::collections::HashMap;

/// A parsed block: normalized field name to trimmed value.
pub type FieldMap = HashMap<String, String>;

const BLOCK_MARKER: &str = "patient";

fn is_block_marker(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(':').eq_ignore_ascii_case(BLOCK_MARKER))
        .unwrap_or(false)
}

/// `"Past History"` becomes `"past_history"`.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(' ', "_")
}

/// Split `text` into field maps, one per block, in document order.
///
/// Lines before the first block and lines without a `:` are ignored. Nothing
/// is validated here.
pub fn parse_patient_blocks(text: &str) -> Vec<FieldMap> {
    let mut blocks = Vec::new();
    let mut current: Option<FieldMap> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if is_block_marker(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(FieldMap::new());
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        if let Some((key, value)) = line.split_once(':') {
            let key = normalize_key(key);
            if !key.is_empty() {
                block.insert(key, value.trim().to_string());
            }
        }
    }

    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blocks_in_order() {
        let text = "\
Clinic export, March
Patient 1
VHID: vh-100
Name:  Asha Rao
Past History: asthma, since 2010
PATIENT 2
vhid: VH-101
Name: Ravi Kumar
Mobile: 98450 12345
";
        let blocks = parse_patient_blocks(text);
        assert_eq!(blocks.len(), 2);

        assert_eq!(blocks[0]["vhid"], "vh-100");
        assert_eq!(blocks[0]["name"], "Asha Rao");
        assert_eq!(blocks[0]["past_history"], "asthma, since 2010");

        assert_eq!(blocks[1]["vhid"], "VH-101");
        assert_eq!(blocks[1]["mobile"], "98450 12345");
        assert!(!blocks[1].contains_key("past_history"));
    }

    #[test]
    fn value_keeps_text_after_first_colon() {
        let blocks = parse_patient_blocks("Patient\nNext Review: 10:30 on Monday\n");
        assert_eq!(blocks[0]["next_review"], "10:30 on Monday");
    }

    #[test]
    fn marker_needs_patient_as_first_word() {
        let text = "Patient:\nName: A\nOutpatient notes\nNew patient: B\n";
        let blocks = parse_patient_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["name"], "A");
        assert_eq!(blocks[0]["new_patient"], "B");
    }

    #[test]
    fn empty_block_is_kept() {
        let blocks = parse_patient_blocks("Patient one\nno fields here\nPatient two\nName: B");
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_empty());
    }

    #[test]
    fn no_markers_means_no_blocks() {
        assert!(parse_patient_blocks("Name: Orphan\nVHID: X1").is_empty());
        assert!(parse_patient_blocks("").is_empty());
    }
}
