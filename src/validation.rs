//! Field checks run before any write. Each function returns every violation
//! it finds; an empty list means the input is acceptable.

use crate::models::{PatientForm, VisitFields};

pub const MIN_AGE: i32 = 0;
pub const MAX_AGE: i32 = 150;

pub fn normalize_vhid(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Parse an age in `[MIN_AGE, MAX_AGE]`. Anything else is `None`.
pub fn parse_age(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i32>()
        .ok()
        .filter(|age| (MIN_AGE..=MAX_AGE).contains(age))
}

fn is_digits(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit())
}

fn check_formats(form: &PatientForm, errors: &mut Vec<String>) {
    if !form.mobile.is_empty() && !is_digits(&form.mobile) {
        errors.push("Mobile number must contain only digits".to_string());
    }
    if !form.age.is_empty() && parse_age(&form.age).is_none() {
        errors.push("Age must be a number between 0 and 150".to_string());
    }
}

/// Registration: VHID and name are required. Age and mobile are only
/// checked for format when present.
pub fn validate_new_patient(form: &PatientForm) -> Vec<String> {
    let mut errors = Vec::new();
    if normalize_vhid(&form.vhid).is_empty() {
        errors.push("VHID is required".to_string());
    }
    if form.name.trim().is_empty() {
        errors.push("Name is required".to_string());
    }
    check_formats(form, &mut errors);
    errors
}

pub fn validate_patient_edit(form: &PatientForm) -> Vec<String> {
    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("Name is required".to_string());
    }
    if form.date.trim().is_empty() {
        errors.push("Date is required".to_string());
    }
    if form.gender.trim().is_empty() {
        errors.push("Gender is required".to_string());
    }
    check_formats(form, &mut errors);
    errors
}

/// Shared by add-visit and edit-visit.
pub fn validate_visit(fields: &VisitFields) -> Vec<String> {
    let mut errors = Vec::new();
    if fields.date.trim().is_empty() {
        errors.push("Date is required".to_string());
    }
    if fields.complaints.trim().is_empty() {
        errors.push("Complaints are required".to_string());
    }
    errors
}
