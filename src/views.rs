//! Server-rendered HTML pages.
//!
//! Pages are self-contained strings with inline styles. Every value that came
//! from a user or the database goes through [`escape`] before it is written.

use std::fmt::Write as _;

use crate::config::APP_NAME;
use crate::csrf;
use crate::models::{Patient, PatientForm, Visit, VisitFields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Danger,
}

impl Level {
    fn css_class(self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Danger => "danger",
        }
    }
}

/// A status message shown at the top of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: Level,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            text: text.into(),
        }
    }

    pub fn danger(text: impl Into<String>) -> Self {
        Self {
            level: Level::Danger,
            text: text.into(),
        }
    }

    /// One danger notice per validation message.
    pub fn from_errors(errors: Vec<String>) -> Vec<Self> {
        errors.into_iter().map(Self::danger).collect()
    }
}

/// Aggregate counts for the statistics page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub patient_count: i64,
    pub visit_count: i64,
    pub storage_bytes: Option<u64>,
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode a value for use as one URL path segment.
pub fn path_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

const PATIENT_FIELDS: [(&str, &str); 11] = [
    ("vhid", "VHID"),
    ("date", "Date"),
    ("name", "Name"),
    ("age", "Age"),
    ("gender", "Gender"),
    ("address", "Address"),
    ("ref_by", "Referred By"),
    ("mobile", "Mobile"),
    ("past_history", "Past History"),
    ("drug_history", "Drug History"),
    ("surgical_history", "Surgical History"),
];

const VISIT_FIELDS: [(&str, &str); 15] = [
    ("date", "Date"),
    ("ref_by", "Referred By"),
    ("complaints", "Complaints"),
    ("past_history", "Past History"),
    ("drug_history", "Drug History"),
    ("surgical_history", "Surgical History"),
    ("vitals", "Vitals"),
    ("examination", "Examination"),
    ("oe", "O/E"),
    ("prov_diagnosis", "Provisional Diagnosis"),
    ("invgs", "Investigations"),
    ("impression", "Impression"),
    ("imp", "Imp"),
    ("treatment", "Treatment"),
    ("next_review", "Next Review"),
];

fn patient_form_value<'a>(form: &'a PatientForm, name: &str) -> &'a str {
    match name {
        "vhid" => &form.vhid,
        "date" => &form.date,
        "name" => &form.name,
        "age" => &form.age,
        "gender" => &form.gender,
        "address" => &form.address,
        "ref_by" => &form.ref_by,
        "mobile" => &form.mobile,
        "past_history" => &form.past_history,
        "drug_history" => &form.drug_history,
        "surgical_history" => &form.surgical_history,
        _ => "",
    }
}

fn visit_value<'a>(fields: &'a VisitFields, name: &str) -> &'a str {
    match name {
        "date" => &fields.date,
        "ref_by" => &fields.ref_by,
        "complaints" => &fields.complaints,
        "past_history" => &fields.past_history,
        "drug_history" => &fields.drug_history,
        "surgical_history" => &fields.surgical_history,
        "vitals" => &fields.vitals,
        "examination" => &fields.examination,
        "oe" => &fields.oe,
        "prov_diagnosis" => &fields.prov_diagnosis,
        "invgs" => &fields.invgs,
        "impression" => &fields.impression,
        "imp" => &fields.imp,
        "treatment" => &fields.treatment,
        "next_review" => &fields.next_review,
        _ => "",
    }
}

fn form_from_patient(patient: &Patient) -> PatientForm {
    PatientForm {
        vhid: patient.vhid.clone(),
        date: patient.date.clone(),
        name: patient.name.clone(),
        age: patient.age.map(|a| a.to_string()).unwrap_or_default(),
        gender: patient.gender.clone(),
        address: patient.address.clone(),
        ref_by: patient.ref_by.clone(),
        mobile: patient.mobile.clone(),
        past_history: patient.past_history.clone(),
        drug_history: patient.drug_history.clone(),
        surgical_history: patient.surgical_history.clone(),
    }
}

fn is_long_text(name: &str) -> bool {
    name.ends_with("_history")
        || matches!(
            name,
            "address" | "complaints" | "examination" | "oe" | "invgs" | "impression" | "imp" | "treatment"
        )
}

fn input(name: &str, label: &str, value: &str) -> String {
    if is_long_text(name) {
        format!(
            r#"<label>{label}<textarea name="{name}" rows="2">{value}</textarea></label>"#,
            value = escape(value)
        )
    } else {
        format!(
            r#"<label>{label}<input type="text" name="{name}" value="{value}"></label>"#,
            value = escape(value)
        )
    }
}

fn token_input(token: &str) -> String {
    format!(
        r#"<input type="hidden" name="{}" value="{}">"#,
        csrf::TOKEN_NAME,
        escape(token)
    )
}

fn layout(title: &str, notices: &[Notice], body: &str) -> String {
    let mut flashes = String::new();
    for notice in notices {
        let _ = write!(
            flashes,
            r#"<div class="notice {}">{}</div>"#,
            notice.level.css_class(),
            escape(&notice.text)
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | {app}</title>
<style>
body {{ font-family: system-ui, sans-serif; margin: 0; color: #222; }}
nav {{ background: #0b5d6b; padding: 0.6rem 1rem; }}
nav a {{ color: #fff; margin-right: 1rem; text-decoration: none; }}
main {{ max-width: 960px; margin: 1rem auto; padding: 0 1rem; }}
.notice {{ padding: 0.5rem 0.8rem; margin-bottom: 0.4rem; border-radius: 4px; }}
.success {{ background: #e3f5e8; color: #1d6b34; }}
.danger {{ background: #fbe4e4; color: #8a1f1f; }}
form label {{ display: block; margin: 0.4rem 0; }}
form input, form textarea {{ display: block; width: 100%; box-sizing: border-box; }}
table {{ border-collapse: collapse; width: 100%; }}
td, th {{ border: 1px solid #ccc; padding: 0.3rem; text-align: left; vertical-align: top; }}
.visit {{ border: 1px solid #ddd; border-radius: 4px; padding: 0.6rem; margin: 0.6rem 0; }}
</style>
</head>
<body>
<nav><a href="/">Home</a><a href="/add">Add Patient</a><a href="/retrieve">Retrieve</a><a href="/upload">Upload</a><a href="/stats">Statistics</a></nav>
<main>
{flashes}
<h1>{title}</h1>
{body}
</main>
</body>
</html>"#,
        title = escape(title),
        app = APP_NAME,
    )
}

pub fn index_page(notices: &[Notice]) -> String {
    layout(
        APP_NAME,
        notices,
        r#"<p>Register patients, look up their records and record visits.</p>
<ul>
<li><a href="/add">Register a new patient</a></li>
<li><a href="/retrieve">Retrieve a patient record</a></li>
<li><a href="/upload">Bulk import patients from a .docx document</a></li>
<li><a href="/stats">View statistics</a></li>
</ul>"#,
    )
}

/// Registration form, pre-filled with `form` when re-shown after a rejection.
pub fn add_page(token: &str, notices: &[Notice], form: &PatientForm, today: &str) -> String {
    let mut body = String::from(r#"<form method="post" action="/add">"#);
    body.push_str(&token_input(token));
    for (name, label) in PATIENT_FIELDS {
        let mut value = patient_form_value(form, name);
        if name == "date" && value.is_empty() {
            value = today;
        }
        body.push_str(&input(name, label, value));
    }
    body.push_str(r#"<button type="submit">Add Patient</button></form>"#);
    layout("Add Patient", notices, &body)
}

fn search_form(token: &str, vhid: &str) -> String {
    format!(
        r#"<form method="post" action="/retrieve">{}<label>VHID<input type="text" name="vhid" value="{}"></label><button type="submit">Retrieve</button></form>"#,
        token_input(token),
        escape(vhid)
    )
}

fn patient_section(token: &str, patient: &Patient) -> String {
    let form = form_from_patient(patient);
    let mut out = String::from("<h2>Patient Details</h2><table>");
    for (name, label) in PATIENT_FIELDS {
        let _ = write!(
            out,
            "<tr><th>{label}</th><td>{}</td></tr>",
            escape(patient_form_value(&form, name))
        );
    }
    out.push_str("</table>");

    let _ = write!(
        out,
        r#"<details><summary>Edit patient</summary><form method="post" action="/edit_patient/{}">{}"#,
        path_segment(&patient.vhid),
        token_input(token)
    );
    for (name, label) in PATIENT_FIELDS.iter().skip(1) {
        out.push_str(&input(name, label, patient_form_value(&form, name)));
    }
    out.push_str(r#"<button type="submit">Save</button></form></details>"#);
    out
}

fn visit_inputs(fields: &VisitFields) -> String {
    VISIT_FIELDS
        .iter()
        .map(|(name, label)| input(name, label, visit_value(fields, name)))
        .collect()
}

fn visit_section(token: &str, visit: &Visit) -> String {
    let fields = visit.fields();
    let mut out = format!(
        r#"<div class="visit" id="visit-{id}" data-visit-id="{id}"><h3>Visit on {date}</h3><table>"#,
        id = visit.id,
        date = escape(&visit.date)
    );
    for (name, label) in VISIT_FIELDS.iter().skip(1) {
        let value = visit_value(&fields, name);
        if !value.is_empty() {
            let _ = write!(out, "<tr><th>{label}</th><td>{}</td></tr>", escape(value));
        }
    }
    let _ = write!(
        out,
        r#"</table><details><summary>Edit visit</summary><form method="post" action="/edit_visit/{}">{}{}<button type="submit">Save Visit</button></form></details></div>"#,
        visit.id,
        token_input(token),
        visit_inputs(&fields)
    );
    out
}

/// Patient lookup: the search form, then the record and its visits when found.
pub fn retrieve_page(
    token: &str,
    notices: &[Notice],
    vhid: &str,
    record: Option<(&Patient, &[Visit])>,
    today: &str,
) -> String {
    let mut body = search_form(token, vhid);

    if let Some((patient, visits)) = record {
        body.push_str(&patient_section(token, patient));

        let new_visit = VisitFields {
            date: today.to_string(),
            ..Default::default()
        };
        let _ = write!(
            body,
            r#"<h2>Add Visit</h2><form method="post" action="/add_visit/{}">{}{}<button type="submit">Add Visit</button></form>"#,
            path_segment(&patient.vhid),
            token_input(token),
            visit_inputs(&new_visit)
        );

        let _ = write!(body, "<h2>Visits ({})</h2>", visits.len());
        if visits.is_empty() {
            body.push_str("<p>No visits recorded.</p>");
        }
        for visit in visits {
            body.push_str(&visit_section(token, visit));
        }
    } else if !vhid.is_empty() {
        body.push_str("<p>No patient record to show.</p>");
    }

    layout("Retrieve Patient", notices, &body)
}

/// A page that carries only status messages.
pub fn message_page(title: &str, notices: &[Notice]) -> String {
    layout(title, notices, r#"<p><a href="/retrieve">Back to patient lookup</a></p>"#)
}

pub fn upload_page(token: &str, notices: &[Notice]) -> String {
    let body = format!(
        r#"<p>Upload a .docx document. Each patient starts with a line beginning with "Patient", followed by "Field: value" lines.</p>
<form method="post" action="/upload" enctype="multipart/form-data">
{}
<label>Document<input type="file" name="file" accept=".docx"></label>
<button type="submit">Upload</button>
</form>"#,
        token_input(token)
    );
    layout("Bulk Import", notices, &body)
}

fn format_size(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) => format!("{:.2} MB", b as f64 / (1024.0 * 1024.0)),
        None => "N/A".to_string(),
    }
}

pub fn stats_page(notices: &[Notice], stats: &Stats) -> String {
    let body = format!(
        "<table><tr><th>Patients</th><td>{}</td></tr><tr><th>Visits</th><td>{}</td></tr><tr><th>Database size</th><td>{}</td></tr></table>",
        stats.patient_count,
        stats.visit_count,
        format_size(stats.storage_bytes)
    );
    layout("Statistics", notices, &body)
}
