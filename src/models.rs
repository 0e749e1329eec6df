//! Patient and visit records, plus the form payloads that create and edit them.

use std::collections::HashMap;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{patients, visits};
use crate::validation;

/// A registered patient, keyed by the externally issued VHID.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = patients)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Patient {
    pub vhid: String,
    /// Registration date as entered on the form.
    pub date: String,
    pub name: String,
    pub age: Option<i32>,
    pub gender: String,
    pub address: String,
    /// Referring party.
    pub ref_by: String,
    pub mobile: String,
    pub past_history: String,
    pub drug_history: String,
    pub surgical_history: String,
}

/// Demographic fields written by an edit. The VHID is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, AsChangeset)]
#[diesel(table_name = patients)]
#[diesel(treat_none_as_null = true)]
pub struct PatientChanges {
    pub date: String,
    pub name: String,
    pub age: Option<i32>,
    pub gender: String,
    pub address: String,
    pub ref_by: String,
    pub mobile: String,
    pub past_history: String,
    pub drug_history: String,
    pub surgical_history: String,
}

/// Raw patient form as posted by the add and edit pages.
///
/// Every field is optional on the wire and defaults to the empty string;
/// `age` stays textual until validation has accepted it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "PatientFormBody")]
pub struct PatientForm {
    pub vhid: String,
    pub date: String,
    pub name: String,
    pub age: String,
    pub gender: String,
    pub address: String,
    pub ref_by: String,
    pub mobile: String,
    pub past_history: String,
    pub drug_history: String,
    pub surgical_history: String,
}

/// Wire shape of [`PatientForm`]. Older pages post the referral as
/// `referred` or `referred_by`; a non-empty `ref_by` wins over both.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PatientFormBody {
    vhid: String,
    date: String,
    name: String,
    age: String,
    gender: String,
    address: String,
    ref_by: String,
    referred_by: String,
    referred: String,
    mobile: String,
    past_history: String,
    drug_history: String,
    surgical_history: String,
}

impl From<PatientFormBody> for PatientForm {
    fn from(body: PatientFormBody) -> Self {
        let ref_by = first_filled([body.ref_by, body.referred_by, body.referred]);
        Self {
            vhid: body.vhid,
            date: body.date,
            name: body.name,
            age: body.age,
            gender: body.gender,
            address: body.address,
            ref_by,
            mobile: body.mobile,
            past_history: body.past_history,
            drug_history: body.drug_history,
            surgical_history: body.surgical_history,
        }
    }
}

fn first_filled<const N: usize>(candidates: [String; N]) -> String {
    candidates
        .into_iter()
        .find(|v| !v.trim().is_empty())
        .unwrap_or_default()
}

impl PatientForm {
    /// Trim every field and upper-case the VHID.
    pub fn normalized(self) -> Self {
        Self {
            vhid: validation::normalize_vhid(&self.vhid),
            date: self.date.trim().to_string(),
            name: self.name.trim().to_string(),
            age: self.age.trim().to_string(),
            gender: self.gender.trim().to_string(),
            address: self.address.trim().to_string(),
            ref_by: self.ref_by.trim().to_string(),
            mobile: self.mobile.trim().to_string(),
            past_history: self.past_history.trim().to_string(),
            drug_history: self.drug_history.trim().to_string(),
            surgical_history: self.surgical_history.trim().to_string(),
        }
    }

    /// Build a form from one parsed import block. Missing keys become empty strings.
    pub fn from_import_block(block: &HashMap<String, String>) -> Self {
        let field = |key: &str| block.get(key).cloned().unwrap_or_default();
        let ref_by = first_filled([field("ref_by"), field("referred_by"), field("referred")]);

        Self {
            vhid: field("vhid"),
            date: field("date"),
            name: field("name"),
            age: field("age"),
            gender: field("gender"),
            address: field("address"),
            ref_by,
            mobile: field("mobile"),
            past_history: field("past_history"),
            drug_history: field("drug_history"),
            surgical_history: field("surgical_history"),
        }
        .normalized()
    }

    /// Convert an accepted form into a new patient row.
    ///
    /// An `age` that does not parse is stored as `NULL`.
    pub fn into_patient(self) -> Patient {
        Patient {
            age: validation::parse_age(&self.age),
            vhid: self.vhid,
            date: self.date,
            name: self.name,
            gender: self.gender,
            address: self.address,
            ref_by: self.ref_by,
            mobile: self.mobile,
            past_history: self.past_history,
            drug_history: self.drug_history,
            surgical_history: self.surgical_history,
        }
    }

    pub fn into_changes(self) -> PatientChanges {
        PatientChanges {
            age: validation::parse_age(&self.age),
            date: self.date,
            name: self.name,
            gender: self.gender,
            address: self.address,
            ref_by: self.ref_by,
            mobile: self.mobile,
            past_history: self.past_history,
            drug_history: self.drug_history,
            surgical_history: self.surgical_history,
        }
    }
}

/// One clinical encounter.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = visits)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Visit {
    pub id: i32,
    pub vhid: String,
    pub date: String,
    pub ref_by: String,
    pub complaints: String,
    pub past_history: String,
    pub drug_history: String,
    pub surgical_history: String,
    pub vitals: String,
    pub examination: String,
    pub prov_diagnosis: String,
    pub invgs: String,
    pub impression: String,
    pub treatment: String,
    pub next_review: String,
    /// Extra impression notes, kept apart from `impression`.
    pub imp: String,
    /// On-examination notes, kept apart from `examination`.
    pub oe: String,
}

/// The editable part of a visit: the add-visit and edit-visit form body,
/// and the column set written on insert and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Insertable, AsChangeset)]
#[diesel(table_name = visits)]
#[serde(default)]
pub struct VisitFields {
    pub date: String,
    pub ref_by: String,
    pub complaints: String,
    pub past_history: String,
    pub drug_history: String,
    pub surgical_history: String,
    pub vitals: String,
    pub examination: String,
    pub prov_diagnosis: String,
    pub invgs: String,
    pub impression: String,
    pub treatment: String,
    pub next_review: String,
    pub imp: String,
    pub oe: String,
}

impl VisitFields {
    pub fn normalized(self) -> Self {
        let trim = |s: String| s.trim().to_string();
        Self {
            date: trim(self.date),
            ref_by: trim(self.ref_by),
            complaints: trim(self.complaints),
            past_history: trim(self.past_history),
            drug_history: trim(self.drug_history),
            surgical_history: trim(self.surgical_history),
            vitals: trim(self.vitals),
            examination: trim(self.examination),
            prov_diagnosis: trim(self.prov_diagnosis),
            invgs: trim(self.invgs),
            impression: trim(self.impression),
            treatment: trim(self.treatment),
            next_review: trim(self.next_review),
            imp: trim(self.imp),
            oe: trim(self.oe),
        }
    }
}

impl Visit {
    pub fn fields(&self) -> VisitFields {
        VisitFields {
            date: self.date.clone(),
            ref_by: self.ref_by.clone(),
            complaints: self.complaints.clone(),
            past_history: self.past_history.clone(),
            drug_history: self.drug_history.clone(),
            surgical_history: self.surgical_history.clone(),
            vitals: self.vitals.clone(),
            examination: self.examination.clone(),
            prov_diagnosis: self.prov_diagnosis.clone(),
            invgs: self.invgs.clone(),
            impression: self.impression.clone(),
            treatment: self.treatment.clone(),
            next_review: self.next_review.clone(),
            imp: self.imp.clone(),
            oe: self.oe.clone(),
        }
    }
}
