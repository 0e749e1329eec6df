use std::io;
use std::path::{Path, PathBuf};

use actix_multipart::{Multipart, MultipartError};
use actix_web::error::{InternalError, PathError, QueryPayloadError};
use actix_web::http::header::{self, ContentType};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::UploadSettings;
use crate::csrf::{self, CsrfError, CsrfToken};
use crate::docx::{self, ImportError};
use crate::importer;
use crate::models::{Patient, PatientForm, Visit, VisitFields};
use crate::store::{RecordStore, StoreError, StoreResult};
use crate::validation;
use crate::views::{self, Notice, Stats};

const UPLOAD_EXTENSION: &str = "docx";
const TOKEN_FIELD_LIMIT: usize = 256;

impl From<actix_web::error::BlockingError> for StoreError {
    fn from(_: actix_web::error::BlockingError) -> Self {
        StoreError::Blocking
    }
}

/// What a successful POST did, announced on the page it redirects to.
///
/// Only these codes travel in the `notice` query parameter, so a crafted link
/// cannot put arbitrary text in a success banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    PatientAdded,
    PatientUpdated,
    VisitAdded,
    VisitUpdated,
    Imported,
}

impl Outcome {
    const ALL: [Outcome; 5] = [
        Outcome::PatientAdded,
        Outcome::PatientUpdated,
        Outcome::VisitAdded,
        Outcome::VisitUpdated,
        Outcome::Imported,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Outcome::PatientAdded => "patient_added",
            Outcome::PatientUpdated => "patient_updated",
            Outcome::VisitAdded => "visit_added",
            Outcome::VisitUpdated => "visit_updated",
            Outcome::Imported => "imported",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }

    fn message(self) -> &'static str {
        match self {
            Outcome::PatientAdded => "Patient added successfully!",
            Outcome::PatientUpdated => "Patient details updated successfully!",
            Outcome::VisitAdded => "Visit added successfully!",
            Outcome::VisitUpdated => "Visit details updated successfully!",
            Outcome::Imported => "Import finished",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NoticeQuery {
    pub notice: Option<String>,
    pub created: Option<String>,
    pub existing: Option<String>,
    pub incomplete: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RetrieveQuery {
    pub vhid: String,
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LookupForm {
    pub vhid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenField {
    csrf_token: Option<String>,
}

/// Why a urlencoded form body was not handed to a handler.
#[derive(Debug)]
enum Rejected {
    Forged(CsrfError),
    Malformed(String),
}

/// Check the body's CSRF token, then decode it as `T`.
fn read_form<T: DeserializeOwned>(req: &HttpRequest, body: &[u8]) -> Result<T, Rejected> {
    let token = serde_urlencoded::from_bytes::<TokenField>(body)
        .ok()
        .and_then(|f| f.csrf_token);
    csrf::verify(req, token.as_deref()).map_err(Rejected::Forged)?;

    serde_urlencoded::from_bytes(body).map_err(|e| {
        tracing::warn!(path = %req.path(), error = %e, "Malformed form body");
        Rejected::Malformed(format!("Could not read the submitted form: {e}"))
    })
}

fn forged(req: &HttpRequest, error: CsrfError) -> HttpResponse {
    tracing::warn!(path = %req.path(), error = %error, "Rejected unverified form submission");
    html(
        StatusCode::FORBIDDEN,
        views::message_page(
            "Request Rejected",
            &[Notice::danger(
                "This form could not be verified. Reload the page and submit it again.",
            )],
        ),
    )
}

/// Run a store operation on actix's blocking thread pool.
async fn with_store<F, T>(store: &web::Data<RecordStore>, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&RecordStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    web::block(move || op(store.get_ref())).await?
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn html(status: StatusCode, body: String) -> HttpResponse {
    HttpResponse::build(status)
        .content_type(ContentType::html())
        .body(body)
}

fn see_other(location: String) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    match serde_urlencoded::to_string(pairs) {
        Ok(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_string(),
    }
}

/// The canonical patient view for `vhid`, announcing `outcome`.
fn retrieve_url(vhid: &str, outcome: Outcome) -> String {
    with_query("/retrieve", &[("vhid", vhid), ("notice", outcome.code())])
}

fn import_url(created: usize, existing: usize, incomplete: usize) -> String {
    let (created, existing, incomplete) =
        (created.to_string(), existing.to_string(), incomplete.to_string());
    with_query(
        "/",
        &[
            ("notice", Outcome::Imported.code()),
            ("created", created.as_str()),
            ("existing", existing.as_str()),
            ("incomplete", incomplete.as_str()),
        ],
    )
}

fn import_message(created: usize, existing: usize, incomplete: usize) -> String {
    format!("Imported {created} patient(s); skipped {existing} existing and {incomplete} incomplete")
}

/// Success banner for a record page. Unknown codes show nothing.
fn outcome_notices(code: Option<&str>) -> Vec<Notice> {
    match code.and_then(Outcome::from_code) {
        Some(Outcome::Imported) | None => Vec::new(),
        Some(outcome) => vec![Notice::success(outcome.message())],
    }
}

/// Success banner for the landing page, where bulk imports report their counts.
fn landing_notices(query: &NoticeQuery) -> Vec<Notice> {
    match query.notice.as_deref().and_then(Outcome::from_code) {
        Some(Outcome::Imported) => {
            let count = |v: &Option<String>| v.as_deref().and_then(|n| n.parse::<usize>().ok());
            match (
                count(&query.created),
                count(&query.existing),
                count(&query.incomplete),
            ) {
                (Some(c), Some(e), Some(i)) => vec![Notice::success(import_message(c, e, i))],
                _ => vec![Notice::success(Outcome::Imported.message())],
            }
        }
        Some(outcome) => vec![Notice::success(outcome.message())],
        None => Vec::new(),
    }
}

/// Rendered for query strings the extractor cannot decode.
pub fn query_error(err: QueryPayloadError, req: &HttpRequest) -> actix_web::Error {
    tracing::warn!(path = %req.path(), error = %err, "Malformed query string");
    let resp = html(
        StatusCode::BAD_REQUEST,
        views::message_page(
            "Bad Request",
            &[Notice::danger(format!("Could not read the request: {err}"))],
        ),
    );
    InternalError::from_response(err, resp).into()
}

/// Rendered for path parameters of the wrong shape, such as a non-numeric visit id.
pub fn path_error(err: PathError, req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(path = %req.path(), error = %err, "Unmatched path parameter");
    let resp = html(
        StatusCode::NOT_FOUND,
        views::message_page("Not Found", &[Notice::danger("Page not found")]),
    );
    InternalError::from_response(err, resp).into()
}

async fn load_record(
    store: &web::Data<RecordStore>,
    vhid: String,
) -> Result<Option<(Patient, Vec<Visit>)>, StoreError> {
    with_store(store, move |s| match s.get_patient(&vhid)? {
        Some(patient) => {
            let visits = s.list_visits_for_patient(&patient.vhid)?;
            Ok(Some((patient, visits)))
        }
        None => Ok(None),
    })
    .await
}

fn record_page(
    token: &CsrfToken,
    status: StatusCode,
    vhid: &str,
    notices: &[Notice],
    record: Option<(&Patient, &[Visit])>,
) -> HttpResponse {
    token.attach(html(
        status,
        views::retrieve_page(token.value(), notices, vhid, record, &today()),
    ))
}

/// Render the retrieve view for `vhid` with `notices`.
///
/// `announce` adds the lookup outcome ("retrieved" / "no record found") to the
/// messages; handlers re-showing a rejected form leave it off.
async fn show_record(
    store: &web::Data<RecordStore>,
    token: &CsrfToken,
    vhid: String,
    mut notices: Vec<Notice>,
    status: StatusCode,
    announce: bool,
) -> HttpResponse {
    if vhid.is_empty() {
        return record_page(token, status, &vhid, &notices, None);
    }

    match load_record(store, vhid.clone()).await {
        Ok(Some((patient, visits))) => {
            if announce {
                notices.push(Notice::success(format!(
                    "Patient record retrieved for VHID: {vhid}"
                )));
            }
            record_page(
                token,
                status,
                &vhid,
                &notices,
                Some((&patient, visits.as_slice())),
            )
        }
        Ok(None) => {
            if announce {
                notices.push(Notice::danger(format!("No record found for VHID: {vhid}")));
            }
            record_page(token, status, &vhid, &notices, None)
        }
        Err(e) => {
            tracing::error!(vhid = %vhid, error = %e, "Failed to load patient record");
            notices.push(Notice::danger(format!("Error retrieving patient: {e}")));
            record_page(token, StatusCode::INTERNAL_SERVER_ERROR, &vhid, &notices, None)
        }
    }
}

// ---------------------------------------------------------------------------
// Landing page and patients
// ---------------------------------------------------------------------------

pub async fn index(query: web::Query<NoticeQuery>) -> HttpResponse {
    html(StatusCode::OK, views::index_page(&landing_notices(&query)))
}

pub async fn add_patient_form(token: CsrfToken) -> HttpResponse {
    token.attach(html(
        StatusCode::OK,
        views::add_page(token.value(), &[], &PatientForm::default(), &today()),
    ))
}

pub async fn add_patient(
    req: HttpRequest,
    token: CsrfToken,
    store: web::Data<RecordStore>,
    body: web::Bytes,
) -> HttpResponse {
    let form = match read_form::<PatientForm>(&req, &body) {
        Ok(form) => form.normalized(),
        Err(Rejected::Forged(e)) => return forged(&req, e),
        Err(Rejected::Malformed(message)) => {
            return html(
                StatusCode::BAD_REQUEST,
                views::add_page(
                    token.value(),
                    &[Notice::danger(message)],
                    &PatientForm::default(),
                    &today(),
                ),
            );
        }
    };
    tracing::debug!(vhid = %form.vhid, "Received new patient form");

    let errors = validation::validate_new_patient(&form);
    if !errors.is_empty() {
        tracing::warn!(?errors, "Rejected new patient");
        return html(
            StatusCode::UNPROCESSABLE_ENTITY,
            views::add_page(token.value(), &Notice::from_errors(errors), &form, &today()),
        );
    }

    let patient = form.clone().into_patient();
    match with_store(&store, move |s| s.create_patient(&patient)).await {
        Ok(created) => {
            tracing::info!(vhid = %created.vhid, "Patient added");
            see_other(retrieve_url(&created.vhid, Outcome::PatientAdded))
        }
        Err(StoreError::DuplicateKey(vhid)) => {
            tracing::warn!(vhid = %vhid, "Duplicate VHID on registration");
            html(
                StatusCode::CONFLICT,
                views::add_page(
                    token.value(),
                    &[Notice::danger("VHID already exists!")],
                    &form,
                    &today(),
                ),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Error adding patient");
            html(
                StatusCode::INTERNAL_SERVER_ERROR,
                views::add_page(
                    token.value(),
                    &[Notice::danger(format!("Error adding patient: {e}"))],
                    &form,
                    &today(),
                ),
            )
        }
    }
}

pub async fn retrieve_patient(
    token: CsrfToken,
    store: web::Data<RecordStore>,
    query: web::Query<RetrieveQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    let vhid = validation::normalize_vhid(&query.vhid);
    let notices = outcome_notices(query.notice.as_deref());
    show_record(&store, &token, vhid, notices, StatusCode::OK, true).await
}

pub async fn retrieve_patient_post(
    req: HttpRequest,
    token: CsrfToken,
    store: web::Data<RecordStore>,
    body: web::Bytes,
) -> HttpResponse {
    match read_form::<LookupForm>(&req, &body) {
        Ok(form) => {
            let vhid = validation::normalize_vhid(&form.vhid);
            show_record(&store, &token, vhid, Vec::new(), StatusCode::OK, true).await
        }
        Err(Rejected::Forged(e)) => forged(&req, e),
        Err(Rejected::Malformed(message)) => {
            show_record(
                &store,
                &token,
                String::new(),
                vec![Notice::danger(message)],
                StatusCode::BAD_REQUEST,
                false,
            )
            .await
        }
    }
}

pub async fn edit_patient(
    req: HttpRequest,
    token: CsrfToken,
    store: web::Data<RecordStore>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let vhid = validation::normalize_vhid(&path.into_inner());
    let form = match read_form::<PatientForm>(&req, &body) {
        Ok(form) => form.normalized(),
        Err(Rejected::Forged(e)) => return forged(&req, e),
        Err(Rejected::Malformed(message)) => {
            return show_record(
                &store,
                &token,
                vhid,
                vec![Notice::danger(message)],
                StatusCode::BAD_REQUEST,
                false,
            )
            .await;
        }
    };
    tracing::debug!(vhid = %vhid, "Received patient edit");

    let errors = validation::validate_patient_edit(&form);
    if !errors.is_empty() {
        tracing::warn!(vhid = %vhid, ?errors, "Rejected patient edit");
        return show_record(
            &store,
            &token,
            vhid,
            Notice::from_errors(errors),
            StatusCode::UNPROCESSABLE_ENTITY,
            false,
        )
        .await;
    }

    let changes = form.into_changes();
    let target = vhid.clone();
    match with_store(&store, move |s| s.update_patient(&target, &changes)).await {
        Ok(()) => {
            tracing::info!(vhid = %vhid, "Patient updated");
            see_other(retrieve_url(&vhid, Outcome::PatientUpdated))
        }
        Err(StoreError::NotFound(_)) => {
            show_record(
                &store,
                &token,
                vhid,
                vec![Notice::danger("Patient not found")],
                StatusCode::NOT_FOUND,
                false,
            )
            .await
        }
        Err(e) => {
            tracing::error!(vhid = %vhid, error = %e, "Error updating patient");
            show_record(
                &store,
                &token,
                vhid,
                vec![Notice::danger(format!("Error updating patient: {e}"))],
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
            )
            .await
        }
    }
}

// ---------------------------------------------------------------------------
// Visits
// ---------------------------------------------------------------------------

pub async fn add_visit(
    req: HttpRequest,
    token: CsrfToken,
    store: web::Data<RecordStore>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let vhid = validation::normalize_vhid(&path.into_inner());
    let fields = match read_form::<VisitFields>(&req, &body) {
        Ok(fields) => fields.normalized(),
        Err(Rejected::Forged(e)) => return forged(&req, e),
        Err(Rejected::Malformed(message)) => {
            return show_record(
                &store,
                &token,
                vhid,
                vec![Notice::danger(message)],
                StatusCode::BAD_REQUEST,
                false,
            )
            .await;
        }
    };

    let errors = validation::validate_visit(&fields);
    if !errors.is_empty() {
        tracing::warn!(vhid = %vhid, ?errors, "Rejected new visit");
        return show_record(
            &store,
            &token,
            vhid,
            Notice::from_errors(errors),
            StatusCode::UNPROCESSABLE_ENTITY,
            false,
        )
        .await;
    }

    let target = vhid.clone();
    match with_store(&store, move |s| s.create_visit(&target, &fields)).await {
        Ok(visit) => {
            tracing::info!(vhid = %vhid, visit_id = visit.id, "Visit added");
            see_other(retrieve_url(&vhid, Outcome::VisitAdded))
        }
        Err(StoreError::NotFound(_)) => {
            show_record(
                &store,
                &token,
                vhid,
                vec![Notice::danger("Patient not found")],
                StatusCode::NOT_FOUND,
                false,
            )
            .await
        }
        Err(e) => {
            tracing::error!(vhid = %vhid, error = %e, "Error adding visit");
            show_record(
                &store,
                &token,
                vhid,
                vec![Notice::danger(format!("Error adding visit: {e}"))],
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
            )
            .await
        }
    }
}

fn visit_not_found() -> HttpResponse {
    html(
        StatusCode::NOT_FOUND,
        views::message_page("Edit Visit", &[Notice::danger("Visit not found")]),
    )
}

pub async fn edit_visit(
    req: HttpRequest,
    token: CsrfToken,
    store: web::Data<RecordStore>,
    path: web::Path<i32>,
    body: web::Bytes,
) -> HttpResponse {
    let id = path.into_inner();
    let fields = match read_form::<VisitFields>(&req, &body) {
        Ok(fields) => Ok(fields.normalized()),
        Err(Rejected::Forged(e)) => return forged(&req, e),
        Err(Rejected::Malformed(message)) => Err(message),
    };
    tracing::debug!(visit_id = id, "Received visit edit");

    // The owning patient decides where both success and rejection land.
    let visit = match with_store(&store, move |s| s.get_visit(id)).await {
        Ok(Some(visit)) => visit,
        Ok(None) => return visit_not_found(),
        Err(e) => {
            tracing::error!(visit_id = id, error = %e, "Error loading visit");
            return html(
                StatusCode::INTERNAL_SERVER_ERROR,
                views::message_page(
                    "Edit Visit",
                    &[Notice::danger(format!("Error updating visit: {e}"))],
                ),
            );
        }
    };

    let fields = match fields {
        Ok(fields) => fields,
        Err(message) => {
            return show_record(
                &store,
                &token,
                visit.vhid,
                vec![Notice::danger(message)],
                StatusCode::BAD_REQUEST,
                false,
            )
            .await;
        }
    };

    let errors = validation::validate_visit(&fields);
    if !errors.is_empty() {
        tracing::warn!(visit_id = id, ?errors, "Rejected visit edit");
        return show_record(
            &store,
            &token,
            visit.vhid,
            Notice::from_errors(errors),
            StatusCode::UNPROCESSABLE_ENTITY,
            false,
        )
        .await;
    }

    match with_store(&store, move |s| s.update_visit(id, &fields)).await {
        Ok(updated) => {
            tracing::info!(visit_id = id, vhid = %updated.vhid, "Visit updated");
            see_other(retrieve_url(&updated.vhid, Outcome::VisitUpdated))
        }
        Err(StoreError::NotFound(_)) => visit_not_found(),
        Err(e) => {
            tracing::error!(visit_id = id, error = %e, "Error updating visit");
            show_record(
                &store,
                &token,
                visit.vhid,
                vec![Notice::danger(format!("Error updating visit: {e}"))],
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
            )
            .await
        }
    }
}

/// JSON lookup used by the visit editing UI.
pub async fn get_visit(store: web::Data<RecordStore>, path: web::Path<i32>) -> HttpResponse {
    let id = path.into_inner();
    match with_store(&store, move |s| s.get_visit(id)).await {
        Ok(Some(visit)) => HttpResponse::Ok().json(visit),
        Ok(None) => HttpResponse::NotFound().json(json!({ "error": "Visit not found" })),
        Err(e) => {
            tracing::error!(visit_id = id, error = %e, "Error retrieving visit");
            HttpResponse::InternalServerError().json(json!({ "error": e.to_string() }))
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk import
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
enum UploadError {
    #[error("file exceeds the {0} byte upload limit")]
    TooLarge(usize),

    #[error("upload failed: {0}")]
    Multipart(#[from] MultipartError),
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// The multipart fields the upload form posts.
#[derive(Default)]
struct UploadForm {
    token: Option<String>,
    file: Option<Upload>,
}

/// Read the `file` and `csrf_token` fields of a multipart body, enforcing `max_bytes`.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<UploadForm, UploadError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            match name.as_str() {
                "file" => {
                    if bytes.len() + chunk.len() > max_bytes {
                        return Err(UploadError::TooLarge(max_bytes));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                csrf::TOKEN_NAME if bytes.len() < TOKEN_FIELD_LIMIT => {
                    bytes.extend_from_slice(&chunk)
                }
                _ => {}
            }
        }

        match name.as_str() {
            "file" if !filename.is_empty() => form.file = Some(Upload { filename, bytes }),
            csrf::TOKEN_NAME => form.token = String::from_utf8(bytes).ok(),
            _ => {}
        }
    }

    Ok(form)
}

fn has_allowed_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(UPLOAD_EXTENSION))
}

/// Keep only the final path component, restricted to a safe character set.
fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.docx");
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn save_upload(dir: &Path, upload: &Upload) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "{}_{}",
        Uuid::new_v4(),
        sanitize_filename(&upload.filename)
    ));
    std::fs::write(&path, &upload.bytes)?;
    Ok(path)
}

fn upload_rejected(token: &CsrfToken, status: StatusCode, message: impl Into<String>) -> HttpResponse {
    html(status, views::upload_page(token.value(), &[Notice::danger(message)]))
}

pub async fn upload_form(token: CsrfToken) -> HttpResponse {
    token.attach(html(StatusCode::OK, views::upload_page(token.value(), &[])))
}

pub async fn upload(
    req: HttpRequest,
    token: CsrfToken,
    store: web::Data<RecordStore>,
    settings: web::Data<UploadSettings>,
    payload: Multipart,
) -> HttpResponse {
    if let Err(e) = csrf::check_origin(&req) {
        return forged(&req, e);
    }

    let form = match read_upload(payload, settings.max_bytes).await {
        Ok(form) => form,
        Err(e @ UploadError::TooLarge(_)) => {
            return upload_rejected(&token, StatusCode::PAYLOAD_TOO_LARGE, e.to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read upload");
            return upload_rejected(&token, StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    if let Err(e) = csrf::verify(&req, form.token.as_deref()) {
        return forged(&req, e);
    }

    let Some(upload) = form.file else {
        return upload_rejected(&token, StatusCode::BAD_REQUEST, "No file selected");
    };

    if !has_allowed_extension(&upload.filename) {
        return upload_rejected(
            &token,
            StatusCode::BAD_REQUEST,
            "Invalid file type. Please upload a .docx document",
        );
    }

    match save_upload(&settings.dir, &upload) {
        Ok(path) => tracing::debug!(path = %path.display(), size = upload.bytes.len(), "Upload stored"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to store upload");
            return upload_rejected(&token, StatusCode::INTERNAL_SERVER_ERROR, "Failed to save file");
        }
    }

    let Upload { filename, bytes } = upload;
    let max_document_bytes = settings.max_document_bytes;
    let text = match web::block(move || docx::extract_text(&bytes, max_document_bytes)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(filename = %filename, error = %e, "Unreadable upload");
            let status = match e {
                ImportError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            return upload_rejected(&token, status, format!("Could not read document: {e}"));
        }
        Err(e) => {
            tracing::error!(filename = %filename, error = %e, "Document extraction was cancelled");
            return upload_rejected(
                &token,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not read document",
            );
        }
    };

    let batch: Vec<Patient> = importer::parse_patient_blocks(&text)
        .iter()
        .map(PatientForm::from_import_block)
        .map(PatientForm::into_patient)
        .collect();

    match with_store(&store, move |s| s.import_patients(batch)).await {
        Ok(summary) => {
            tracing::info!(
                created = summary.created.len(),
                skipped_existing = summary.skipped_existing.len(),
                skipped_incomplete = summary.skipped_incomplete,
                "Bulk import finished"
            );
            see_other(import_url(
                summary.created.len(),
                summary.skipped_existing.len(),
                summary.skipped_incomplete,
            ))
        }
        Err(e) => {
            tracing::error!(error = %e, "Bulk import failed");
            upload_rejected(
                &token,
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error importing patients: {e}"),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Database size for display; a failed size query shows as unknown.
fn size_or_unknown(size: StoreResult<Option<u64>>) -> Option<u64> {
    size.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not read database size");
        None
    })
}

pub async fn statistics(store: web::Data<RecordStore>) -> HttpResponse {
    let result = with_store(&store, |s| {
        Ok(Stats {
            patient_count: s.count_patients()?,
            visit_count: s.count_visits()?,
            storage_bytes: size_or_unknown(s.storage_size_bytes()),
        })
    })
    .await;

    match result {
        Ok(stats) => html(StatusCode::OK, views::stats_page(&[], &stats)),
        Err(e) => {
            tracing::error!(error = %e, "Error retrieving statistics");
            html(
                StatusCode::INTERNAL_SERVER_ERROR,
                views::index_page(&[Notice::danger(format!(
                    "Error retrieving statistics: {e}"
                ))]),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_docx_is_accepted() {
        assert!(has_allowed_extension("patients.docx"));
        assert!(has_allowed_extension("PATIENTS.DOCX"));
        assert!(!has_allowed_extension("patients.doc"));
        assert!(!has_allowed_extension("patients.docx.exe"));
        assert!(!has_allowed_extension("docx"));
    }

    #[test]
    fn sanitize_strips_directories_and_odd_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("March intake (2).docx"), "March_intake__2_.docx");
    }

    #[test]
    fn retrieve_url_carries_outcome_code() {
        assert_eq!(
            retrieve_url("VH 1", Outcome::PatientAdded),
            "/retrieve?vhid=VH+1&notice=patient_added"
        );
        assert_eq!(
            import_url(2, 1, 0),
            "/?notice=imported&created=2&existing=1&incomplete=0"
        );
    }

    #[test]
    fn only_known_outcomes_become_notices() {
        for outcome in Outcome::ALL {
            assert_eq!(Outcome::from_code(outcome.code()), Some(outcome));
        }
        assert!(outcome_notices(Some("You have won a prize")).is_empty());
        assert!(outcome_notices(None).is_empty());
        assert_eq!(
            outcome_notices(Some("visit_added")),
            vec![Notice::success("Visit added successfully!")]
        );

        let query = NoticeQuery {
            notice: Some("imported".into()),
            created: Some("3".into()),
            existing: Some("1".into()),
            incomplete: Some("0".into()),
        };
        assert_eq!(
            landing_notices(&query),
            vec![Notice::success(
                "Imported 3 patient(s); skipped 1 existing and 0 incomplete"
            )]
        );

        let query = NoticeQuery {
            notice: Some("imported".into()),
            created: Some("<b>lots</b>".into()),
            ..Default::default()
        };
        assert_eq!(landing_notices(&query), vec![Notice::success("Import finished")]);
    }

    #[test]
    fn size_error_falls_back_to_unknown() {
        assert_eq!(size_or_unknown(Ok(Some(4096))), Some(4096));
        assert_eq!(size_or_unknown(Err(StoreError::Blocking)), None);
    }
}
