//! Clinic patient records: patient registration, visit history and bulk import,
//! served as HTML forms over actix-web with a diesel/SQLite store.

use actix_web::web;

pub mod config;
pub mod csrf;
pub mod docx;
pub mod handlers;
pub mod importer;
pub mod models;
pub mod schema;
pub mod store;
pub mod validation;
pub mod views;

pub use store::{DbPool, RecordStore, StoreError};

/// Register every route. The app must also carry `web::Data<RecordStore>`
/// and `web::Data<config::UploadSettings>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(handlers::query_error))
        .app_data(web::PathConfig::default().error_handler(handlers::path_error))
        .service(web::resource("/").route(web::get().to(handlers::index)))
        .service(
            web::resource("/add")
                .route(web::get().to(handlers::add_patient_form))
                .route(web::post().to(handlers::add_patient)),
        )
        .service(
            web::resource("/retrieve")
                .route(web::get().to(handlers::retrieve_patient))
                .route(web::post().to(handlers::retrieve_patient_post)),
        )
        .service(
            web::resource("/edit_patient/{vhid}").route(web::post().to(handlers::edit_patient)),
        )
        .service(web::resource("/add_visit/{vhid}").route(web::post().to(handlers::add_visit)))
        .service(
            web::resource("/edit_visit/{visit_id}").route(web::post().to(handlers::edit_visit)),
        )
        .service(web::resource("/get_visit/{visit_id}").route(web::get().to(handlers::get_visit)))
        .service(
            web::resource("/upload")
                .route(web::get().to(handlers::upload_form))
                .route(web::post().to(handlers::upload)),
        )
        .service(web::resource("/stats").route(web::get().to(handlers::statistics)));
}
