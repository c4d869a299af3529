use actix_web::{web, Responder};

use crate::error::ApiError;
use crate::orchestrator::ReviewEngine;
use crate::types::{CompareRequest, IndexRequest, ValidateRequest};

pub async fn health() -> impl Responder {
    web::Json(serde_json::json!({"status": "ok"}))
}

pub async fn index_repository(
    body: web::Json<IndexRequest>,
    engine: web::Data<ReviewEngine>,
) -> Result<impl Responder, ApiError> {
    let summary = engine.index_repository(body.into_inner()).await?;
    Ok(web::Json(summary))
}

pub async fn validate_claims(
    body: web::Json<ValidateRequest>,
    engine: web::Data<ReviewEngine>,
) -> Result<impl Responder, ApiError> {
    let request = body.into_inner();

    if request.claims.is_empty() {
        return Err(ApiError::BadRequest("claims must not be empty".to_string()));
    }

    let report = engine.validate_claims(request).await?;
    Ok(web::Json(report))
}

pub async fn compare_branches(
    body: web::Json<CompareRequest>,
    engine: web::Data<ReviewEngine>,
) -> Result<impl Responder, ApiError> {
    let response = engine.compare_branches(body.into_inner()).await?;
    Ok(web::Json(response))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            .route("/index", web::post().to(index_repository))
            .route("/validate", web::post().to(validate_claims))
            .route("/compare", web::post().to(compare_branches)),
    );
}
