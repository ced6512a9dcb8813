//! Liveness endpoint

use actix_web::{get, web, HttpResponse, Responder};
use serde_json::json;
use tracing::error;

use super::AppState;

/// Store reachability plus the live subscriber count
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    match state.db.ping().await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "ok": true,
            "subscribers": state.registry.len(),
        })),
        Err(e) => {
            error!("Health check failed: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "ok": false,
                "error": e.to_string(),
            }))
        }
    }
}
