use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, Responder, ResponseError};
use prometheus::{Encoder, Registry, TextEncoder};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::order::{Actor, OrderError, PaymentMethod};
use crate::service::OrderService;
use crate::store::StoreError;

// ============================================================================
// HTTP Surface - metrics, health and the order read/payment API
// ============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<OrderService>,
    pub registry: Registry,
}

/// Wraps [`OrderError`] so it can be returned from handlers.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] OrderError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            OrderError::NotFound(_)
            | OrderError::ItemNotFound { .. }
            | OrderError::PaymentNotFound { .. }
            | OrderError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            OrderError::BeingDeleted(_) | OrderError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        HttpResponse::build(status).json(serde_json::json!({ "error": self.0.to_string() }))
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub actor: Option<Actor>,
}

/// Register every route. State must be added with `app_data`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler))
        .route("/orders/{id}/status", web::get().to(status_handler))
        .route("/orders/{id}/history", web::get().to(history_handler))
        .route("/orders/{id}/payments", web::post().to(payment_handler));
}

pub async fn serve(state: ApiState, port: u16) -> std::io::Result<()> {
    tracing::info!(port, "Starting HTTP server on http://0.0.0.0:{}", port);

    let data = web::Data::new(state);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(("0.0.0.0", port))?
        .run()
        .await
}

async fn metrics_handler(state: web::Data<ApiState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "furnishing-orders"
    }))
}

async fn status_handler(state: web::Data<ApiState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    let view = state.service.current_status(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

async fn history_handler(state: web::Data<ApiState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    let history = state.service.history(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(history))
}

async fn payment_handler(
    state: web::Data<ApiState>,
    path: web::Path<Uuid>,
    body: web::Json<PaymentRequest>,
) -> Result<HttpResponse, ApiError> {
    let order_id = path.into_inner();
    let request = body.into_inner();
    let payment = state
        .service
        .record_payment(
            order_id,
            request.amount,
            request.method,
            request.reference,
            request.actor.as_ref(),
        )
        .await?;
    let remaining = state.service.remaining_balance(order_id).await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "payment": payment,
        "remaining_balance": remaining,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LineItemDraft, NewOrder, OrderTypeTag};
    use crate::integrations::{RecordingInventory, StaticDirectory};
    use crate::metrics::Metrics;
    use crate::service::ServiceSettings;
    use crate::store::InMemoryStore;
    use actix_web::test;
    use rust_decimal_macros::dec;

    fn state() -> ApiState {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = OrderService::new(
            store.clone(),
            store,
            Arc::new(StaticDirectory::new()),
            Arc::new(RecordingInventory::new()),
            metrics.clone(),
            ServiceSettings::default(),
        );
        ApiState {
            service: Arc::new(service),
            registry: metrics.registry().clone(),
        }
    }

    async fn seeded_order(state: &ApiState) -> Uuid {
        let input = NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])
            .with_item(LineItemDraft::new(Uuid::new_v4(), "Blackout", dec!(2), dec!(100), dec!(10)))
            .with_item(LineItemDraft::new(Uuid::new_v4(), "Hooks", dec!(1), dec!(50), dec!(0)));
        state.service.create_order(input, None).await.unwrap().id
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_status_for_tailoring_order() {
        let state = state();
        let order_id = seeded_order(&state).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{order_id}/status"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["resolved"]["source"], "manufacturing");
        assert_eq!(body["badge"]["label"], "Pending");
    }

    #[actix_web::test]
    async fn test_unknown_order_is_404() {
        let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri(&format!("/orders/{}/history", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_payment_returns_remaining_balance() {
        let state = state();
        let order_id = seeded_order(&state).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri(&format!("/orders/{order_id}/payments"))
            .set_json(serde_json::json!({ "amount": "100", "method": "cash" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let remaining: Decimal = body["remaining_balance"].as_str().unwrap().parse().unwrap();
        assert_eq!(remaining, dec!(130));

        let req = test::TestRequest::post()
            .uri(&format!("/orders/{order_id}/payments"))
            .set_json(serde_json::json!({ "amount": "-5", "method": "cash" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{order_id}/history"))
            .to_request();
        let history: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let kinds: Vec<&str> = history["status_log"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|entry| entry["kind"].as_str())
            .collect();
        assert!(kinds.contains(&"payment"));
    }

    #[actix_web::test]
    async fn test_metrics_exposed() {
        let state = state();
        seeded_order(&state).await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("order_audit_entries_total"));
    }
}
