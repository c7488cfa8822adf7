use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::handlers::{
    AvailabilityEngine, AvailabilityQuery, BookingLedger, DbPool, NotificationStore,
};
use crate::models::{Booking, BookingDraft, Notification};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub slots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking: Booking,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct ComplaintRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/providers/:provider_ref/slots", get(get_available_slots))
        .route("/bookings", post(create_booking))
        .route("/bookings/:id/confirm", post(confirm_booking))
        .route("/bookings/:id/payments", post(collect_payment))
        .route("/bookings/:id/complaint", post(submit_complaint))
        .route("/notifications/:recipient_ref", get(list_notifications))
        .route(
            "/notifications/:recipient_ref/unread-count",
            get(unread_count),
        )
        .route("/notifications/:id/read", post(mark_read))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn get_available_slots(
    State(state): State<AppState>,
    Path(provider_ref): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<SlotsResponse>, ServiceError> {
    let engine = AvailabilityEngine::new(state.pool);
    let slots = engine.available_slots(&provider_ref, &query).await?;
    Ok(Json(SlotsResponse { slots }))
}

pub async fn create_booking(
    State(state): State<AppState>,
    Json(draft): Json<BookingDraft>,
) -> Result<Json<BookingResponse>, ServiceError> {
    let ledger = BookingLedger::new(state.pool);
    let booking = ledger.create_booking(draft).await?;
    Ok(Json(BookingResponse { booking }))
}

pub async fn confirm_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<BookingResponse>, ServiceError> {
    let ledger = BookingLedger::new(state.pool);
    let booking = ledger.confirm_booking(booking_id, request.pin).await?;
    Ok(Json(BookingResponse { booking }))
}

pub async fn collect_payment(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<BookingResponse>, ServiceError> {
    let ledger = BookingLedger::new(state.pool);
    let booking = ledger.collect_payment(booking_id, request.amount).await?;
    Ok(Json(BookingResponse { booking }))
}

pub async fn submit_complaint(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<ComplaintRequest>,
) -> Result<Json<BookingResponse>, ServiceError> {
    let ledger = BookingLedger::new(state.pool);
    let booking = ledger.submit_complaint(booking_id, request.text).await?;
    Ok(Json(BookingResponse { booking }))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Path(recipient_ref): Path<String>,
) -> Result<Json<NotificationsResponse>, ServiceError> {
    let store = NotificationStore::new(state.pool);
    let notifications = store.list(&recipient_ref).await?;
    Ok(Json(NotificationsResponse { notifications }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(recipient_ref): Path<String>,
) -> Result<Json<UnreadCountResponse>, ServiceError> {
    let store = NotificationStore::new(state.pool);
    let count = store.unread_count(&recipient_ref).await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    let store = NotificationStore::new(state.pool);
    store.mark_read(notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_check() -> &'static str {
    "OK"
}
