//! HTTP adapter
//!
//! Thin axum layer over [`OrderService`]. Authentication happens upstream; the
//! acting user arrives in the request body.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;
use validator::{Validate, ValidationErrors};

use crate::domain::value_objects::{
    AddressId, CourierId, DeliveryId, GoodsArea, GoodsId, OrderId, PaymentMethod, ShipmentType, TimeRange, UserId,
};
use crate::ledger::LedgerError;
use crate::service::{CheckoutRequest, Dispatch, OrderService, ReceiptConfirmation};
use crate::store::{DeliveryLookup, OrderSearch, StatusFilter};
use crate::FulfillmentError;

const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

#[derive(Clone)]
pub struct AppState { pub orders: OrderService }

pub fn router(orders: OrderService) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "fresh-shop-orders"})) }))
        .route("/api/v1/orders", get(search_orders).post(create_order))
        .route("/api/v1/orders/:id", get(get_order).delete(delete_order))
        .route("/api/v1/orders/:id/status", get(order_status))
        .route("/api/v1/orders/:id/pay", post(request_payment))
        .route("/api/v1/orders/:id/payment-confirmation", post(confirm_payment))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/dispatch", post(dispatch))
        .route("/api/v1/orders/:id/receipt", post(confirm_receipt))
        .route("/api/v1/orders/:id/delivery", get(order_delivery))
        .route("/api/v1/deliveries/:id", get(delivery))
        .route("/api/v1/users/:id/order-counts", get(user_order_counts))
        .with_state(AppState { orders })
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Fulfillment(FulfillmentError),
    Validation(ValidationErrors),
}

impl From<FulfillmentError> for ApiError {
    fn from(e: FulfillmentError) -> Self { Self::Fulfillment(e) }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self { Self::Validation(e) }
}

#[derive(Serialize)]
struct ErrorBody { error: String }

fn status_of(e: &FulfillmentError) -> StatusCode {
    use FulfillmentError::*;
    match e {
        UserNotFound(_) | AddressNotFound(_) | OrderNotFound(_) | GoodsNotFound(_) | CourierNotFound(_) | DeliveryNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        InsufficientStock { .. } | EmptyPurchase(_) | InvalidState { .. } | AlreadyPaid(_) | CancelNotAllowed { .. }
        | RefundPolicyUndefined(_) | Ledger(LedgerError::InsufficientBalance { .. }) => StatusCode::CONFLICT,
        InvalidPaidAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentGateway(_) => StatusCode::BAD_GATEWAY,
        Config(_) | Ledger(_) | Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            Self::Fulfillment(e) => {
                let status = status_of(e);
                if status.is_server_error() {
                    error!(error = %e, "Request failed");
                }
                (status, e.user_message().to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    header("x-real-ip")
        .or_else(|| header("x-forwarded-for").and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())))
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| FALLBACK_CLIENT_IP.to_string())
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderBody {
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(range(min = 1))]
    pub address_id: Option<i64>,
    #[validate(range(min = 1))]
    pub points_goods_id: Option<i64>,
    pub shipment_type: Option<ShipmentType>,
}

async fn create_order(State(s): State<AppState>, headers: HeaderMap, Json(b): Json<CreateOrderBody>) -> ApiResult<impl IntoResponse> {
    b.validate()?;
    let placed = s.orders.create_order(CheckoutRequest {
        user_id: UserId(b.user_id),
        address_id: b.address_id.map(AddressId),
        points_goods_id: b.points_goods_id.map(GoodsId),
        shipment_type: b.shipment_type.unwrap_or(ShipmentType::Delivery),
        client_ip: client_ip(&headers),
    }).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SearchParams {
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u32>,
    pub status: Option<i16>,
    pub user_id: Option<i64>,
    pub goods_area: Option<i16>,
    pub payment: Option<i16>,
    pub created_start: Option<DateTime<Utc>>,
    pub created_end: Option<DateTime<Utc>>,
    pub shipment_start: Option<DateTime<Utc>>,
    pub shipment_end: Option<DateTime<Utc>>,
    pub receive_start: Option<DateTime<Utc>>,
    pub receive_end: Option<DateTime<Utc>>,
    pub cancel_start: Option<DateTime<Utc>>,
    pub cancel_end: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub order_sn: Option<String>,
    #[validate(length(max = 64))]
    pub shipment_name: Option<String>,
    #[validate(length(max = 32))]
    pub shipment_mobile: Option<String>,
    #[validate(length(max = 255))]
    pub shipment_address: Option<String>,
}

impl From<SearchParams> for OrderSearch {
    fn from(p: SearchParams) -> Self {
        Self {
            page: p.page.unwrap_or(1),
            page_size: p.page_size.unwrap_or(0),
            status: p.status.and_then(StatusFilter::from_code),
            user_id: p.user_id.map(UserId),
            goods_area: p.goods_area.and_then(|c| GoodsArea::try_from(c).ok()),
            payment: p.payment.and_then(|c| PaymentMethod::try_from(c).ok()),
            created: TimeRange::from_bounds(p.created_start, p.created_end),
            shipment_time: TimeRange::from_bounds(p.shipment_start, p.shipment_end),
            receive_time: TimeRange::from_bounds(p.receive_start, p.receive_end),
            cancel_time: TimeRange::from_bounds(p.cancel_start, p.cancel_end),
            order_sn: p.order_sn,
            shipment_name: p.shipment_name,
            shipment_mobile: p.shipment_mobile,
            shipment_address: p.shipment_address,
        }
    }
}

async fn search_orders(State(s): State<AppState>, Query(p): Query<SearchParams>) -> ApiResult<impl IntoResponse> {
    p.validate()?;
    Ok(Json(s.orders.search_orders(&p.into()).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.orders.get_order(OrderId(id)).await?))
}

async fn delete_order(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    s.orders.delete_order(OrderId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn order_status(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let status = s.orders.order_status(OrderId(id)).await?;
    Ok(Json(serde_json::json!({ "order_id": id, "status": status, "code": status.code() })))
}

async fn request_payment(State(s): State<AppState>, Path(id): Path<i64>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.orders.request_payment(OrderId(id), &client_ip(&headers)).await?))
}

#[derive(Debug, Deserialize)]
pub struct PaymentConfirmationBody { pub paid_amount: Decimal }

async fn confirm_payment(State(s): State<AppState>, Path(id): Path<i64>, Json(b): Json<PaymentConfirmationBody>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.orders.confirm_payment(OrderId(id), b.paid_amount).await?))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelBody {
    #[validate(range(min = 1))]
    pub reason: Option<i16>,
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<i64>, body: Option<Json<CancelBody>>) -> ApiResult<impl IntoResponse> {
    let b = body.map(|Json(b)| b).unwrap_or_default();
    b.validate()?;
    Ok(Json(s.orders.cancel_order(OrderId(id), b.reason).await?))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DispatchBody {
    #[validate(range(min = 1))]
    pub courier_id: Option<i64>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

async fn dispatch(State(s): State<AppState>, Path(id): Path<i64>, body: Option<Json<DispatchBody>>) -> ApiResult<impl IntoResponse> {
    let b = body.map(|Json(b)| b).unwrap_or_default();
    b.validate()?;
    Ok(Json(s.orders.dispatch(Dispatch {
        order_id: OrderId(id), courier_id: b.courier_id.map(CourierId), scheduled_time: b.scheduled_time,
    }).await?))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReceiptBody {
    #[validate(range(min = 1))]
    pub courier_id: Option<i64>,
}

async fn confirm_receipt(State(s): State<AppState>, Path(id): Path<i64>, body: Option<Json<ReceiptBody>>) -> ApiResult<impl IntoResponse> {
    let b = body.map(|Json(b)| b).unwrap_or_default();
    b.validate()?;
    Ok(Json(s.orders.confirm_receipt(ReceiptConfirmation { order_id: OrderId(id), courier_id: b.courier_id.map(CourierId) }).await?))
}

async fn order_delivery(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.orders.find_delivery(DeliveryLookup::ByOrder(OrderId(id))).await?))
}

async fn delivery(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.orders.find_delivery(DeliveryLookup::ById(DeliveryId(id))).await?))
}

async fn user_order_counts(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(s.orders.user_order_counts(UserId(id)).await?))
}
