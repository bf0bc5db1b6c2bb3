use crate::{
    availability::{build_matrix, AvailabilityMatrix},
    backend::BookingBackend,
    configuration::Configuration,
    error::BookingError,
    payment::{confirm_booking, expire_booking, reject_booking, submit_receipt},
    pricing::add_pricing_rule,
    receipt_storage::ReceiptStorage,
    reservation::reserve,
    slot_generator::{
        generate_slots, regenerate_slots, set_weekly_schedule, weekly_schedule, GenerationRequest,
        RegenerationSummary, DEFAULT_SLOT_MINUTES,
    },
    types::{
        Booking, BookingStatus, PaymentMethod, PricingRule, Resource, SlotWithResource,
        WeeklyScheduleRule,
    },
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Local, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState<B: BookingBackend> {
    backend: B,
    receipts: Arc<dyn ReceiptStorage>,
    admin_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct NewResourceRequest {
    business_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    name: String,
    field_type: Option<String>,
    #[validate(range(min = 0))]
    base_price: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ScheduleDay {
    #[validate(range(min = 1, max = 7))]
    day_of_week: u8,
    is_open: bool,
    open_time: NaiveTime,
    close_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ScheduleRequest {
    #[validate(length(max = 7))]
    #[validate(nested)]
    rules: Vec<ScheduleDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct PricingRuleRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(range(min = 0))]
    price_override: i64,
    #[serde(default)]
    days_of_week: Vec<u8>,
    start_time: NaiveTime,
    end_time: NaiveTime,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct PaymentMethodRequest {
    #[validate(length(min = 1))]
    method_type: String,
    #[validate(length(min = 1))]
    account_name: String,
    #[validate(length(min = 1))]
    account_number: String,
}

fn default_slot_minutes() -> u32 {
    DEFAULT_SLOT_MINUTES
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct GenerateSlotsRequest {
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default = "default_slot_minutes")]
    #[validate(range(min = 1, max = 1440))]
    slot_duration_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct DateQuery {
    date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
struct BookingFilter {
    status: Option<BookingStatus>,
}

#[derive(Debug, Default)]
struct ReceiptFile {
    file_name: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct ReservationForm {
    slot_id: Option<Uuid>,
    user_id: Option<String>,
    amount: Option<i64>,
    receipt: Option<ReceiptFile>,
}

impl BookingError {
    fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Conflict(_) => StatusCode::CONFLICT,
            BookingError::InvalidStateTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::UploadFailure(_) => StatusCode::BAD_GATEWAY,
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::ScheduleLookupFailure { .. } | BookingError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> Value {
        let message = match self {
            BookingError::InvalidStateTransition { .. } => {
                "The booking can't be updated in its current state".to_owned()
            }
            BookingError::ScheduleLookupFailure { .. } | BookingError::Storage(_) => {
                "Internal error, please contact support".to_owned()
            }
            BookingError::UploadFailure(_) => "Receipt upload failed, please try again".to_owned(),
            other => other.to_string(),
        };
        json!({ "success": false, "error": message, "kind": self.kind() })
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            error!(err = %self, "Request failed");
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}

fn validate<T: Validate>(request: &T) -> Result<(), BookingError> {
    request
        .validate()
        .map_err(|err| BookingError::Validation(err.to_string()))
}

pub fn create_app<B: BookingBackend, C: Configuration>(
    backend: B,
    receipts: Arc<dyn ReceiptStorage>,
    configuration: C,
) -> Router {
    let state = AppState {
        backend,
        receipts,
        admin_password: configuration.admin_password(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/resources/:id/schedule", get(get_schedule::<B>))
        .route("/businesses/:id/slots", get(get_slots::<B>))
        .route("/businesses/:id/availability", get(get_availability::<B>))
        .route("/businesses/:id/payment-methods", get(get_payment_methods::<B>))
        .route("/reservations", post(create_reservation::<B>))
        .route("/bookings/:id", get(get_booking::<B>))
        .route("/bookings/:id/receipt", post(upload_receipt::<B>));

    let admin = Router::new()
        .route("/admin/resources", post(add_resource::<B>))
        .route("/admin/resources/:id/schedule", put(put_schedule::<B>))
        .route("/admin/resources/:id/pricing-rules", post(post_pricing_rule::<B>))
        .route(
            "/admin/businesses/:id/payment-methods",
            post(post_payment_method::<B>),
        )
        .route("/admin/resources/:id/generate-slots", post(post_generate_slots::<B>))
        .route(
            "/admin/resources/:id/regenerate-slots",
            post(post_regenerate_slots::<B>),
        )
        .route("/admin/bookings", get(list_bookings::<B>))
        .route("/admin/bookings/:id/confirm", post(post_confirm::<B>))
        .route("/admin/bookings/:id/reject", post(post_reject::<B>))
        .route("/admin/bookings/:id/expire", post(post_expire::<B>))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth::<B>));

    Router::new()
        .merge(public)
        .merge(admin)
        .nest_service("/receipts", ServeDir::new(configuration.receipt_dir()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
}

/// `None` without a header. A header that is not visible ASCII never matches,
/// and neither does anything when no password is configured.
fn password_matches(header: Option<&HeaderValue>, expected: &str) -> Option<bool> {
    header.map(|header| match header.to_str() {
        Ok(given) => !expected.is_empty() && given == expected,
        Err(_) => false,
    })
}

async fn admin_auth<B: BookingBackend>(
    State(state): State<AppState<B>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    match password_matches(request.headers().get("x-admin-password"), &state.admin_password) {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            warn!(path = %request.uri().path(), "Admin request with wrong password");
            Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()))
        }
        None => Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string())),
    }
}

async fn get_schedule<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(resource_id): Path<Uuid>,
) -> Result<Json<Vec<WeeklyScheduleRule>>, BookingError> {
    state.backend.resource(resource_id)?;
    Ok(Json(weekly_schedule(&state.backend, resource_id)?))
}

async fn get_slots<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<SlotWithResource>>, BookingError> {
    Ok(Json(state.backend.business_slots(business_id, query.date)?))
}

async fn get_availability<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(business_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
) -> Result<Json<AvailabilityMatrix>, BookingError> {
    let now = Local::now().naive_local();
    Ok(Json(build_matrix(&state.backend, business_id, query.date, now)?))
}

async fn get_payment_methods<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(business_id): Path<Uuid>,
) -> Result<Json<Vec<PaymentMethod>>, BookingError> {
    Ok(Json(state.backend.payment_methods(business_id)?))
}

async fn get_booking<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, BookingError> {
    Ok(Json(state.backend.booking(booking_id)?))
}

fn malformed(field: &str, err: impl std::fmt::Display) -> BookingError {
    BookingError::Validation(format!("Field '{field}' is malformed: {err}"))
}

async fn read_form(mut multipart: Multipart) -> Result<ReservationForm, BookingError> {
    let mut form = ReservationForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| BookingError::Validation(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "receipt" => {
                let file_name = field.file_name().unwrap_or("receipt").to_owned();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| malformed("receipt", err))?;
                form.receipt = Some(ReceiptFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "slot_id" | "user_id" | "amount" => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| malformed(&name, err))?;
                let text = text.trim();
                match name.as_str() {
                    "slot_id" => {
                        form.slot_id = Some(
                            Uuid::parse_str(text).map_err(|err| malformed("slot_id", err))?,
                        )
                    }
                    "user_id" => form.user_id = Some(text.to_owned()),
                    _ if text.is_empty() => {}
                    _ => {
                        form.amount =
                            Some(text.parse::<i64>().map_err(|err| malformed("amount", err))?)
                    }
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Reserves the slot and, when a receipt is attached, submits it right away.
///
/// If the upload fails the booking stays `PendingPayment` and its id is part
/// of the error body so the client can retry on `/bookings/:id/receipt`.
async fn create_reservation<B: BookingBackend>(
    State(state): State<AppState<B>>,
    multipart: Multipart,
) -> Result<Response, BookingError> {
    let form = read_form(multipart).await?;
    let slot_id = form
        .slot_id
        .ok_or_else(|| BookingError::Validation("Field 'slot_id' is missing".into()))?;
    let user_id = form.user_id.unwrap_or_default();

    let booking = reserve(&state.backend, slot_id, &user_id, form.amount, Utc::now())?;

    let Some(receipt) = form.receipt else {
        return Ok(Json(json!({ "success": true, "booking_id": booking.id })).into_response());
    };
    match submit_receipt(
        &state.backend,
        state.receipts.as_ref(),
        booking.id,
        &receipt.file_name,
        receipt.bytes,
    )
    .await
    {
        Ok(booking) => Ok(Json(json!({ "success": true, "booking_id": booking.id })).into_response()),
        Err(err) => {
            let mut body = err.body();
            body["booking_id"] = json!(booking.id);
            Ok((err.status_code(), Json(body)).into_response())
        }
    }
}

async fn upload_receipt<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(booking_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<Booking>, BookingError> {
    let receipt = read_form(multipart)
        .await?
        .receipt
        .ok_or_else(|| BookingError::Validation("Field 'receipt' is missing".into()))?;
    let booking = submit_receipt(
        &state.backend,
        state.receipts.as_ref(),
        booking_id,
        &receipt.file_name,
        receipt.bytes,
    )
    .await?;
    Ok(Json(booking))
}

async fn add_resource<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Json(request): Json<NewResourceRequest>,
) -> Result<(StatusCode, Json<Resource>), BookingError> {
    validate(&request)?;
    let resource = Resource {
        id: Uuid::new_v4(),
        business_id: request.business_id,
        name: request.name.trim().to_owned(),
        field_type: request.field_type,
        base_price: request.base_price,
    };
    state.backend.add_resource(resource.clone())?;
    info!(resource_id = %resource.id, business_id = %resource.business_id, "Resource added");
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn put_schedule<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(resource_id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<Vec<WeeklyScheduleRule>>, BookingError> {
    validate(&request)?;
    let rules = request
        .rules
        .into_iter()
        .map(|day| WeeklyScheduleRule {
            resource_id,
            day_of_week: day.day_of_week,
            is_open: day.is_open,
            open_time: day.open_time,
            close_time: day.close_time,
        })
        .collect();
    Ok(Json(set_weekly_schedule(&state.backend, resource_id, rules)?))
}

async fn post_pricing_rule<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(resource_id): Path<Uuid>,
    Json(request): Json<PricingRuleRequest>,
) -> Result<(StatusCode, Json<PricingRule>), BookingError> {
    validate(&request)?;
    let rule = PricingRule {
        id: Uuid::new_v4(),
        resource_id,
        name: request.name,
        price_override: request.price_override,
        days_of_week: request.days_of_week,
        start_time: request.start_time,
        end_time: request.end_time,
        priority: request.priority,
        created_at: Utc::now(),
    };
    let rule = add_pricing_rule(&state.backend, rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn post_payment_method<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(business_id): Path<Uuid>,
    Json(request): Json<PaymentMethodRequest>,
) -> Result<(StatusCode, Json<PaymentMethod>), BookingError> {
    validate(&request)?;
    let method = PaymentMethod {
        id: Uuid::new_v4(),
        business_id,
        method_type: request.method_type,
        account_name: request.account_name,
        account_number: request.account_number,
    };
    state.backend.add_payment_method(method.clone())?;
    Ok((StatusCode::CREATED, Json(method)))
}

fn generation_request(resource_id: Uuid, request: &GenerateSlotsRequest) -> GenerationRequest {
    GenerationRequest {
        resource_id,
        start_date: request.start_date,
        end_date: request.end_date,
        slot_duration_minutes: request.slot_duration_minutes,
    }
}

async fn post_generate_slots<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(resource_id): Path<Uuid>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, BookingError> {
    validate(&request)?;
    let created = generate_slots(&state.backend, generation_request(resource_id, &request))?;
    Ok(Json(json!({ "created": created })))
}

async fn post_regenerate_slots<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(resource_id): Path<Uuid>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<RegenerationSummary>, BookingError> {
    validate(&request)?;
    let summary = regenerate_slots(
        &state.backend,
        generation_request(resource_id, &request),
        Local::now().naive_local(),
    )?;
    Ok(Json(summary))
}

async fn list_bookings<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Query(filter): Query<BookingFilter>,
) -> Result<Json<Vec<Booking>>, BookingError> {
    Ok(Json(state.backend.bookings(filter.status)?))
}

async fn post_confirm<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, BookingError> {
    Ok(Json(confirm_booking(&state.backend, booking_id)?))
}

async fn post_reject<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, BookingError> {
    Ok(Json(reject_booking(&state.backend, booking_id)?))
}

async fn post_expire<B: BookingBackend>(
    State(state): State<AppState<B>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, BookingError> {
    Ok(Json(expire_booking(&state.backend, booking_id, Utc::now())?))
}
