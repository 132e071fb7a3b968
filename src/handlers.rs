//! HTTP endpoints implemented by the facilitator.
//!
//! Protocol-critical endpoints (`/verify`, `/settle`) plus discovery
//! (`/supported`, `/fee-payer`), requirement generation, and a demo
//! protected resource that exercises the full 402 round trip. All handlers
//! are pure marshalling: decoding, verification, and settlement live in
//! [`crate::facilitator`]; no failure escapes as anything but a JSON body.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::instrument;

use crate::facilitator::{RequirementsError, SolanaFacilitator};
use crate::types::{
    ErrorResponse, FeePayerResponse, Network, PaymentRequiredResponse, PaymentRequirements,
    RequirementsRequest, RequirementsResponse, Scheme, SettleRequest, SettleResponse,
    SupportedKind, SupportedResponse, VerifyRequest,
};
use crate::util::b64;

/// Request header carrying the base64-encoded partially-signed transaction.
pub const X_PAYMENT: &str = "x-payment";
/// Response header carrying the base64-encoded JSON settlement receipt.
pub const X_PAYMENT_RESPONSE: HeaderName = HeaderName::from_static("x-payment-response");

/// Price of the demo protected resource.
const DEMO_PRICE: &str = "$0.01";

#[derive(Clone)]
pub struct AppState {
    /// `None` when no fee-payer key is configured; payment endpoints then
    /// answer 503 while discovery stays available.
    pub facilitator: Option<Arc<SolanaFacilitator>>,
    pub network: Network,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/v1/x402/supported", get(get_supported))
        .route("/v1/x402/requirements", post(post_requirements))
        .route("/v1/x402/verify", post(post_verify))
        .route("/v1/x402/settle", post(post_settle))
        .route("/v1/x402/fee-payer", get(get_fee_payer))
        .route("/v1/x402/demo/protected", get(get_demo_protected))
}

/// `GET /`: service banner with an endpoint map.
#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "supported": "GET /v1/x402/supported",
            "requirements": "POST /v1/x402/requirements",
            "verify": "POST /v1/x402/verify",
            "settle": "POST /v1/x402/settle",
            "feePayer": "GET /v1/x402/fee-payer",
            "demo": "GET /v1/x402/demo/protected",
        }
    }))
}

#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    Json(json!({"status": "healthy", "service": env!("CARGO_PKG_NAME")}))
}

/// `GET /v1/x402/supported`: payment kinds this facilitator settles.
#[instrument(skip_all)]
async fn get_supported(State(state): State<AppState>) -> impl IntoResponse {
    Json(SupportedResponse {
        kinds: vec![SupportedKind {
            scheme: Scheme::Exact,
            network: state.network,
        }],
    })
}

/// `GET /v1/x402/fee-payer`: the address clients must name as fee payer.
#[instrument(skip_all)]
async fn get_fee_payer(State(state): State<AppState>) -> Response {
    let facilitator = match require_facilitator(&state) {
        Ok(facilitator) => facilitator,
        Err(response) => return response,
    };
    Json(FeePayerResponse {
        fee_payer: facilitator.fee_payer(),
        network: facilitator.network(),
    })
    .into_response()
}

/// `POST /v1/x402/requirements`: turn a human price into a payment challenge
/// a resource server can return with its 402s.
#[instrument(skip_all)]
async fn post_requirements(
    State(state): State<AppState>,
    body: Result<Json<RequirementsRequest>, JsonRejection>,
) -> Response {
    let facilitator = match require_facilitator(&state) {
        Ok(facilitator) => facilitator,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    match facilitator.payment_requirements(request) {
        Ok(requirements) => Json(RequirementsResponse {
            payment_required: PaymentRequiredResponse::new(vec![requirements], ""),
        })
        .into_response(),
        Err(error @ (RequirementsError::Price(_) | RequirementsError::PayToIsFeePayer)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response(),
    }
}

/// `POST /v1/x402/verify`: check a payment header against requirements.
/// Verification outcomes, including rejections, are 200s; only a missing
/// facilitator key or an unreadable body changes the status.
#[instrument(skip_all)]
async fn post_verify(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let facilitator = match require_facilitator(&state) {
        Ok(facilitator) => facilitator,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    let response = facilitator.verify(&request.payment_header, &request.payment_requirements);
    Json(response).into_response()
}

/// `POST /v1/x402/settle`: verify, co-sign, and submit a payment.
/// Chain rejections come back as `success: false` bodies; only an
/// unreachable RPC endpoint is a 503.
#[instrument(skip_all)]
async fn post_settle(
    State(state): State<AppState>,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> Response {
    let facilitator = match require_facilitator(&state) {
        Ok(facilitator) => facilitator,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    match facilitator
        .settle(&request.payment_header, &request.payment_requirements)
        .await
    {
        Ok(settlement) => Json(SettleResponse::settled(
            settlement.tx_hash,
            settlement.network,
            settlement.payer,
        ))
        .into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "Settlement failed");
            let status = if error.is_retriable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (status, Json(SettleResponse::failed(error.to_string()))).into_response()
        }
    }
}

/// `GET /v1/x402/demo/protected`: a paid resource exercising the full
/// x402 exchange. Without an `X-PAYMENT` header it answers 402 with the
/// challenge; with one it settles and unlocks the body, echoing the
/// settlement receipt in `X-PAYMENT-RESPONSE`.
#[instrument(skip_all)]
async fn get_demo_protected(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let facilitator = match require_facilitator(&state) {
        Ok(facilitator) => facilitator,
        Err(response) => return response,
    };
    let requirements = facilitator.demo_requirements(RequirementsRequest {
        price: DEMO_PRICE.to_string(),
        pay_to: facilitator.fee_payer(),
        resource: url::Url::parse("https://example.com/v1/x402/demo/protected")
            .expect("valid demo resource url"),
        description: Some("Demo protected resource".to_string()),
        timeout_seconds: None,
    });

    let Some(payment_header) = headers.get(X_PAYMENT) else {
        return payment_required(vec![requirements], "");
    };
    let Ok(payment_header) = payment_header.to_str() else {
        return payment_required(vec![requirements], "X-PAYMENT header is not a valid string");
    };

    match facilitator.settle(payment_header, &requirements).await {
        Ok(settlement) => {
            let receipt = SettleResponse::settled(
                settlement.tx_hash.clone(),
                settlement.network,
                settlement.payer,
            );
            let mut response = Json(json!({
                "message": "Payment accepted",
                "secretData": "Paid content unlocked by x402 settlement",
                "txHash": settlement.tx_hash,
            }))
            .into_response();
            if let Ok(value) = HeaderValue::from_str(&b64::encode(
                serde_json::to_vec(&receipt).unwrap_or_default(),
            )) {
                response.headers_mut().insert(X_PAYMENT_RESPONSE, value);
            }
            response
        }
        Err(error) if error.is_retriable() => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response(),
        Err(error) => payment_required(vec![requirements], error.to_string()),
    }
}

fn require_facilitator(state: &AppState) -> Result<Arc<SolanaFacilitator>, Response> {
    state.facilitator.clone().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "facilitator not configured".to_string(),
            }),
        )
            .into_response()
    })
}

fn payment_required(accepts: Vec<PaymentRequirements>, error: impl Into<String>) -> Response {
    (
        StatusCode::PAYMENT_REQUIRED,
        Json(PaymentRequiredResponse::new(accepts, error)),
    )
        .into_response()
}

fn bad_request(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: rejection.body_text(),
        }),
    )
        .into_response()
}
