//! HTTP contract tests for the reqwest backend client
//!
//! Tests cover:
//! - Email lookup path encoding and `{exists}` decoding
//! - Transaction id conflicts returned as `{error}`
//! - Multipart extraction and submission bodies
//! - Idempotency-Key header on submission
//! - Retry of 5xx responses on idempotent calls
//! - A full donation session over HTTP

#![cfg(feature = "http-backend")]

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use donation_intake::backend::{DonationApiClient, DonationApiConfig, GatewayError};
use donation_intake::extraction::TransactionExtractor;
use donation_intake::gallery::GallerySource;
use donation_intake::submission::{SubmissionRequest, SubmissionTransport};
use donation_intake::uniqueness::{TransactionIdCheck, UniquenessAuthority};
use donation_intake::{Backends, CampaignConfig, DonationSession, Field, PaymentFile, Stage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct RecordedSubmission {
    fields: HashMap<String, String>,
    file_name: Option<String>,
    file_bytes: Vec<u8>,
    idempotency_key: Option<String>,
}

#[derive(Clone, Default)]
struct MockState {
    email_lookups: Arc<Mutex<Vec<String>>>,
    submissions: Arc<Mutex<Vec<RecordedSubmission>>>,
    gallery_failures: Arc<Mutex<u32>>,
}

async fn check_email(State(state): State<MockState>, Path(email): Path<String>) -> Json<Value> {
    state.email_lookups.lock().unwrap().push(email.clone());
    Json(json!({ "exists": email == "taken@example.com" }))
}

async fn check_transaction_id(Json(body): Json<Value>) -> Response {
    if body["transactionId"] == "USED1" {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "This transaction ID has already been used." })),
        )
            .into_response()
    } else {
        Json(json!({})).into_response()
    }
}

async fn extract_transaction_id(mut multipart: Multipart) -> Response {
    let mut file_name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("file") {
            file_name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await.unwrap();
        }
    }

    if file_name.contains("dup") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "This transaction ID has already been used." })),
        )
            .into_response();
    }
    Json(json!({
        "paymentApp": "PhonePe",
        "appUIType": "Standard",
        "transactionId": "T9001",
        "message": "Transaction ID extracted"
    }))
    .into_response()
}

async fn donate(
    State(state): State<MockState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut recorded = RecordedSubmission {
        idempotency_key: headers
            .get("Idempotency-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ..RecordedSubmission::default()
    };
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name() {
            recorded.file_name = Some(file_name.to_string());
            recorded.file_bytes = field.bytes().await.unwrap().to_vec();
        } else {
            let text = field.text().await.unwrap();
            recorded.fields.insert(name, text);
        }
    }

    let taken = recorded.fields.get("donorEmail").map(String::as_str) == Some("taken@example.com");
    state.submissions.lock().unwrap().push(recorded);
    if taken {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Email already exists" })),
        )
            .into_response();
    }
    Json(json!({ "success": true })).into_response()
}

async fn gallery(State(state): State<MockState>) -> Response {
    let mut failures = state.gallery_failures.lock().unwrap();
    if *failures > 0 {
        *failures -= 1;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!([
        { "id": 1, "src": "/uploads/drive.jpg", "caption": "Lunch drive" },
        { "id": "2", "src": "/uploads/dogs.jpg", "caption": "Shelter visit" }
    ]))
    .into_response()
}

async fn spawn_backend(state: MockState) -> String {
    let app = Router::new()
        .route("/api/straydog/check-email/{email}", get(check_email))
        .route("/check-transaction-id", post(check_transaction_id))
        .route("/extract-transaction-id", post(extract_transaction_id))
        .route("/api/straydog/donate", post(donate))
        .route("/api/gallery", get(gallery))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str, max_retries: u32) -> DonationApiClient {
    DonationApiClient::new(
        DonationApiConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            max_retries,
        },
        &CampaignConfig::stray_dog(),
    )
    .expect("client should build")
}

#[tokio::test]
async fn test_email_lookup_uses_campaign_path() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let client = client(&base_url, 0);

    assert!(client.check_email_unique("asha@example.com").await.unwrap());
    assert!(!client.check_email_unique("taken@example.com").await.unwrap());
    assert_eq!(
        *state.email_lookups.lock().unwrap(),
        vec!["asha@example.com".to_string(), "taken@example.com".to_string()]
    );
}

#[tokio::test]
async fn test_transaction_id_conflict_is_reported() {
    let base_url = spawn_backend(MockState::default()).await;
    let client = client(&base_url, 0);

    assert_eq!(
        client.check_transaction_id_unique("T1").await.unwrap(),
        TransactionIdCheck::Ok
    );
    assert_eq!(
        client.check_transaction_id_unique("USED1").await.unwrap(),
        TransactionIdCheck::Conflict("This transaction ID has already been used.".to_string())
    );
}

#[tokio::test]
async fn test_extraction_reply_is_decoded() {
    let base_url = spawn_backend(MockState::default()).await;
    let client = client(&base_url, 0);

    let reply = client
        .extract(&PaymentFile::from_named_bytes("receipt.jpg", vec![1, 2, 3]))
        .await
        .unwrap();
    assert!(reply.accepted);
    assert_eq!(reply.body.payment_app.as_deref(), Some("PhonePe"));
    assert_eq!(reply.body.transaction_id.as_deref(), Some("T9001"));

    let rejected = client
        .extract(&PaymentFile::from_named_bytes("dup.jpg", vec![1]))
        .await
        .unwrap();
    assert!(!rejected.accepted);
    assert_eq!(
        rejected.body.error.as_deref(),
        Some("This transaction ID has already been used.")
    );
}

#[tokio::test]
async fn test_submission_sends_fields_file_and_idempotency_key() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let client = client(&base_url, 0);

    let request = SubmissionRequest {
        path: "/api/straydog/donate".to_string(),
        fields: vec![
            ("donorName".to_string(), "Asha Rao".to_string()),
            ("donorEmail".to_string(), "taken@example.com".to_string()),
            ("uniqueId".to_string(), "key-123".to_string()),
        ],
        file: PaymentFile::from_named_bytes("Asha Rao_60_PhonePe.jpg", vec![7, 7]),
        idempotency_key: "key-123".to_string(),
    };

    let reply = client.submit(&request).await.unwrap();
    assert!(!reply.accepted);
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body.error.as_deref(), Some("Email already exists"));

    let submissions = state.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let recorded = &submissions[0];
    assert_eq!(recorded.idempotency_key.as_deref(), Some("key-123"));
    assert_eq!(recorded.fields["donorName"], "Asha Rao");
    assert_eq!(recorded.fields["uniqueId"], "key-123");
    assert_eq!(recorded.file_name.as_deref(), Some("Asha Rao_60_PhonePe.jpg"));
    assert_eq!(recorded.file_bytes, vec![7, 7]);
}

#[tokio::test]
async fn test_gallery_retries_server_errors() {
    let state = MockState::default();
    *state.gallery_failures.lock().unwrap() = 1;
    let base_url = spawn_backend(state.clone()).await;

    let photos = client(&base_url, 1).fetch_gallery().await.unwrap();
    assert_eq!(photos.len(), 2);
    assert_eq!(photos[0].id, "1");
    assert_eq!(photos[1].caption, "Shelter visit");

    *state.gallery_failures.lock().unwrap() = 1;
    let err = client(&base_url, 0).fetch_gallery().await.unwrap_err();
    assert!(matches!(err, GatewayError::StatusError { status: 503, .. }));
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let client = client("http://127.0.0.1:1", 0);
    let err = client.check_email_unique("asha@example.com").await.unwrap_err();
    assert!(matches!(err, GatewayError::NetworkError { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_full_donation_over_http() {
    let state = MockState::default();
    let base_url = spawn_backend(state.clone()).await;
    let backend = Arc::new(client(&base_url, 0));
    let mut session = DonationSession::new(
        CampaignConfig::stray_dog(),
        Backends::shared(backend),
        Duration::from_secs(5),
    );

    for (field, value) in [
        (Field::DonorName, "Asha Rao"),
        (Field::DonorEmail, "asha@example.com"),
        (Field::PhoneNumber, "9876543210"),
        (Field::ParcelName, "Dog food"),
        (Field::FoodCount, "3"),
        (Field::Birthdate, "1990-04-12"),
    ] {
        session.set_field(field, value).unwrap();
    }
    session.settle().await;
    session.confirm().unwrap();

    session
        .select_file(PaymentFile::from_named_bytes("receipt.jpg", vec![1, 2]))
        .unwrap();
    session.settle().await;
    assert_eq!(session.controller().draft().transaction_id, "T9001");

    let code = session.controller().captcha_code().unwrap().to_string();
    session.set_field(Field::Captcha, &code).unwrap();
    session.submit().unwrap();
    session.settle().await;

    assert_eq!(session.controller().stage(), Stage::Done);
    let submissions = state.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let recorded = &submissions[0];
    assert_eq!(recorded.fields["totalAmount"], "60");
    assert_eq!(recorded.fields["transactionId"], "T9001");
    assert_eq!(
        recorded.idempotency_key.as_ref(),
        recorded.fields.get("uniqueId")
    );
    assert_eq!(recorded.file_name.as_deref(), Some("Asha Rao_60_PhonePe.jpg"));
}
