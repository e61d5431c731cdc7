use axum::body::to_bytes;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common_http_errors::ApiError;

#[tokio::test]
async fn unauthorized_shape() {
    let err = ApiError::unauthorized("Invalid token");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "Invalid token");
    assert_eq!(body["code"], 401);
    assert!(body.get("retry_after").is_none());
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let err = ApiError::too_many_requests("Rate limit exceeded", 60);
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers().get("retry-after").unwrap(), "60");
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["retry_after"], 60);
    assert_eq!(body["code"], 429);
}

#[tokio::test]
async fn payload_too_large_shape() {
    let err = ApiError::payload_too_large("Request body too large");
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 413);
}

#[tokio::test]
async fn content_type_is_json() {
    let resp = ApiError::service_unavailable("Database temporarily unavailable").into_response();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let content_type = resp.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("application/json"));
}
