//! Success envelope shared by all handlers

use axum::Json;
use serde::Serialize;

/// `{"success": true, "data": ...}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Always true; failures go through [`ApiError`](crate::ApiError)
    pub success: bool,
    /// Payload
    pub data: T,
}

/// Wrap a payload in a success envelope
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}
