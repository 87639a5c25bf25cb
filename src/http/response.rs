//! Response envelope and business codes.
//!
//! # Responsibilities
//! - Uniform JSON body: `{code, message, data, detail, trace_id}`
//! - Attach the business code to the response so the trace can read it
//!
//! # Business Codes
//! `10aabbcc`-style numbering: `10001` params error, `10002` internal
//! error, `10003` too many requests. Zero means success.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Business outcome, stored in response extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessCode {
    pub code: i32,
    pub message: String,
}

impl BusinessCode {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    pub data: T,
    pub detail: Vec<String>,
    pub trace_id: String,
}

/// 200 with business code 0.
pub fn success<T: Serialize>(trace_id: impl Into<String>, data: T) -> Response {
    let body = ApiResponse {
        code: 0,
        message: "success".to_string(),
        data,
        detail: Vec::new(),
        trace_id: trace_id.into(),
    };
    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.extensions_mut().insert(BusinessCode::new(0, "success"));
    response
}

/// Handler error carrying an HTTP status and a business code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("code: {code} message: {message} detail: {detail:?}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub message: String,
    pub detail: Vec<String>,
    pub trace_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            detail: Vec::new(),
            trace_id: String::new(),
        }
    }

    pub fn params() -> Self {
        Self::new(StatusCode::BAD_REQUEST, 10001, "params error")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, 10002, "internal error")
    }

    pub fn too_many_requests() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, 10003, "too many requests")
    }

    /// Copy with one more detail line.
    pub fn with_detail(&self, detail: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.detail.push(detail.into());
        copy
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let business = BusinessCode::new(self.code, self.message.clone());
        let body = ApiResponse {
            code: self.code,
            message: self.message,
            data: serde_json::json!({}),
            detail: self.detail,
            trace_id: self.trace_id,
        };
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(business);
        response
    }
}
