use serde::Serialize;

/// Uniform JSON envelope for route handlers: `{ "success": true, "data": ... }`
/// on the happy path, `{ "success": false, "error": "..." }` otherwise.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse { success: true, data: Some(data), error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ApiResponse { success: false, data: None, error: Some(message.into()) }
    }
}
