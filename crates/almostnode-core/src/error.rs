//! The error taxonomy from spec §7, realized as a real enum instead of
//! ad hoc strings, the way the teacher's crates lean on `thiserror` at
//! a module's public boundary while using `anyhow::Result` internally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no route matched")]
    NotFound,

    #[error("API route not found")]
    ApiRouteNotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    HandlerError(String),

    #[error("API handler timeout")]
    HandlerTimeout,

    #[error("transform failed: {0}")]
    TransformError(String),

    #[error("npm bundle failed for '{specifier}': {message}")]
    BundleError { specifier: String, message: String },

    #[error("module resolution failed: {0}")]
    ModuleResolutionError(String),
}

impl CoreError {
    /// The HTTP status code the dispatcher should answer with (spec §7,
    /// §6.3). `TransformError` is deliberately not listed here: the
    /// dispatcher special-cases it to a 200 with `X-Transform-Error`
    /// so a failing page module never breaks the dynamic importer.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound | CoreError::ApiRouteNotFound => 404,
            CoreError::MethodNotAllowed => 405,
            CoreError::HandlerError(_) => 500,
            CoreError::HandlerTimeout => 500,
            CoreError::TransformError(_) => 200,
            CoreError::BundleError { .. } => 500,
            CoreError::ModuleResolutionError(_) => 500,
        }
    }

    /// JSON body matching the literal shapes spec §7/§8 call for.
    pub fn json_body(&self) -> serde_json::Value {
        match self {
            CoreError::ApiRouteNotFound => {
                serde_json::json!({ "error": "API route not found" })
            }
            CoreError::HandlerError(msg) => serde_json::json!({ "error": msg }),
            CoreError::HandlerTimeout => {
                serde_json::json!({ "error": "API handler timeout" })
            }
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

/// `ModuleResolutionError`s raised from `require()` inside a handler
/// propagate as `HandlerError` per spec §7's propagation policy.
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::HandlerError(err.to_string())
    }
}
