//! Validating extractors for API routes
//!
//! Every route lives under `/scopes/{scope_id}`; the scope and any trailing
//! trace or request id are checked before a handler runs. All rejections
//! answer 400 with the shared error body.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use validator::Validate;

use super::types::ApiError;

/// Maximum length for trace and request ids
pub const MAX_ID_LENGTH: usize = 256;

const MAX_SCOPE_ID_LENGTH: usize = 64;

/// 1-64 chars, alphanumeric plus dash and underscore
pub fn is_valid_scope_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SCOPE_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ID_LENGTH
}

/// Raw parameters of any scoped route
#[derive(Debug, Deserialize)]
struct ScopedParams {
    scope_id: String,
    #[serde(alias = "trace_id", alias = "request_id")]
    id: Option<String>,
}

impl ScopedParams {
    async fn extract<S: Send + Sync>(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, ValidationRejection> {
        let Path(params) = Path::<Self>::from_request_parts(parts, state)
            .await
            .map_err(ValidationRejection::Path)?;
        if !is_valid_scope_id(&params.scope_id) {
            return Err(ValidationRejection::InvalidScopeId);
        }
        Ok(params)
    }

    fn id(&mut self, name: &'static str) -> Result<String, ValidationRejection> {
        self.id
            .take()
            .filter(|id| is_valid_id(id))
            .ok_or(ValidationRejection::InvalidId(name))
    }
}

/// `scope_id` path parameter
#[derive(Debug)]
pub struct ScopePath {
    pub scope_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for ScopePath {
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let params = ScopedParams::extract(parts, state).await?;
        Ok(Self {
            scope_id: params.scope_id,
        })
    }
}

/// `scope_id` and `trace_id` path parameters
#[derive(Debug)]
pub struct TracePath {
    pub scope_id: String,
    pub trace_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for TracePath {
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let mut params = ScopedParams::extract(parts, state).await?;
        let trace_id = params.id("trace_id")?;
        Ok(Self {
            scope_id: params.scope_id,
            trace_id,
        })
    }
}

/// `scope_id` and `request_id` path parameters
#[derive(Debug)]
pub struct DebugPath {
    pub scope_id: String,
    pub request_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for DebugPath {
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let mut params = ScopedParams::extract(parts, state).await?;
        let request_id = params.id("request_id")?;
        Ok(Self {
            scope_id: params.scope_id,
            request_id,
        })
    }
}

#[derive(Debug)]
pub enum ValidationRejection {
    Path(PathRejection),
    InvalidScopeId,
    /// Trailing id missing or too long, by parameter name
    InvalidId(&'static str),
    Query(QueryRejection),
    Json(JsonRejection),
    Validation(validator::ValidationErrors),
}

impl From<ValidationRejection> for ApiError {
    fn from(rejection: ValidationRejection) -> Self {
        match rejection {
            ValidationRejection::Path(r) => Self::bad_request("PATH_PARSE_ERROR", r.body_text()),
            ValidationRejection::InvalidScopeId => Self::bad_request(
                "INVALID_SCOPE_ID",
                format!(
                    "Invalid scope_id: must be 1-{MAX_SCOPE_ID_LENGTH} alphanumeric chars, dashes, or underscores"
                ),
            ),
            ValidationRejection::InvalidId(name) => Self::bad_request(
                format!("INVALID_{}", name.to_uppercase()),
                format!("Invalid {name}: must be 1-{MAX_ID_LENGTH} characters"),
            ),
            ValidationRejection::Query(r) => Self::bad_request("QUERY_PARSE_ERROR", r.body_text()),
            ValidationRejection::Json(r) => Self::bad_request("JSON_PARSE_ERROR", r.body_text()),
            ValidationRejection::Validation(errors) => {
                Self::bad_request("VALIDATION_ERROR", validation_message(&errors))
            }
        }
    }
}

impl IntoResponse for ValidationRejection {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match e.message {
                Some(ref m) => m.to_string(),
                None => format!("{field}: {}", e.code),
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

/// Query string deserialized and checked with `validator`
#[derive(Debug)]
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(ValidationRejection::Query)?;
        value.validate().map_err(ValidationRejection::Validation)?;
        Ok(Self(value))
    }
}

/// JSON body deserialized and checked with `validator`
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ValidationRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(ValidationRejection::Json)?;
        value.validate().map_err(ValidationRejection::Validation)?;
        Ok(Self(value))
    }
}
