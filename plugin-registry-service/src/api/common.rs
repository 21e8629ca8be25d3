use plugin_registry_common::SafeDisplay;
use poem_openapi::Object;
use poem_openapi::payload::Json;

use crate::api::hypermedia::ApiLink;
use crate::service::RegistryError;

#[derive(Debug, Clone, Object)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Object)]
pub struct ErrorsBody {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, poem_openapi::ApiResponse)]
pub enum ApiError {
    /// Invalid request, returning with a list of issues detected in the request
    #[oai(status = 400)]
    BadRequest(Json<ErrorsBody>),
    /// Resource not found
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    /// Resource already exists
    #[oai(status = 409)]
    AlreadyExists(Json<ErrorBody>),
    /// Internal server error
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(Json(ErrorsBody {
            errors: vec![message.into()],
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::InternalError(Json(ErrorBody {
            error: message.into(),
        }))
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        match &error {
            RegistryError::InvalidRequest(_) | RegistryError::InvalidFilter(_) => {
                ApiError::BadRequest(Json(ErrorsBody {
                    errors: vec![error.to_safe_string()],
                }))
            }
            RegistryError::NotFound(_) => ApiError::NotFound(Json(ErrorBody {
                error: error.to_safe_string(),
            })),
            RegistryError::AlreadyExists(_) => ApiError::AlreadyExists(Json(ErrorBody {
                error: error.to_safe_string(),
            })),
            RegistryError::InternalRepoError(_) | RegistryError::Internal(_) => {
                ApiError::InternalError(Json(ErrorBody {
                    error: error.to_safe_string(),
                }))
            }
        }
    }
}

/// Link generation for a registered resource kind cannot fail; a missing
/// generator is a wiring error.
pub fn require_link(link: Option<ApiLink>) -> ApiResult<ApiLink> {
    link.ok_or_else(|| ApiError::internal("Missing link generator"))
}
