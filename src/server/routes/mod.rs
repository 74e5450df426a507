pub mod extract;
pub mod inference;
pub mod info;

use crate::backend::BackendKind;
use crate::error::ApiError;

/// Map a URL backend segment to a [`BackendKind`], or a 400.
pub(crate) fn parse_backend(segment: &str) -> Result<BackendKind, ApiError> {
    BackendKind::parse(segment)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid model type: {segment}")))
}
