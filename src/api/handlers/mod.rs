mod health;
mod movies;
mod tokens;

use crate::api::response::ApiError;
use crate::records::RecordError;

pub use health::healthcheck;
pub use movies::{create_movie, delete_movie, show_movie, update_movie};
pub use tokens::{
    activate, create_activation_token, create_authentication_token, revoke_authentication_tokens,
};

const SERVER_ERROR_MESSAGE: &str =
    "the server encountered an error and could not process your request";

/// Map a RecordError to an ApiError
fn record_error(e: RecordError) -> ApiError {
    match e {
        RecordError::NotFound => ApiError::not_found("the requested resource could not be found"),
        RecordError::EditConflict => ApiError::conflict(
            "unable to update the record due to an edit conflict, please try again",
        ),
        RecordError::Storage(e) => {
            tracing::error!(error = %e, "Record storage failure");
            ApiError::internal(SERVER_ERROR_MESSAGE)
        }
    }
}
