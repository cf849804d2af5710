use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::{Extension, Json};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::record_error;
use crate::api::middleware::AuthenticatedSubject;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::records::RecordError;
use crate::storage::models::{Movie, Runtime, VersionedRecord};
use crate::AppState;

/// Optional header carrying the version the client last read
const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMovieRequest {
    pub genres: Vec<String>,
    pub runtime: Runtime,
    pub title: String,
    pub year: i32,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovieRequest {
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MovieResponse {
    pub genres: Vec<String>,
    pub id: u64,
    pub runtime: Runtime,
    pub title: String,
    pub version: u32,
    pub year: i32,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_movie(
    State(state): State<Arc<AppState>>,
    Extension(subject): Extension<AuthenticatedSubject>,
    AppJson(req): AppJson<CreateMovieRequest>,
) -> Result<(StatusCode, [(HeaderName, String); 1], Json<JSend<MovieResponse>>), ApiError> {
    let movie = Movie {
        genres: req.genres,
        runtime: req.runtime,
        title: req.title,
        year: req.year,
    };
    validate_movie(&movie)?;

    let record = state.movies.insert(movie).await.map_err(record_error)?;
    tracing::debug!(id = record.id, subject_id = subject.0, "Created movie");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/v1/movies/{}", record.id))],
        JSend::success(record_to_response(&record)),
    ))
}

pub async fn show_movie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<MovieResponse>>, ApiError> {
    let record = state.movies.get(id).await.map_err(record_error)?;
    Ok(JSend::success(record_to_response(&record)))
}

pub async fn update_movie(
    State(state): State<Arc<AppState>>,
    Extension(subject): Extension<AuthenticatedSubject>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    AppJson(req): AppJson<UpdateMovieRequest>,
) -> Result<Json<JSend<MovieResponse>>, ApiError> {
    // Always start from a fresh read; its version guards the write below
    let current = state.movies.get(id).await.map_err(record_error)?;

    if let Some(expected) = expected_version(&headers)? {
        if expected != current.version {
            tracing::debug!(id, expected, current = current.version, "Client holds a stale version");
            return Err(record_error(RecordError::EditConflict));
        }
    }

    let mut movie = current.payload.clone();
    apply_update(&mut movie, req);
    validate_movie(&movie)?;

    let replacement = movie.clone();
    let version = state
        .movies
        .compare_and_swap(id, current.version, move |stored| *stored = replacement)
        .await
        .map_err(record_error)?;

    tracing::debug!(id, version, subject_id = subject.0, "Updated movie");

    Ok(JSend::success(movie_response(id, version, movie)))
}

pub async fn delete_movie(
    State(state): State<Arc<AppState>>,
    Extension(subject): Extension<AuthenticatedSubject>,
    Path(id): Path<u64>,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    state.movies.delete(id).await.map_err(record_error)?;
    tracing::debug!(id, subject_id = subject.0, "Deleted movie");

    Ok(JSend::success(MessageResponse {
        message: "movie successfully deleted".to_string(),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn expected_version(headers: &HeaderMap) -> Result<Option<u32>, ApiError> {
    match headers.get(EXPECTED_VERSION_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|version: &u32| *version > 0)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("X-Expected-Version must be a positive integer")),
    }
}

fn apply_update(movie: &mut Movie, req: UpdateMovieRequest) {
    if let Some(genres) = req.genres {
        movie.genres = genres;
    }
    if let Some(runtime) = req.runtime {
        movie.runtime = runtime;
    }
    if let Some(title) = req.title {
        movie.title = title;
    }
    if let Some(year) = req.year {
        movie.year = year;
    }
}

fn validate_movie(movie: &Movie) -> Result<(), ApiError> {
    let mut problems = Vec::new();

    if movie.title.trim().is_empty() {
        problems.push("title must be provided");
    } else if movie.title.len() > 500 {
        problems.push("title must not be more than 500 bytes long");
    }

    if movie.year < 1888 {
        problems.push("year must be greater than or equal to 1888");
    } else if movie.year > Utc::now().year() {
        problems.push("year must not be in the future");
    }

    if movie.runtime.0 == 0 {
        problems.push("runtime must be a positive integer");
    }

    if movie.genres.is_empty() {
        problems.push("genres must contain at least 1 genre");
    } else if movie.genres.len() > 5 {
        problems.push("genres must not contain more than 5 genres");
    }
    let unique: HashSet<&str> = movie.genres.iter().map(String::as_str).collect();
    if unique.len() != movie.genres.len() {
        problems.push("genres must not contain duplicate values");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ApiError::unprocessable(problems.join("; ")))
    }
}

fn record_to_response(record: &VersionedRecord<Movie>) -> MovieResponse {
    movie_response(record.id, record.version, record.payload.clone())
}

fn movie_response(id: u64, version: u32, movie: Movie) -> MovieResponse {
    MovieResponse {
        genres: movie.genres,
        id,
        runtime: movie.runtime,
        title: movie.title,
        version,
        year: movie.year,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_movie;
    use axum::http::HeaderValue;

    fn fail_message(err: ApiError) -> String {
        match err {
            ApiError::Fail(StatusCode::UNPROCESSABLE_ENTITY, message) => message,
            other => panic!("expected 422 fail, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_movie_passes() {
        validate_movie(&make_movie("Casablanca")).unwrap();
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let movie = Movie {
            genres: vec!["noir".to_string(), "noir".to_string()],
            runtime: Runtime(0),
            title: String::new(),
            year: 1700,
        };
        let message = fail_message(validate_movie(&movie).unwrap_err());

        assert!(message.contains("title must be provided"));
        assert!(message.contains("year must be greater than or equal to 1888"));
        assert!(message.contains("runtime must be a positive integer"));
        assert!(message.contains("duplicate"));
    }

    #[test]
    fn test_validation_limits() {
        let mut movie = make_movie(&"x".repeat(501));
        movie.year = Utc::now().year() + 1;
        movie.genres = (0..6).map(|i| format!("g{i}")).collect();
        let message = fail_message(validate_movie(&movie).unwrap_err());

        assert!(message.contains("500 bytes"));
        assert!(message.contains("future"));
        assert!(message.contains("more than 5 genres"));
    }

    #[test]
    fn test_apply_update_keeps_absent_fields() {
        let mut movie = make_movie("Casablanca");
        apply_update(
            &mut movie,
            UpdateMovieRequest {
                year: Some(1942),
                ..Default::default()
            },
        );
        assert_eq!(movie.title, "Casablanca");
        assert_eq!(movie.year, 1942);
        assert_eq!(movie.runtime, Runtime(110));
    }

    #[test]
    fn test_expected_version_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(expected_version(&headers).unwrap(), None);

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("3"));
        assert_eq!(expected_version(&headers).unwrap(), Some(3));

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("three"));
        assert!(expected_version(&headers).is_err());

        // Versions start at 1
        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("0"));
        assert!(expected_version(&headers).is_err());
        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("-1"));
        assert!(expected_version(&headers).is_err());
    }

    #[test]
    fn test_update_request_rejects_unknown_fields() {
        let err = serde_json::from_str::<UpdateMovieRequest>(r#"{"director":"Curtiz"}"#);
        assert!(err.is_err());

        let req: UpdateMovieRequest =
            serde_json::from_str(r#"{"runtime":"102 mins"}"#).unwrap();
        assert_eq!(req.runtime, Some(Runtime(102)));
    }
}
