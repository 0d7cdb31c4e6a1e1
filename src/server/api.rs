use crate::error::PersistenceError;
use crate::models::call::CallRecord;
use crate::models::onboarding::{ OnboardingResponse, Question };
use crate::service::CallService;
use std::error::Error;
use std::net::SocketAddr;
use axum::{
    routing::get,
    Router,
    Json,
    extract::{ State, Path },
    response::{ IntoResponse, Response },
    http::StatusCode,
};
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

/// Onboarding document plus the first question still unanswered.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OnboardingStatus {
    #[serde(flatten)]
    onboarding: OnboardingResponse,
    next_question: Option<Question>,
}

pub struct ApiError(PersistenceError);

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API request failed: {}", self.0);
        let code = match self.0 {
            PersistenceError::CallNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(ErrorResponse { success: false, message: self.0.to_string() })).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    service: CallService,
}

fn router(service: CallService) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/calls/{user_id}", get(call_history_handler))
        .route("/api/onboarding/{user_id}", get(onboarding_handler))
        .layer(cors)
        .with_state(AppState { service })
}

pub async fn start_http_server(
    http_port: u16,
    service: CallService
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(service);
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    error!("HTTP server error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            }
        }
    });

    info!("HTTP server started");
    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn call_history_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>
) -> Result<Json<Vec<CallRecord>>, ApiError> {
    Ok(Json(state.service.call_history(&user_id).await?))
}

async fn onboarding_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>
) -> Result<Json<OnboardingStatus>, ApiError> {
    let onboarding = state.service.onboarding(&user_id).await?;
    Ok(Json(OnboardingStatus {
        next_question: onboarding.next_question(),
        onboarding,
    }))
}
