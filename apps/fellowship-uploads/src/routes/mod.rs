//! API routes

pub mod upload;

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    dto::upload::{ErrorResponse, UploadFileRequest, UploadFileResponse},
    handlers, AppState,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload::upload_handler,
        health_handler
    ),
    components(
        schemas(UploadFileRequest, UploadFileResponse, ErrorResponse)
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "uploads", description = "File upload endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    info(
        title = "Fellowship Uploads API",
        version = "0.1.0",
        description = "Uploads member files, masking replication lag between accounts and storage",
        contact(
            name = "Fellowship Team"
        )
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let max_file_size = state.upload_config.max_file_size;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(upload::routes(max_file_size))
        .route("/health", axum::routing::get(health_handler))
        .with_state(state)
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = String)
    ),
    tag = "health"
)]
async fn health_handler() -> &'static str {
    "OK"
}
