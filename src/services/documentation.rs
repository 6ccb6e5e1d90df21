use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the league jobs service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::jobs::reconcile_live_game_nights,
        crate::routes::jobs::aggregate_player_rating,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::jobs::ReconcileResponse,
            crate::dto::jobs::PlayerAggregateResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "jobs", description = "Externally triggered background jobs"),
    )
)]
pub struct ApiDoc;
