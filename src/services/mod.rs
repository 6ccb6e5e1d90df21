/// OpenAPI documentation generation.
pub mod documentation;
/// Daily live game night reconciliation.
pub mod game_night_reconciler;
/// Health check service.
pub mod health_service;
/// Player rating aggregation.
pub mod rating_aggregator;
/// Change-feed driven rating aggregation.
pub mod rating_watcher;
/// Daily timer driving the reconciler.
pub mod scheduler;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
