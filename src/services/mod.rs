/// Periodic media cache eviction.
pub mod cache_maintenance;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Media lookups, cache maintenance and song search.
pub mod media_service;
/// Session lifecycle and round orchestration.
pub mod session_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
