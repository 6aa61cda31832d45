//! HTTP API handlers for siteplan-expansion
//!
//! Jobs run in the background; callers submit, then poll status and fetch
//! results out-of-band. `GET /events` streams job events as SSE.

pub mod health;
pub mod jobs;
pub mod sites;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sites::site_routes;
pub use sse::event_stream;
