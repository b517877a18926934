//! HTTP surface for Siren: template CRUD, receiver onboarding and broadcast
//! dispatch, all behind a per-IP rate limiter.

pub mod middleware;
pub mod routes;
pub mod state;
