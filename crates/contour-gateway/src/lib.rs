//! Contour Gateway Library
//!
//! HTTP surface for the compute relay: a single `POST /compute` route that
//! forwards the request body to the compute executable and relays its
//! result. Exposed as a library so integration tests can drive the router
//! in-process.

pub mod routes;
