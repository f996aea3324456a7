//! HTTP control API
//!
//! Command front-ends drive the player through these routes; permission
//! checks happen before a request gets here.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
