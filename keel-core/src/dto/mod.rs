//! Data Transfer Objects for the event ingestion API
//!
//! Shared by the server (which produces them) and the client (which
//! consumes them).

pub mod event;
pub mod run;
