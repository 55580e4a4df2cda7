//! Request handlers for the web API.

pub mod health;
pub mod jobs;
pub mod queues;
