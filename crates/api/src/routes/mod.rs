//! HTTP route handlers

pub mod alerts;
pub mod cameras;
pub mod stream;
