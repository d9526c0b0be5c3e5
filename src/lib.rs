//! Smart-mirror photo try-out.
//!
//! A try-out job moves `pending → waiting_photo → processing → completed | failed`
//! as three independent actors act on it: the API server (job creation and
//! clothing submission), the capture station at the mirror (photo, claim,
//! generation) and the result display (presentation and closet confirmation).
//! They coordinate only through the job store and its change feed.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod tryout;
