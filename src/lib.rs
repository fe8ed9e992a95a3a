// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MaturaMate: learner progress service
//!
//! This crate keeps one learner's progress (completed exercises, saved
//! exercises, completed simulations, streak and AI credits) in memory,
//! loads it from Firestore when the learner signs in, and applies
//! optimistic updates that roll back if persistence fails.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::{ProgressSession, SessionResolver};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub session: Arc<ProgressSession>,
    pub resolver: SessionResolver,
}
