// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod auth;
pub mod loader;
pub mod resolver;
pub mod session;

pub use auth::{AuthEvent, AuthProvider, AuthSession, GoTrueAuth, StaticAuth};
pub use loader::{LoadedProgress, ProgressLoader};
pub use resolver::SessionResolver;
pub use session::{CreditSpend, LoadOutcome, ProgressSession, SessionStatus, SessionView};
