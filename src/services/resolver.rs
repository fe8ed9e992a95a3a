// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session resolver.
//!
//! Bridges the auth collaborator and the progress session: resolves the
//! initial session at startup, then follows sign-in and sign-out events
//! for as long as the resolver lives.

use crate::error::Result;
use crate::models::Identity;
use crate::services::auth::{AuthEvent, AuthProvider, AuthSession};
use crate::services::session::ProgressSession;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub struct SessionResolver {
    auth: Arc<dyn AuthProvider>,
    session: Arc<ProgressSession>,
    listener: JoinHandle<()>,
}

impl SessionResolver {
    /// Subscribe to auth events and resolve the current session.
    ///
    /// A failure to read the initial session is logged and leaves the
    /// progress session signed out.
    pub async fn start(auth: Arc<dyn AuthProvider>, session: Arc<ProgressSession>) -> Self {
        // Subscribe before the initial read so a sign-in in between is not lost
        let events = auth.subscribe();

        match auth.get_session().await {
            Ok(Some(current)) => {
                tracing::info!(user_id = %current.identity.id, "Resuming existing session");
                spawn_load(&session, current.identity);
            }
            Ok(None) => tracing::info!("No existing session"),
            Err(e) => tracing::warn!(error = %e, "Failed to read initial session"),
        }

        let listener = tokio::spawn(listen(events, auth.clone(), session.clone()));

        Self {
            auth,
            session,
            listener,
        }
    }

    /// Sign in; the resulting auth event starts the progress load.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        self.auth.sign_in_with_password(email, password).await
    }

    /// Sign out and clear the progress session immediately.
    pub async fn logout(&self) -> Result<()> {
        self.auth.sign_out().await?;
        self.session.logout();
        Ok(())
    }

    pub fn session(&self) -> &Arc<ProgressSession> {
        &self.session
    }

    /// Stop following auth events.
    pub fn shutdown(&self) {
        self.listener.abort();
    }
}

impl Drop for SessionResolver {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Enter `Loading` now and run the fetch in the background.
///
/// The state change happens synchronously so events are applied in the
/// order they were received, even though loads finish out of order.
fn spawn_load(session: &Arc<ProgressSession>, identity: Identity) {
    let generation = session.begin_load(identity);
    let session = session.clone();
    tokio::spawn(async move {
        if let Err(e) = session.finish_load(generation).await {
            tracing::warn!(generation, error = %e, "Progress load failed");
        }
    });
}

async fn listen(
    mut events: broadcast::Receiver<AuthEvent>,
    auth: Arc<dyn AuthProvider>,
    session: Arc<ProgressSession>,
) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedIn(identity)) => {
                tracing::info!(user_id = %identity.id, "Auth event: signed in");
                spawn_load(&session, identity);
            }
            Ok(AuthEvent::SignedOut) => {
                tracing::info!("Auth event: signed out");
                session.logout();
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed auth events, re-reading session");
                match auth.get_session().await {
                    Ok(Some(current)) => spawn_load(&session, current.identity),
                    Ok(None) => session.logout(),
                    Err(e) => tracing::warn!(error = %e, "Failed to re-read session"),
                }
            }
            Err(RecvError::Closed) => {
                tracing::debug!("Auth event channel closed");
                break;
            }
        }
    }
}
