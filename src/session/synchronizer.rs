//! Projects identity-provider session events into the session store.
//!
//! The synchronizer is the only writer of the [`SessionStore`]. It consumes a
//! provider subscription one event at a time, so transitions are applied in the
//! order the provider emitted them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{session_channel, SessionStore, SessionWriter};
use crate::identity::{IdentityProvider, SessionEvent, SessionEvents};

/// Pause before re-subscribing after the provider closed our channel.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

pub struct AuthSynchronizer {
    provider: Arc<dyn IdentityProvider>,
    writer: SessionWriter,
}

/// Keeps the synchronizer task alive. Dropping it stops synchronization.
pub struct SynchronizerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SynchronizerHandle {
    /// Stop consuming events and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Auth synchronizer task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl AuthSynchronizer {
    /// Start synchronizing `provider` into a new session store.
    pub fn spawn(provider: Arc<dyn IdentityProvider>) -> (SessionStore, SynchronizerHandle) {
        let (writer, store) = session_channel();
        let synchronizer = AuthSynchronizer { provider, writer };
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(synchronizer.run(rx));
        (
            store,
            SynchronizerHandle {
                shutdown: Some(tx),
                task,
            },
        )
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            "Auth synchronizer started for provider '{}'",
            self.provider.get_name()
        );
        let mut events: SessionEvents = self.provider.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => self.apply(&event),
                    None => {
                        warn!(
                            "Session channel of provider '{}' closed; re-subscribing",
                            self.provider.get_name()
                        );
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                        events = self.provider.subscribe();
                    }
                },
            }
        }

        info!("Auth synchronizer stopped");
    }

    fn apply(&self, event: &SessionEvent) {
        let session = self.writer.apply(event);
        match session.user() {
            Some(user) => info!(
                event_name = "session.authenticated",
                event_domain = "session",
                uid = user.uid.as_str(),
                "session authenticated"
            ),
            None => info!(
                event_name = "session.unauthenticated",
                event_domain = "session",
                "session unauthenticated"
            ),
        }
        debug!("Session is now {:?}", session.auth_state());
    }
}
