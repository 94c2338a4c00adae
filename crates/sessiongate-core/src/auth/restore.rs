use std::sync::Arc;

use tracing::debug;

use super::session::{RestoreOutcome, SessionStore};

/// Startup hook that hydrates the session store from persisted storage.
///
/// Must run before the first navigation is evaluated. `run` consumes the
/// restorer, so it can only ever run once.
pub struct SessionRestorer {
    store: Arc<SessionStore>,
}

impl SessionRestorer {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub fn run(self) -> RestoreOutcome {
        let outcome = self.store.restore_from_storage();
        debug!(?outcome, "Session restorer finished");
        outcome
    }
}
