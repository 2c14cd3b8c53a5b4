use std::sync::Arc;

use despacho_core::{
    Config, CredentialVerifier, LifecycleManager, SanitizedConfig, TicketBroadcaster, UserStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    lifecycle: Arc<LifecycleManager>,
    users: Arc<dyn UserStore>,
    verifier: Arc<dyn CredentialVerifier>,
    broadcaster: TicketBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        lifecycle: Arc<LifecycleManager>,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn CredentialVerifier>,
        broadcaster: TicketBroadcaster,
    ) -> Self {
        Self {
            config,
            lifecycle,
            users,
            verifier,
            broadcaster,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    pub fn verifier(&self) -> &dyn CredentialVerifier {
        self.verifier.as_ref()
    }

    pub fn broadcaster(&self) -> &TicketBroadcaster {
        &self.broadcaster
    }
}
