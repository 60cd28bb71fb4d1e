use crate::errors::AppError;
use crate::models::Principal;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// Local identity provider.
///
/// Principals are resolved from their email; the identifier is a name-based
/// UUID so an account keeps the same records across restarts. Auth changes
/// are published on a watch channel, the same way a hosted provider delivers
/// its state-change callback.
pub struct LocalIdentity {
    tx: watch::Sender<Option<Principal>>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, display_name: &str, email: &str) -> Result<Principal, AppError> {
        let email = email.trim().to_lowercase();
        let display_name = display_name.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Auth("a valid email is required".into()));
        }
        if display_name.is_empty() {
            return Err(AppError::Auth("a display name is required".into()));
        }

        let principal = Principal {
            uid: principal_id(&email),
            display_name: display_name.to_string(),
            email,
        };
        info!(uid = %principal.uid, "signed in");
        let _previous = self.tx.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    pub fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            info!("signed out");
        }
    }

    pub fn current(&self) -> Option<Principal> {
        self.tx.borrow().clone()
    }

    /// Auth-change stream. The current state counts as the first delivery.
    pub fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        let mut rx = self.tx.subscribe();
        rx.mark_changed();
        rx
    }
}

pub fn principal_id(email: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("mailto:{email}").as_bytes()).to_string()
}
