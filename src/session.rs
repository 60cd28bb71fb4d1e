use crate::errors::AppError;
use crate::models::Principal;
use crate::store::{DocRef, DocumentStore, FieldOp, Fields};
use serde_json::json;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    SignedIn(Principal),
    /// Same principal, refreshed profile details.
    Refreshed(Principal),
    Switched { from: Principal, to: Principal },
    SignedOut(Principal),
}

impl Transition {
    /// Whether the previous principal's local state has to be torn down.
    pub fn leaves_principal(&self) -> bool {
        matches!(self, Transition::Switched { .. } | Transition::SignedOut(_))
    }
}

/// Holds the signed-in principal and whether the identity provider has
/// reported at least once.
#[derive(Debug, Default)]
pub struct SessionTracker {
    principal: Option<Principal>,
    ready: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn require(&self) -> Result<&Principal, AppError> {
        self.principal.as_ref().ok_or(AppError::NotSignedIn)
    }

    pub fn classify(&self, next: &Option<Principal>) -> Transition {
        match (&self.principal, next) {
            (None, None) => Transition::Unchanged,
            (None, Some(to)) => Transition::SignedIn(to.clone()),
            (Some(from), None) => Transition::SignedOut(from.clone()),
            (Some(from), Some(to)) if from.uid != to.uid => Transition::Switched {
                from: from.clone(),
                to: to.clone(),
            },
            (Some(from), Some(to)) if from != to => Transition::Refreshed(to.clone()),
            _ => Transition::Unchanged,
        }
    }

    pub fn apply(&mut self, next: Option<Principal>) {
        self.ready = true;
        self.principal = next;
    }
}

/// Makes sure the principal's public stats record exists.
///
/// The existence check is not transactional: two racing callers may both
/// create it, so creation is a plain overwrite of an all-zero record.
pub async fn ensure_stats_record<S: DocumentStore>(
    store: &S,
    principal: &Principal,
) -> Result<(), AppError> {
    let doc = DocRef::stats(&principal.uid);
    let existing = store
        .get(&principal.uid, &doc)
        .await
        .map_err(AppError::write("load stats"))?;

    match existing {
        Some(_) => {
            store
                .update(
                    &principal.uid,
                    &doc,
                    vec![(
                        "display_name".into(),
                        FieldOp::Set(json!(principal.display_name)),
                    )],
                )
                .await
                .map_err(AppError::write("update stats"))?;
            debug!(uid = %principal.uid, "stats record refreshed");
        }
        None => {
            store
                .set(&principal.uid, &doc, empty_stats(principal))
                .await
                .map_err(AppError::write("create stats"))?;
            info!(uid = %principal.uid, "stats record created");
        }
    }
    Ok(())
}

pub(crate) fn empty_stats(principal: &Principal) -> Fields {
    let mut fields = Fields::new();
    fields.insert("uid".into(), json!(principal.uid));
    fields.insert("display_name".into(), json!(principal.display_name));
    fields.insert("tasks_completed".into(), json!(0));
    fields.insert("total_hours".into(), json!(0));
    fields.insert("penalty".into(), json!(0));
    fields.insert("last_reset_at".into(), serde_json::Value::Null);
    fields.insert("history".into(), json!([]));
    fields
}
