//! Enrollment and verification on top of the engine and an identity store.

use crate::engine::{EngineError, EngineHandle};
use crate::types::{AlignedFace, Embedding, EnrolledIdentity};
use chrono::{DateTime, Local};
use thiserror::Error;
use uuid::Uuid;

/// Opaque persistence failure, surfaced to the caller as-is.
pub type StoreFailure = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("identity store error: {0}")]
    Store(#[source] StoreFailure),
    #[error("an identity named {0:?} is already enrolled")]
    NameConflict(String),
}

/// Persistence for enrolled identities.
#[allow(async_fn_in_trait)]
pub trait IdentityStore {
    async fn insert(&self, identity: &EnrolledIdentity) -> Result<(), StoreFailure>;
    async fn find_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<EnrolledIdentity>, StoreFailure>;
    async fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreFailure>;
    /// Returns whether an identity with `id` existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreFailure>;
    /// Returns the number of identities removed.
    async fn delete_all(&self) -> Result<usize, StoreFailure>;
}

/// An embedding waiting for the user to confirm a display name.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEnrollment {
    pub id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Matched {
        identity: EnrolledIdentity,
        similarity: f32,
    },
    NoMatch {
        best_similarity: f32,
    },
}

pub struct FaceFlow<S> {
    engine: EngineHandle,
    store: S,
    threshold: f32,
}

impl<S: IdentityStore> FaceFlow<S> {
    pub fn new(engine: EngineHandle, store: S, threshold: f32) -> Self {
        Self {
            engine,
            store,
            threshold,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Compute the embedding for a completed capture and hold it for naming.
    pub async fn prepare_enrollment(
        &self,
        samples: Vec<AlignedFace>,
    ) -> Result<PendingEnrollment, FlowError> {
        let embedding = self.engine.extract(samples).await?;
        let pending = PendingEnrollment {
            id: Uuid::new_v4().to_string(),
            display_name: default_display_name(Local::now()),
            embedding,
        };
        tracing::info!(id = %pending.id, name = %pending.display_name, "enrollment prepared");
        Ok(pending)
    }

    /// Persist `pending` under `display_name`, or its default name when blank.
    pub async fn complete_enrollment(
        &self,
        pending: PendingEnrollment,
        display_name: &str,
    ) -> Result<EnrolledIdentity, FlowError> {
        let display_name = match display_name.trim() {
            "" => pending.display_name,
            name => name.to_string(),
        };

        if self
            .store
            .find_by_display_name(&display_name)
            .await
            .map_err(FlowError::Store)?
            .is_some()
        {
            tracing::info!(name = %display_name, "enrollment rejected: name taken");
            return Err(FlowError::NameConflict(display_name));
        }

        let identity = EnrolledIdentity {
            id: pending.id,
            display_name,
            embedding: pending.embedding,
        };
        self.store
            .insert(&identity)
            .await
            .map_err(FlowError::Store)?;
        tracing::info!(id = %identity.id, name = %identity.display_name, "identity enrolled");
        Ok(identity)
    }

    /// Match a completed capture against every enrolled identity.
    pub async fn verify(&self, samples: Vec<AlignedFace>) -> Result<Verification, FlowError> {
        let gallery = self.store.list().await.map_err(FlowError::Store)?;
        let verified = self
            .engine
            .verify(samples, gallery.clone(), self.threshold)
            .await?;
        let result = verified.result;

        let identity = result
            .identity_id
            .as_deref()
            .filter(|_| result.matched)
            .and_then(|id| gallery.into_iter().find(|g| g.id == id));

        Ok(match identity {
            Some(identity) => Verification::Matched {
                identity,
                similarity: result.similarity,
            },
            None => Verification::NoMatch {
                best_similarity: result.similarity,
            },
        })
    }
}

/// `User_<yyyyMMdd_HHmm>` for the given local time.
pub fn default_display_name(now: DateTime<Local>) -> String {
    format!("User_{}", now.format("%Y%m%d_%H%M"))
}
