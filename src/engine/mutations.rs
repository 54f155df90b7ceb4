use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Partial update of a catalog entry. The space kind is fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct SpaceUpdate {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub capacity: Option<u32>,
    pub active: Option<bool>,
}

fn validate_space(space: &Space) -> Result<(), EngineError> {
    if space.name.trim().is_empty() {
        return Err(EngineError::Invalid("space name is required"));
    }
    if space.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("space name too long"));
    }
    if space.price.is_sign_negative() {
        return Err(EngineError::Invalid("price must not be negative"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_space(&self, space: Space) -> Result<Space, EngineError> {
        validate_space(&space)?;
        let _gate = self.catalog_gate.read().await;
        if self.spaces.len() >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }
        if self.spaces.contains_key(&space.id) {
            return Err(EngineError::AlreadyExists(space.id));
        }

        let event = Event::SpaceCreated {
            space: space.clone(),
        };
        self.wal_append(&event).await?;
        self.spaces
            .insert(space.id, Arc::new(RwLock::new(SpaceState::new(space.clone()))));
        info!(space_id = %space.id, kind = %space.kind, "space created");
        Ok(space)
    }

    pub async fn update_space(&self, id: Ulid, update: SpaceUpdate) -> Result<Space, EngineError> {
        let ss = self
            .get_space_state(&id)
            .ok_or(EngineError::NotFound("space", id))?;
        let mut guard = ss.write().await;

        let mut space = guard.space.clone();
        if let Some(name) = update.name {
            space.name = name;
        }
        if let Some(price) = update.price {
            space.price = price;
        }
        if let Some(capacity) = update.capacity {
            space.capacity = capacity;
        }
        if let Some(active) = update.active {
            space.active = active;
        }
        validate_space(&space)?;

        let event = Event::SpaceUpdated {
            space: space.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(space)
    }

    pub async fn register_user(&self, user: User) -> Result<User, EngineError> {
        if user.name.trim().is_empty() {
            return Err(EngineError::Invalid("user name is required"));
        }
        if user.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        if user.email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !user.email.contains('@') {
            return Err(EngineError::Invalid("email must contain '@'"));
        }
        let _gate = self.catalog_gate.read().await;
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains_key(&user.id) {
            return Err(EngineError::AlreadyExists(user.id));
        }

        let event = Event::UserRegistered { user: user.clone() };
        self.wal_append(&event).await?;
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Rewrite the WAL with just enough events to rebuild the current state.
    ///
    /// Every space stays read-locked and catalog writes stay gated until the
    /// writer has swapped the file, so nothing appended after the snapshot is lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.catalog_gate.write().await;
        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|e| Event::UserRegistered {
                user: e.value().clone(),
            })
            .collect();

        let spaces: Vec<_> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(spaces.len());
        for ss in spaces {
            let guard = ss.read_owned().await;
            events.push(Event::SpaceCreated {
                space: guard.space.clone(),
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
