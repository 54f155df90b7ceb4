mod admission;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;

pub use admission::BookingRequest;
pub use error::EngineError;
pub use lifecycle::{Actor, StatusChange};
pub use mutations::SpaceUpdate;
pub use queries::BookingFilter;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;
use crate::notify::{Notification, Notifier};
use crate::wal::Wal;

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

/// Per-deployment knobs the engine needs for pricing and invoicing.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub calendar: Calendar,
    pub gst_rate: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            calendar: Calendar::utc(),
            gst_rate: Decimal::new(18, 2),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, then pays for one fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    spaces: DashMap<Ulid, SharedSpaceState>,
    users: DashMap<Ulid, User>,
    /// Reverse lookup: booking id → space id
    booking_to_space: DashMap<Ulid, Ulid>,
    /// Held shared by space/user creation, exclusively by compaction.
    catalog_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

/// Apply a space-scoped event. Caller holds the space's write lock.
fn apply_to_space(ss: &mut SpaceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SpaceUpdated { space } => ss.space = space.clone(),
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.space_id);
            ss.insert_booking(booking.clone());
        }
        Event::BookingNotesUpdated { id, notes, at, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.notes = notes.clone();
                b.updated_at = *at;
            }
        }
        Event::BookingStatusChanged {
            id,
            status,
            payment_status,
            invoice,
            at,
            ..
        } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.status = *status;
                b.payment_status = *payment_status;
                if invoice.is_some() {
                    b.invoice = invoice.clone();
                }
                b.updated_at = *at;
            }
        }
        Event::BookingDeleted { id, .. } => {
            ss.remove_booking(*id);
            index.remove(id);
        }
        // Inserted at the map level, never routed to an existing space.
        Event::SpaceCreated { .. } | Event::UserRegistered { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path`, then start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let users = DashMap::new();
        let booking_to_space = DashMap::new();
        let mut spaces: HashMap<Ulid, SpaceState> = HashMap::new();
        for event in &events {
            match event {
                Event::SpaceCreated { space } => {
                    spaces.insert(space.id, SpaceState::new(space.clone()));
                }
                Event::UserRegistered { user } => {
                    users.insert(user.id, user.clone());
                }
                other => match other.space_id().and_then(|id| spaces.get_mut(&id)) {
                    Some(ss) => apply_to_space(ss, other, &booking_to_space),
                    None => warn!("wal replay: event for unknown space skipped"),
                },
            }
        }
        tracing::info!(
            events = events.len(),
            spaces = spaces.len(),
            users = users.len(),
            bookings = booking_to_space.len(),
            "replayed {}",
            wal_path.display()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            spaces: spaces
                .into_iter()
                .map(|(id, ss)| (id, Arc::new(RwLock::new(ss))))
                .collect(),
            users,
            booking_to_space,
            catalog_gate: RwLock::new(()),
            wal_tx,
            notifier,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(crate) fn get_space_state(&self, id: &Ulid) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    /// Durable first, then visible. Caller holds the space's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_space(ss, event, &self.booking_to_space);
        Ok(())
    }

    /// Find the space owning a booking and take its write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<SpaceState>, EngineError> {
        let space_id = self
            .booking_to_space
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking", *booking_id))?;
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound("space", space_id))?;
        let guard = ss.write_owned().await;
        // Deleted while we waited for the lock.
        if guard.booking(*booking_id).is_none() {
            return Err(EngineError::NotFound("booking", *booking_id));
        }
        Ok(guard)
    }

    /// Fire-and-forget. The booking is already committed; failures are only logged.
    pub(super) fn dispatch(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let title = notification.title.clone();
            let booking_id = notification.meta.booking_id;
            if let Err(e) = notifier.notify(notification).await {
                metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
                warn!(%booking_id, "{title:?} notification dropped: {e}");
            }
        });
    }
}
