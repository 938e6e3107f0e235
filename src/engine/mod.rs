mod error;
mod queries;
mod store;
mod transitions;

pub use error::{EngineError, ErrorKind};
pub use store::{BookingStore, Collection, DocGuard, SlotStore};
pub use transitions::{Decision, ExpireOutcome, RequestReceipt, SlotCancellation, StudentInfo};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock, RwLockReadGuard};

use crate::clock::{Clock, SystemClock};
use crate::directory::Directory;
use crate::limits::DEFAULT_BOOKING_TTL_MS;
use crate::mail::LinkBuilder;
use crate::model::*;
use crate::notify::{Notification, Outbox};
use crate::observability::{SLOTS_ACTIVE, WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// All or nothing: a batch that fails anywhere is rolled back so none of its
/// frames can surface on replay after its callers were told it failed.
fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), "wal: batch failed: {e}");
        if let Err(e) = wal.rollback() {
            tracing::error!("wal: rollback failed, refusing appends until compaction: {e}");
        }
    }
    result
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Collaborators handed to the engine at construction.
pub struct EngineContext {
    directory: Arc<dyn Directory>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    links: LinkBuilder,
    booking_ttl_ms: Ms,
}

impl EngineContext {
    pub fn new(directory: Arc<dyn Directory>, outbox: Outbox) -> Self {
        Self {
            directory,
            outbox,
            clock: Arc::new(SystemClock),
            links: LinkBuilder::new("http://localhost:8080"),
            booking_ttl_ms: DEFAULT_BOOKING_TTL_MS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Base URL the approve/reject links point at.
    pub fn with_public_url(mut self, url: &str) -> Self {
        self.links = LinkBuilder::new(url);
        self
    }

    pub fn with_booking_ttl(mut self, ttl_ms: Ms) -> Self {
        self.booking_ttl_ms = ttl_ms;
        self
    }
}

/// The reservation state machine over the slot and booking stores.
pub struct Engine {
    pub slots: SlotStore,
    pub bookings: BookingStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Transitions hold it shared from first lock to last write; compaction
    /// holds it exclusively so its snapshot matches the log exactly.
    commit_gate: RwLock<()>,
    /// Serializes slot creation per room for the overlap check.
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    directory: Arc<dyn Directory>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    links: LinkBuilder,
    booking_ttl_ms: Ms,
}

impl Engine {
    pub fn new(wal_path: PathBuf, ctx: EngineContext) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: SlotStore::new(),
            bookings: BookingStore::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            room_locks: DashMap::new(),
            directory: ctx.directory,
            outbox: ctx.outbox,
            clock: ctx.clock,
            links: ctx.links,
            booking_ttl_ms: ctx.booking_ttl_ms,
        };

        for event in &events {
            engine.restore(event);
        }
        metrics::gauge!(SLOTS_ACTIVE).set(engine.slots.len() as f64);
        tracing::info!(
            events = events.len(),
            slots = engine.slots.len(),
            bookings = engine.bookings.len(),
            "engine state restored from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Replay one committed event. Events carry post-images, so this is an upsert.
    fn restore(&self, event: &Event) {
        match event {
            Event::SlotCreated { slot } => self.slots.restore(slot.id, slot.clone()),
            Event::SlotDeleted { id } => self.slots.remove(id),
            Event::BookingRequested { booking, slot } | Event::BookingApproved { booking, slot } => {
                self.bookings.restore(booking.id, booking.clone());
                self.slots.restore(slot.id, slot.clone());
            }
            Event::BookingRejected { booking, slot } | Event::BookingExpired { booking, slot } => {
                self.bookings.restore(booking.id, booking.clone());
                if let Some(slot) = slot {
                    self.slots.restore(slot.id, slot.clone());
                }
            }
            Event::SlotReset { slot, booking } => {
                self.slots.restore(slot.id, slot.clone());
                if let Some(booking) = booking {
                    self.bookings.restore(booking.id, booking.clone());
                }
            }
            Event::BookingRetained { booking } => self.bookings.restore(booking.id, booking.clone()),
        }
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub(super) fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    pub(super) fn links(&self) -> &LinkBuilder {
        &self.links
    }

    pub(super) fn booking_ttl_ms(&self) -> Ms {
        self.booking_ttl_ms
    }

    /// Hand a message to the dispatcher. Never blocks, never fails the caller.
    pub(super) fn notify(&self, message: Notification) {
        self.outbox.post(message);
    }

    pub(super) async fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub(super) fn room_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// Rewrite the WAL as one record per live document.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;

        let slots = self.slots.snapshot_all().await;
        let bookings = self.bookings.snapshot_all().await;
        let mut events = Vec::with_capacity(slots.len() + bookings.len());
        events.extend(slots.into_iter().map(|slot| Event::SlotCreated { slot }));
        events.extend(bookings.into_iter().map(|booking| Event::BookingRetained { booking }));
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(records = count, "wal compacted");
        Ok(())
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
