use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockWriteGuard, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;
use crate::wal::{Record, Wal};

use super::tables::{Tables, Undo};
use super::{BookingStore, StoreError, StoreTx};

// ── WAL writer channel ──────────────────────────────────────

enum WalCommand {
    /// Acknowledged with the append count since the last compaction.
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<u64>>,
    },
    /// `response: None` is a background compaction; the writer logs its outcome.
    Compact {
        records: Vec<Record>,
        response: Option<oneshot::Sender<io::Result<()>>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL file. Commits are already serialized by the
/// store's write lock, so every command is handled one at a time.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let flush_start = std::time::Instant::now();
                let result = wal.append(&record);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    error!(path = %wal.path().display(), "WAL append failed: {e}");
                }
                let _ = response.send(result.map(|()| wal.appends_since_compact()));
            }
            WalCommand::Compact { records, response } => {
                let result = wal.compact(&records);
                match response {
                    Some(response) => {
                        let _ = response.send(result);
                    }
                    None => match result {
                        Ok(()) => info!(path = %wal.path().display(), "WAL compacted"),
                        Err(e) => error!(path = %wal.path().display(), "WAL compaction failed: {e}"),
                    },
                }
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
}

/// Durable booking store: in-memory tables guarded by one `RwLock`, with every
/// committed transaction appended to a write-ahead log before it becomes visible
/// to other callers.
///
/// A transaction holds the write lock from [`BookingStore::begin`] until it is
/// committed or dropped. That makes transactions fully serialized, so a
/// conflict check and the insert that follows it cannot interleave with another
/// writer.
pub struct WalStore {
    tables: RwLock<Tables>,
    wal_tx: mpsc::Sender<WalCommand>,
    compact_threshold: u64,
}

impl WalStore {
    /// Replay the WAL at `path` and start its writer task. Must be called inside a tokio runtime.
    pub fn open(path: &Path, compact_threshold: u64) -> Result<Self, StoreError> {
        let records = Wal::replay(path).map_err(|e| StoreError::Wal(e.to_string()))?;
        let wal = Wal::open(path).map_err(|e| StoreError::Wal(e.to_string()))?;

        let mut tables = Tables::default();
        let mut replayed = 0usize;
        for record in records {
            for event in record.into_events() {
                tables.apply(&event);
                replayed += 1;
            }
        }
        info!(path = %path.display(), events = replayed, "booking store opened");

        let (wal_tx, wal_rx) = mpsc::channel(1024);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tables: RwLock::new(tables),
            wal_tx,
            compact_threshold,
        })
    }

    /// Open the store under `config.data_dir`, creating the directory if needed.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| StoreError::Wal(e.to_string()))?;
        Self::open(&config.wal_path(), config.compact_threshold)
    }

    async fn send(&self, cmd: WalCommand) -> Result<(), StoreError> {
        self.wal_tx.send(cmd).await.map_err(|_| StoreError::Closed)
    }

    /// Compact the WAL down to the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let guard = self.tables.write().await;
        let records = vec![Record::new(guard.snapshot())];
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::Compact {
            records,
            response: Some(tx),
        })
        .await?;
        rx.await
            .map_err(|_| StoreError::Closed)?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(WalCommand::AppendsSinceCompact { response: tx })
            .await?;
        rx.await.map_err(|_| StoreError::Closed)
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let guard = self.tables.write().await;
        Ok(Box::new(WalTx {
            store: self,
            guard,
            pending: Vec::new(),
            undo: Vec::new(),
            state: TxState::Open,
        }))
    }

    async fn list(&self, owner: Option<&str>) -> Result<BookingListing, StoreError> {
        Ok(self.tables.read().await.listing(owner))
    }

    async fn upcoming(&self, window: Span) -> Result<Vec<ConfirmedBooking>, StoreError> {
        Ok(self.tables.read().await.upcoming(&window))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.user(username).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committing,
    Done,
}

/// A [`WalStore`] transaction. Writes land in the locked tables immediately and are
/// undone on drop unless the commit reached the WAL writer.
pub struct WalTx<'a> {
    store: &'a WalStore,
    guard: RwLockWriteGuard<'a, Tables>,
    pending: Vec<Event>,
    undo: Vec<Undo>,
    state: TxState,
}

impl WalTx<'_> {
    fn record(&mut self, event: Event) {
        let undo = self.guard.apply(&event);
        self.undo.push(undo);
        self.pending.push(event);
    }

    fn rollback(&mut self) {
        let n = self.undo.len();
        while let Some(undo) = self.undo.pop() {
            self.guard.revert(undo);
        }
        self.pending.clear();
        self.state = TxState::Done;
        if n > 0 {
            debug!(changes = n, "transaction rolled back");
        }
    }
}

impl Drop for WalTx<'_> {
    fn drop(&mut self) {
        match self.state {
            TxState::Open => self.rollback(),
            // The record is already with the writer; keep memory in step with it.
            TxState::Committing => warn!(changes = self.undo.len(), "transaction abandoned during commit"),
            TxState::Done => {}
        }
    }
}

#[async_trait]
impl StoreTx for WalTx<'_> {
    async fn confirmed_overlap(
        &mut self,
        occupancy: &Occupancy,
        exclude: Option<BookingId>,
    ) -> Result<Option<BookingId>, StoreError> {
        Ok(self.guard.confirmed_overlap(occupancy, exclude))
    }

    async fn insert_requested(
        &mut self,
        username: &str,
        booking: NewBooking,
    ) -> Result<BookingRequest, StoreError> {
        let request = BookingRequest::from_new(Ulid::new(), username.to_string(), booking);
        self.record(Event::RequestSubmitted(request.clone()));
        Ok(request)
    }

    async fn load_requested(&mut self, id: BookingId) -> Result<Option<BookingRequest>, StoreError> {
        Ok(self.guard.requested(&id).cloned())
    }

    async fn load_confirmed(&mut self, id: BookingId) -> Result<Option<ConfirmedBooking>, StoreError> {
        Ok(self.guard.confirmed(&id).cloned())
    }

    async fn promote_to_approved(&mut self, id: BookingId) -> Result<ConfirmedBooking, StoreError> {
        let request = self
            .guard
            .requested(&id)
            .cloned()
            .ok_or(StoreError::MissingRow(id))?;
        let booking =
            ConfirmedBooking::from_request(Ulid::new(), ConfirmedKind::Single, &request, request.span);
        self.record(Event::BookingConfirmed(booking.clone()));
        self.record(Event::RequestRemoved { id });
        Ok(booking)
    }

    async fn insert_occurrence(
        &mut self,
        template: &BookingRequest,
        span: Span,
    ) -> Result<BookingId, StoreError> {
        let booking =
            ConfirmedBooking::from_request(Ulid::new(), ConfirmedKind::Recurring, template, span);
        let id = booking.id;
        self.record(Event::BookingConfirmed(booking));
        Ok(id)
    }

    async fn delete_requested(&mut self, id: BookingId) -> Result<BookingRequest, StoreError> {
        let request = self
            .guard
            .requested(&id)
            .cloned()
            .ok_or(StoreError::MissingRow(id))?;
        self.record(Event::RequestRemoved { id });
        Ok(request)
    }

    async fn delete_approved(&mut self, id: BookingId) -> Result<ConfirmedBooking, StoreError> {
        let booking = self
            .guard
            .confirmed(&id)
            .cloned()
            .ok_or(StoreError::MissingRow(id))?;
        self.record(Event::BookingRemoved { id, kind: booking.kind });
        Ok(booking)
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.guard.user(username).cloned())
    }

    async fn create_user(
        &mut self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<User, StoreError> {
        if self.guard.user(username).is_some() {
            return Err(StoreError::UniqueViolation(format!("username {username}")));
        }
        let user = User {
            id: Ulid::new(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
        };
        self.record(Event::UserCreated(user.clone()));
        Ok(user)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        if this.pending.is_empty() {
            this.state = TxState::Done;
            return Ok(());
        }

        // Reserve writer capacity while still rollback-able; past this point the
        // record is handed over without another await.
        let store = this.store;
        let permit = store.wal_tx.reserve().await.map_err(|_| StoreError::Closed)?;
        let (tx, rx) = oneshot::channel();
        let record = Record::new(std::mem::take(&mut this.pending));
        permit.send(WalCommand::Append { record, response: tx });
        this.state = TxState::Committing;

        let appends = match rx
            .await
            .map_err(|_| StoreError::Closed)
            .and_then(|r| r.map_err(|e| StoreError::Wal(e.to_string())))
        {
            Ok(appends) => appends,
            Err(e) => {
                this.rollback();
                return Err(e);
            }
        };
        this.undo.clear();
        this.state = TxState::Done;

        // Queued behind this append while the lock still orders writers; the
        // commit does not wait for the rewrite.
        let threshold = store.compact_threshold;
        if threshold > 0 && appends >= threshold {
            let records = vec![Record::new(this.guard.snapshot())];
            if let Err(e) = store.wal_tx.try_send(WalCommand::Compact { records, response: None }) {
                warn!("WAL compaction not scheduled: {e}");
            }
        }
        Ok(())
    }
}
