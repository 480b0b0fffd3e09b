// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The client facade. Callers only ever talk to `SqlClient`.
//
// Every request funnels through `Link::send`: allocate a seq, park a
// oneshot in the pending table, write the frame. A reader task owns the
// response channel and settles pending entries by seq, so replies may
// arrive in any order. When the response channel closes the worker is gone
// and every entry still parked is failed with `WorkerTerminated`.
//
// A reply for a seq nobody is waiting on means the two sides disagree about
// the protocol. That poisons the link: the reader stops, every pending and
// later request fails with the same `Protocol` error.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::classify::SqliteErrorKind;
use crate::config::SqlConfig;
use crate::engine::{Access, Operation, StorageLocation};
use crate::error::{RemoteError, SqlError};
use crate::logger::{SqlLogger, TracingLogger};
use crate::protocol::{self, format_log_args, Frame, LogLevel, Request, Response, WrappedRequest};
use crate::signal::OneShot;
use crate::stats::{QueryStats, QueryStatsOptions};
use crate::worker::{SpawnWorker, ThreadWorker, WorkerSeed};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where a client is in its life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    /// `Init` was answered with an error, kept here as text.
    Failed(String),
    Closing,
    Closed,
}

type UnknownErrorListener = Arc<dyn Fn(&RemoteError) + Send + Sync>;

struct PendingEntry {
    context: String,
    tx: oneshot::Sender<Result<Value, SqlError>>,
}

/// Requests sent to one worker and not yet answered.
#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingEntry>,
    /// Set once the link is dead; later inserts fail with this.
    closed: Option<SqlError>,
}

impl PendingTable {
    fn insert(
        &mut self,
        seq: u64,
        context: String,
    ) -> Result<oneshot::Receiver<Result<Value, SqlError>>, SqlError> {
        if let Some(reason) = &self.closed {
            return Err(reason.clone());
        }
        if self.entries.contains_key(&seq) {
            return Err(SqlError::Protocol(format!("seq {seq} is already pending")));
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(seq, PendingEntry { context, tx });
        Ok(rx)
    }

    fn take(&mut self, seq: u64) -> Option<PendingEntry> {
        self.entries.remove(&seq)
    }

    fn fail_all(&mut self, reason: SqlError) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(reason.clone()));
        }
        self.closed.get_or_insert(reason);
    }
}

/// The client's connection to one running worker.
#[derive(Clone)]
struct Link {
    requests: UnboundedSender<Frame>,
    pending: Arc<Mutex<PendingTable>>,
    exited: watch::Receiver<bool>,
}

impl Link {
    async fn send(&self, seq: u64, request: Request) -> Result<Value, SqlError> {
        let context = request.context();
        let frame = protocol::encode(&WrappedRequest { seq, request })
            .map_err(|e| SqlError::Encode(e.to_string()))?;
        let rx = lock(&self.pending).insert(seq, context)?;
        if self.requests.send(frame).is_err() {
            lock(&self.pending).take(seq);
            return Err(SqlError::WorkerTerminated);
        }
        rx.await.unwrap_or(Err(SqlError::WorkerTerminated))
    }

    /// Resolve once the worker has exited or the link was poisoned.
    async fn terminated(&self) {
        let mut exited = self.exited.clone();
        let _ = exited.wait_for(|exited| *exited).await;
    }
}

struct Inner {
    config: SqlConfig,
    spawner: Arc<dyn SpawnWorker>,
    lifecycle: watch::Sender<Lifecycle>,
    link: Mutex<Option<Link>>,
    logger: Mutex<Option<Arc<dyn SqlLogger>>>,
    location: Mutex<Option<StorageLocation>>,
    seq: AtomicU64,
    corrupted: OneShot<RemoteError>,
    readonly: OneShot<RemoteError>,
    unknown_listeners: Mutex<Vec<UnknownErrorListener>>,
    write_paused: watch::Sender<bool>,
    stats: Mutex<Option<QueryStats>>,
}

impl Inner {
    fn logger(&self) -> Arc<dyn SqlLogger> {
        lock(&self.logger)
            .clone()
            .unwrap_or_else(|| Arc::new(TracingLogger))
    }

    /// Caller-supplied loggers run on the reader task; a panicking one must
    /// not take the reader down with it.
    fn log(&self, level: LogLevel, message: &str) {
        let logger = self.logger();
        if catch_unwind(AssertUnwindSafe(|| logger.log(level, message))).is_err() {
            tracing::error!(%level, "sql logger panicked");
        }
    }

    /// Fan an application error out to the matching observers.
    fn notify(&self, err: &RemoteError) {
        match err.kind {
            SqliteErrorKind::Corrupted => {
                if self.corrupted.settle(err.clone()) {
                    tracing::warn!(context = %err.context, "storage corruption detected");
                }
            }
            SqliteErrorKind::Readonly => {
                self.readonly.settle(err.clone());
            }
            SqliteErrorKind::Unknown => {
                let listeners: Vec<UnknownErrorListener> =
                    lock(&self.unknown_listeners).iter().cloned().collect();
                for listener in listeners {
                    if catch_unwind(AssertUnwindSafe(|| listener(err))).is_err() {
                        tracing::error!(context = %err.context, "unknown-error listener panicked");
                    }
                }
            }
        }
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        self.lifecycle.send_replace(state);
    }
}

/// Settle one decoded frame. An `Err` is a protocol fault.
fn dispatch(inner: Option<&Inner>, pending: &Mutex<PendingTable>, frame: &str) -> Result<(), SqlError> {
    let response: Response =
        protocol::decode(frame).map_err(|e| SqlError::Protocol(e.to_string()))?;
    match response {
        Response::LogRecord { level, args } => {
            if let Some(inner) = inner {
                inner.log(level, &format!("worker: {}", format_log_args(&args)));
            }
        }
        Response::CallResult { seq, error, value } => {
            let entry = lock(pending).take(seq).ok_or_else(|| {
                SqlError::Protocol(format!("unexpected worker response with seq {seq}"))
            })?;
            let result = match error {
                None => Ok(value.unwrap_or(Value::Null)),
                Some(wire) => {
                    let remote = RemoteError::from_wire(&entry.context, wire);
                    if let Some(inner) = inner {
                        inner.notify(&remote);
                    }
                    Err(SqlError::Remote(remote))
                }
            };
            let _ = entry.tx.send(result);
        }
    }
    Ok(())
}

/// Fails whatever is still pending when the reader stops, however it stops.
struct ReaderGuard {
    pending: Arc<Mutex<PendingTable>>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        lock(&self.pending).fail_all(SqlError::WorkerTerminated);
    }
}

async fn read_responses(
    inner: Weak<Inner>,
    mut responses: UnboundedReceiver<Frame>,
    pending: Arc<Mutex<PendingTable>>,
    exited: watch::Sender<bool>,
) {
    let _guard = ReaderGuard {
        pending: Arc::clone(&pending),
    };
    while let Some(frame) = responses.recv().await {
        let strong = inner.upgrade();
        if let Err(fault) = dispatch(strong.as_deref(), &pending, &frame) {
            if let Some(inner) = &strong {
                inner.log(LogLevel::Error, &format!("sql channel error: {fault}"));
            }
            lock(&pending).fail_all(fault);
            // Dropping `exited` releases anyone waiting for termination.
            return;
        }
    }
    tracing::debug!("database worker exited");
    lock(&pending).fail_all(SqlError::WorkerTerminated);
    let _ = exited.send(true);
}

/// Handle to the database worker.
///
/// Cheap to clone; clones share one worker and one lifecycle.
///
/// ```no_run
/// use std::sync::Arc;
/// use parley_sql::{SqlClient, SqlConfig, TracingLogger};
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), parley_sql::SqlError> {
/// let sql = SqlClient::new(SqlConfig::from_env());
/// sql.initialize("/home/me/.config/parley", "profile-key", Arc::new(TracingLogger))
///     .await?;
/// let setting = sql.call("getItemById", vec![json!("system-tray-setting")]).await?;
/// println!("{setting}");
/// sql.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqlClient {
    inner: Arc<Inner>,
}

impl SqlClient {
    /// A client whose worker runs on its own OS thread.
    pub fn new(config: SqlConfig) -> Self {
        let spawner = Arc::new(ThreadWorker::new(config.backend));
        Self::with_spawner(config, spawner)
    }

    /// A client that starts workers through `spawner`.
    pub fn with_spawner(config: SqlConfig, spawner: Arc<dyn SpawnWorker>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                spawner,
                lifecycle: watch::Sender::new(Lifecycle::Uninitialized),
                link: Mutex::new(None),
                logger: Mutex::new(None),
                location: Mutex::new(None),
                seq: AtomicU64::new(0),
                corrupted: OneShot::new(),
                readonly: OneShot::new(),
                unknown_listeners: Mutex::new(Vec::new()),
                write_paused: watch::Sender::new(false),
                stats: Mutex::new(None),
            }),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle.borrow().clone()
    }

    /// Open the store at `{config_dir}/sql` with `key`. Callable once.
    pub async fn initialize(
        &self,
        config_dir: impl Into<PathBuf>,
        key: &str,
        logger: Arc<dyn SqlLogger>,
    ) -> Result<(), SqlError> {
        let claimed = self.inner.lifecycle.send_if_modified(|state| {
            if *state != Lifecycle::Uninitialized {
                return false;
            }
            *state = Lifecycle::Initializing;
            true
        });
        if !claimed {
            return Err(SqlError::AlreadyInitialized);
        }

        let config_dir = config_dir.into();
        *lock(&self.inner.logger) = Some(logger);
        *lock(&self.inner.location) = Some(StorageLocation::new(config_dir.clone()));

        let result = async {
            let link = self.ensure_worker(WorkerSeed::default())?;
            let request = Request::Init {
                config_dir: config_dir.to_string_lossy().into_owned(),
                key: key.to_string(),
            };
            link.send(self.next_seq(), request).await.map(|_| ())
        }
        .await;

        match &result {
            Ok(()) => self.inner.set_lifecycle(Lifecycle::Ready),
            Err(e) => {
                self.inner
                    .log(LogLevel::Error, &format!("sql initialize failed: {e}"));
                self.inner.set_lifecycle(Lifecycle::Failed(e.to_string()));
            }
        }
        result
    }

    /// Run the storage operation `method` with positional `args`.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, SqlError> {
        let link = self.ready_link().await?;

        if matches!(method.parse::<Operation>(), Ok(op) if op.access() == Access::Write) {
            let mut paused = self.inner.write_paused.subscribe();
            let _ = paused.wait_for(|paused| !*paused).await;
        }

        let started = Instant::now();
        let request = Request::Call {
            method: method.to_string(),
            args,
        };
        let result = link.send(self.next_seq(), request).await;
        self.trace_duration(method, started.elapsed());
        result
    }

    /// The first corruption error this client sees. Every observer gets
    /// the same error; later corruption does not re-settle it.
    pub fn when_corrupted(&self) -> impl std::future::Future<Output = RemoteError> + Send + 'static {
        self.inner.corrupted.wait()
    }

    /// The first "readonly database" error this client sees.
    pub fn when_readonly(&self) -> impl std::future::Future<Output = RemoteError> + Send + 'static {
        self.inner.readonly.wait()
    }

    /// Call `listener` for every application error that is neither
    /// corruption nor readonly.
    pub fn on_unknown_error(&self, listener: impl Fn(&RemoteError) + Send + Sync + 'static) {
        lock(&self.inner.unknown_listeners).push(Arc::new(listener));
    }

    /// Close the store and wait for the worker to exit.
    ///
    /// After a protocol fault the reader is gone, so the exit cannot be
    /// observed. `close` then returns once the request sender is dropped;
    /// the worker thread winds down on its own afterwards.
    pub async fn close(&self) -> Result<(), SqlError> {
        let mut previous = None;
        self.inner.lifecycle.send_if_modified(|state| match *state {
            Lifecycle::Ready | Lifecycle::Failed(_) => {
                previous = Some(std::mem::replace(state, Lifecycle::Closing));
                true
            }
            _ => false,
        });
        let Some(previous) = previous else {
            return Err(match self.lifecycle() {
                Lifecycle::Uninitialized | Lifecycle::Initializing => SqlError::NotInitialized,
                _ => SqlError::AlreadyClosed,
            });
        };

        let link = lock(&self.inner.link).take();
        let result = match link {
            Some(link) => {
                let reply = link.send(self.next_seq(), Request::Close).await;
                let Link {
                    requests, exited, ..
                } = link;
                // A worker that never saw `Close` exits once the last
                // request sender is gone.
                drop(requests);
                let mut exited = exited;
                let _ = exited.wait_for(|exited| *exited).await;
                reply.map(|_| ())
            }
            None => Ok(()),
        };
        self.inner.set_lifecycle(Lifecycle::Closed);

        if let Lifecycle::Failed(reason) = previous {
            self.inner.log(
                LogLevel::Info,
                &format!("sql closed after failed initialization: {reason}"),
            );
            return Ok(());
        }
        result
    }

    /// Delete the store from disk. Does not change the lifecycle.
    pub async fn remove_storage(&self) -> Result<(), SqlError> {
        let mut lifecycle = self.inner.lifecycle.subscribe();
        let state = lifecycle
            .wait_for(|state| !matches!(state, Lifecycle::Initializing | Lifecycle::Closing))
            .await
            .map(|state| (*state).clone())
            .map_err(|_| SqlError::AlreadyClosed)?;

        if state != Lifecycle::Closed {
            let link = self.ensure_worker(WorkerSeed::default())?;
            return link
                .send(self.next_seq(), Request::RemoveStorage)
                .await
                .map(|_| ());
        }

        // The worker is gone; start a short-lived one that already knows
        // where the store lives.
        let seed = WorkerSeed {
            location: lock(&self.inner.location).clone(),
        };
        let link = self.spawn_link(seed)?;
        let removed = link.send(self.next_seq(), Request::RemoveStorage).await;
        let closed = link.send(self.next_seq(), Request::Close).await;
        link.terminated().await;
        removed?;
        closed.map(|_| ())
    }

    /// Hold back write operations until `resume_write_access`.
    pub fn pause_write_access(&self) -> Result<(), SqlError> {
        if !self.inner.write_paused.send_if_modified(|paused| !std::mem::replace(paused, true)) {
            return Err(SqlError::AlreadyPaused);
        }
        self.inner.log(LogLevel::Info, "sql write access paused");
        Ok(())
    }

    pub fn resume_write_access(&self) -> Result<(), SqlError> {
        if !self.inner.write_paused.send_if_modified(|paused| std::mem::replace(paused, false)) {
            return Err(SqlError::NotPaused);
        }
        self.inner.log(LogLevel::Info, "sql write access resumed");
        Ok(())
    }

    /// Start a new statistics epoch, logging the current one if any.
    pub fn start_tracking_query_stats(&self) {
        let previous = lock(&self.inner.stats).replace(QueryStats::new());
        if let Some(previous) = previous {
            self.inner
                .log(LogLevel::Info, &previous.summary(&QueryStatsOptions::default()));
        }
    }

    /// End the current statistics epoch and log its summary.
    pub fn stop_tracking_query_stats(&self, options: QueryStatsOptions) -> Option<QueryStats> {
        let stats = lock(&self.inner.stats).take()?;
        self.inner.log(LogLevel::Info, &stats.summary(&options));
        Some(stats)
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn ready_link(&self) -> Result<Link, SqlError> {
        let mut lifecycle = self.inner.lifecycle.subscribe();
        let state = lifecycle
            .wait_for(|state| *state != Lifecycle::Initializing)
            .await
            .map(|state| (*state).clone())
            .map_err(|_| SqlError::AlreadyClosed)?;
        match state {
            Lifecycle::Ready => lock(&self.inner.link)
                .clone()
                .ok_or(SqlError::WorkerTerminated),
            Lifecycle::Uninitialized | Lifecycle::Initializing => Err(SqlError::NotInitialized),
            Lifecycle::Failed(reason) => Err(SqlError::InitializationFailed(reason)),
            Lifecycle::Closing | Lifecycle::Closed => Err(SqlError::AlreadyClosed),
        }
    }

    /// The current worker link, starting a worker if there is none.
    fn ensure_worker(&self, seed: WorkerSeed) -> Result<Link, SqlError> {
        let mut slot = lock(&self.inner.link);
        if let Some(link) = slot.as_ref() {
            return Ok(link.clone());
        }
        let link = self.spawn_link(seed)?;
        *slot = Some(link.clone());
        Ok(link)
    }

    fn spawn_link(&self, seed: WorkerSeed) -> Result<Link, SqlError> {
        let channels = self.inner.spawner.spawn(seed)?;
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let (exited_tx, exited_rx) = watch::channel(false);
        tokio::spawn(read_responses(
            Arc::downgrade(&self.inner),
            channels.responses,
            Arc::clone(&pending),
            exited_tx,
        ));
        Ok(Link {
            requests: channels.requests,
            pending,
            exited: exited_rx,
        })
    }

    fn trace_duration(&self, method: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        if let Some(stats) = lock(&self.inner.stats).as_mut() {
            stats.record(method, ms);
        }
        if self.inner.config.time_queries {
            self.inner
                .log(LogLevel::Info, &format!("query: {method} duration={ms:.1}ms"));
        } else if elapsed > self.inner.config.slow_call_threshold() {
            self.inner.log(
                LogLevel::Info,
                &format!("slow call {method} duration={}ms", elapsed.as_millis()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use proptest::prelude::*;

    fn reply(seq: u64) -> String {
        encode(&Response::CallResult {
            seq,
            error: None,
            value: Some(Value::from(seq * 10)),
        })
        .unwrap()
    }

    proptest! {
        #[test]
        fn replies_land_on_their_own_seq(order in Just((1u64..=16).collect::<Vec<_>>()).prop_shuffle()) {
            let pending = Mutex::new(PendingTable::default());
            let mut receivers: Vec<_> = (1u64..=16)
                .map(|seq| (seq, lock(&pending).insert(seq, format!("call(m{seq})")).unwrap()))
                .collect();

            for seq in order {
                dispatch(None, &pending, &reply(seq)).unwrap();
            }

            for (seq, rx) in receivers.iter_mut() {
                let value = rx.try_recv().unwrap().unwrap();
                prop_assert_eq!(value, Value::from(*seq * 10));
            }
            prop_assert!(lock(&pending).entries.is_empty());
        }
    }

    #[test]
    fn test_unknown_seq_is_a_protocol_fault() {
        let pending = Mutex::new(PendingTable::default());
        let err = dispatch(None, &pending, &reply(7)).unwrap_err();
        assert!(matches!(err, SqlError::Protocol(ref m) if m.contains("seq 7")));
    }

    #[test]
    fn test_closed_table_rejects_new_entries() {
        let mut table = PendingTable::default();
        let mut rx = table.insert(1, "call(getAllItems)".to_string()).unwrap();
        table.fail_all(SqlError::WorkerTerminated);

        assert!(matches!(rx.try_recv().unwrap(), Err(SqlError::WorkerTerminated)));
        assert!(matches!(
            table.insert(2, "call(getAllItems)".to_string()),
            Err(SqlError::WorkerTerminated)
        ));
    }

    #[test]
    fn test_reader_guard_fails_pending_on_drop() {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let mut rx = lock(&pending).insert(1, "call(getAllItems)".to_string()).unwrap();

        let guard = ReaderGuard {
            pending: Arc::clone(&pending),
        };
        drop(guard);

        assert!(matches!(rx.try_recv().unwrap(), Err(SqlError::WorkerTerminated)));
        assert!(lock(&pending).insert(2, "call(getAllItems)".to_string()).is_err());
    }

    #[test]
    fn test_duplicate_seq_is_rejected() {
        let mut table = PendingTable::default();
        let _rx = table.insert(3, "init".to_string()).unwrap();
        assert!(matches!(table.insert(3, "init".to_string()), Err(SqlError::Protocol(_))));
    }
}
