// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The database worker: a dedicated OS thread that owns the message store.
//
// The thread runs its own current-thread tokio runtime inside a `LocalSet`.
// Frames arrive on one unbounded channel and replies leave on another; the
// store itself never crosses the thread boundary. `Call` requests run as
// concurrent local tasks, so replies may leave in a different order than
// the requests arrived. `Init`, `Close` and `RemoveStorage` wait for every
// in-flight call to finish first.
//
// The worker never logs locally. Everything goes out as `logRecord` frames
// and is replayed by the client through the logger it was initialized with.

use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::thread;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinSet, LocalSet};

use crate::config::BackendKind;
use crate::engine::{EngineError, MessageStore, Operation, StorageLocation};
use crate::error::SqlError;
use crate::protocol::{self, Frame, LogLevel, Request, Response, WireError, WrappedRequest};

/// OS thread name of the database worker.
pub const WORKER_THREAD_NAME: &str = "parley-sql-worker";

/// Data the worker starts with, before any request arrives.
#[derive(Debug, Clone, Default)]
pub struct WorkerSeed {
    /// Storage location known up front. Lets a fresh worker serve
    /// `RemoveStorage` without an `Init`.
    pub location: Option<StorageLocation>,
}

/// The client's ends of a running worker.
///
/// The worker has exited once `responses` yields `None`.
#[derive(Debug)]
pub struct WorkerChannels {
    pub requests: UnboundedSender<Frame>,
    pub responses: UnboundedReceiver<Frame>,
}

/// Starts workers for a client.
pub trait SpawnWorker: Send + Sync {
    fn spawn(&self, seed: WorkerSeed) -> Result<WorkerChannels, SqlError>;
}

/// Spawns the real worker on a named OS thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadWorker {
    backend: BackendKind,
}

impl ThreadWorker {
    pub fn new(backend: BackendKind) -> Self {
        Self { backend }
    }
}

impl SpawnWorker for ThreadWorker {
    fn spawn(&self, seed: WorkerSeed) -> Result<WorkerChannels, SqlError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let backend = self.backend;

        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outbox = Outbox::new(response_tx);
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        outbox.log(LogLevel::Fatal, format!("worker runtime failed to start: {e}"));
                        return;
                    }
                };
                LocalSet::new().block_on(&runtime, serve(seed, backend, request_rx, outbox));
            })
            .map_err(|e| SqlError::Spawn(e.to_string()))?;

        Ok(WorkerChannels {
            requests: request_tx,
            responses: response_rx,
        })
    }
}

/// The worker's sending half: replies and forwarded log records.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: UnboundedSender<Frame>,
}

impl Outbox {
    pub fn new(tx: UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    /// Send the one `CallResult` owed for request `seq`.
    pub fn reply(&self, seq: u64, result: Result<Value, EngineError>) {
        let response = match result {
            Ok(value) => Response::CallResult {
                seq,
                error: None,
                value: (!value.is_null()).then_some(value),
            },
            Err(err) => Response::CallResult {
                seq,
                error: Some(WireError::from(&err)),
                value: None,
            },
        };
        if let Err(e) = self.send(&response) {
            let fallback = Response::CallResult {
                seq,
                error: Some(WireError {
                    name: "Encode".to_string(),
                    message: e.to_string(),
                    stack: None,
                }),
                value: None,
            };
            if self.send(&fallback).is_err() {
                tracing::error!(seq, "worker could not encode a reply");
            }
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let record = Response::LogRecord {
            level,
            args: vec![Value::String(message.into())],
        };
        if let Err(e) = self.send(&record) {
            tracing::error!(error = %e, "worker could not encode a log record");
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    fn send(&self, response: &Response) -> Result<(), protocol::FrameError> {
        let frame = protocol::encode(response)?;
        // A closed channel means the client is gone; nobody is left to tell.
        let _ = self.tx.send(frame);
        Ok(())
    }
}

/// What the worker owns between requests.
struct WorkerState {
    backend: BackendKind,
    location: Option<StorageLocation>,
    store: Option<Rc<MessageStore>>,
    log: Outbox,
}

impl WorkerState {
    async fn init(&mut self, config_dir: String, key: String) -> Result<Value, EngineError> {
        if self.store.is_some() {
            return Err(EngineError::AlreadyOpen);
        }
        if config_dir.is_empty() {
            return Err(EngineError::MissingConfigDir);
        }
        let location = StorageLocation::new(config_dir);
        // Recorded before opening so a store that fails to open can still
        // be removed.
        self.location = Some(location.clone());
        let store = MessageStore::open(&location, &key, self.backend, &self.log).await?;
        self.store = Some(Rc::new(store));
        Ok(Value::Null)
    }

    async fn close(&mut self) -> Result<Value, EngineError> {
        if let Some(store) = self.store.take() {
            store.close().await?;
        }
        Ok(Value::Null)
    }

    async fn remove(&mut self) -> Result<Value, EngineError> {
        let location = self.location.clone().ok_or(EngineError::LocationUnknown)?;
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close().await {
                self.log.warn(format!("removeDB: closing before removal failed: {e}"));
            }
        }
        match self.backend {
            BackendKind::Memory => {
                self.log.info("removeDB: in-memory store has nothing on disk");
                Ok(Value::Null)
            }
            BackendKind::Redb => {
                MessageStore::remove(&location, &self.log)?;
                Ok(Value::Null)
            }
        }
    }
}

/// Run the dispatch loop until `Close` or until the client hangs up.
pub async fn serve(
    seed: WorkerSeed,
    backend: BackendKind,
    mut requests: UnboundedReceiver<Frame>,
    outbox: Outbox,
) {
    let mut state = WorkerState {
        backend,
        location: seed.location,
        store: None,
        log: outbox.clone(),
    };
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    outbox.error(format!("call task failed: {e}"));
                }
            }
            frame = requests.recv() => {
                let Some(frame) = frame else {
                    outbox.debug("client hung up; shutting down");
                    break;
                };
                let WrappedRequest { seq, request } = match protocol::decode(&frame) {
                    Ok(wrapped) => wrapped,
                    Err(e) => {
                        reject_malformed(&outbox, &frame, e);
                        continue;
                    }
                };
                match request {
                    Request::Call { method, args } => {
                        let store = state.store.clone();
                        let outbox = outbox.clone();
                        in_flight.spawn_local(async move {
                            let result = match store {
                                Some(store) => call(&store, &method, args).await,
                                None => Err(EngineError::NotOpen),
                            };
                            outbox.reply(seq, result);
                        });
                    }
                    Request::Init { config_dir, key } => {
                        drain(&mut in_flight, &outbox).await;
                        let result = state.init(config_dir, key).await;
                        outbox.reply(seq, result);
                    }
                    Request::RemoveStorage => {
                        drain(&mut in_flight, &outbox).await;
                        let result = state.remove().await;
                        outbox.reply(seq, result);
                    }
                    Request::Close => {
                        drain(&mut in_flight, &outbox).await;
                        let result = state.close().await;
                        outbox.reply(seq, result);
                        return;
                    }
                }
            }
        }
    }

    drain(&mut in_flight, &outbox).await;
    if let Err(e) = state.close().await {
        outbox.warn(format!("closing store on shutdown failed: {e}"));
    }
}

async fn call(store: &MessageStore, method: &str, args: Vec<Value>) -> Result<Value, EngineError> {
    let op: Operation = method.parse()?;
    AssertUnwindSafe(op.invoke(store, args))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(EngineError::Panicked(op.name().to_string())))
}

async fn drain(in_flight: &mut JoinSet<()>, outbox: &Outbox) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            outbox.error(format!("call task failed: {e}"));
        }
    }
}

/// Answer an undecodable frame. If it at least carries a seq the caller
/// gets an error reply, otherwise the frame can only be logged.
fn reject_malformed(outbox: &Outbox, frame: &str, err: protocol::FrameError) {
    let seq = serde_json::from_str::<Value>(frame)
        .ok()
        .and_then(|value| value.get("seq").and_then(Value::as_u64));
    match seq {
        Some(seq) => outbox.reply(seq, Err(EngineError::MalformedRequest(err.to_string()))),
        None => outbox.error(format!("dropping request without seq: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Harness {
        requests: UnboundedSender<Frame>,
        responses: UnboundedReceiver<Frame>,
    }

    impl Harness {
        fn send(&self, seq: u64, request: Request) {
            let frame = protocol::encode(&WrappedRequest { seq, request }).unwrap();
            self.requests.send(frame).unwrap();
        }

        /// Next `CallResult`, skipping log records.
        async fn reply(&mut self) -> (u64, Option<WireError>, Option<Value>) {
            loop {
                let frame = self.responses.recv().await.expect("worker exited");
                match protocol::decode::<Response>(&frame).unwrap() {
                    Response::CallResult { seq, error, value } => return (seq, error, value),
                    Response::LogRecord { .. } => continue,
                }
            }
        }
    }

    fn start(local: &LocalSet, seed: WorkerSeed) -> Harness {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        local.spawn_local(serve(seed, BackendKind::Memory, request_rx, Outbox::new(response_tx)));
        Harness {
            requests: request_tx,
            responses: response_rx,
        }
    }

    fn init() -> Request {
        Request::Init {
            config_dir: "/profile".to_string(),
            key: "k".to_string(),
        }
    }

    #[tokio::test]
    async fn test_call_before_init_is_not_open() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let mut worker = start(&local, WorkerSeed::default());
                worker.send(1, Request::Call {
                    method: "getAllItems".to_string(),
                    args: vec![],
                });
                let (seq, error, _) = worker.reply().await;
                assert_eq!(seq, 1);
                assert_eq!(error.unwrap().name, "NotOpen");
            })
            .await;
    }

    #[tokio::test]
    async fn test_every_request_gets_one_reply() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let mut worker = start(&local, WorkerSeed::default());
                worker.send(1, init());
                worker.send(2, Request::Call {
                    method: "createOrUpdateItem".to_string(),
                    args: vec![json!({ "id": "system-tray-setting", "value": "minimize" })],
                });
                worker.send(3, Request::Call {
                    method: "getItemById".to_string(),
                    args: vec![json!("system-tray-setting")],
                });
                worker.send(4, Request::Call {
                    method: "noSuchMethod".to_string(),
                    args: vec![],
                });
                worker.send(5, Request::Close);

                let mut replies = Vec::new();
                for _ in 0..5 {
                    replies.push(worker.reply().await);
                }
                replies.sort_by_key(|(seq, _, _)| *seq);
                let seqs: Vec<u64> = replies.iter().map(|(seq, _, _)| *seq).collect();
                assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

                assert!(replies[0].1.is_none());
                assert_eq!(replies[3].1.as_ref().unwrap().name, "InvalidMethod");
                assert!(replies[4].1.is_none());

                // Close is the last thing the worker does.
                assert!(worker.responses.recv().await.is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn test_malformed_request_with_seq_is_answered() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let mut worker = start(&local, WorkerSeed::default());
                worker
                    .requests
                    .send(r#"{"seq": 9, "request": {"type": "explode"}}"#.to_string())
                    .unwrap();
                let (seq, error, _) = worker.reply().await;
                assert_eq!(seq, 9);
                assert_eq!(error.unwrap().name, "MalformedRequest");
            })
            .await;
    }

    #[tokio::test]
    async fn test_remove_without_location_fails() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let mut worker = start(&local, WorkerSeed::default());
                worker.send(1, Request::RemoveStorage);
                let (_, error, _) = worker.reply().await;
                assert_eq!(error.unwrap().name, "LocationUnknown");
            })
            .await;
    }

    #[tokio::test]
    async fn test_second_init_is_rejected() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let mut worker = start(&local, WorkerSeed::default());
                worker.send(1, init());
                worker.send(2, init());
                let (_, first, _) = worker.reply().await;
                let (_, second, _) = worker.reply().await;
                assert!(first.is_none());
                assert_eq!(second.unwrap().name, "AlreadyOpen");
            })
            .await;
    }
}
