// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end tests: a real worker thread serving a real store.

use std::sync::{Arc, Mutex};

use parley_sql::{Lifecycle, LogLevel, SqlClient, SqlConfig, SqlError, SqlLogger, StorageLocation};
use serde_json::json;

#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(_, line)| line.contains(needle))
    }
}

impl SqlLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

async fn open(dir: &std::path::Path, key: &str) -> (SqlClient, Arc<RecordingLogger>) {
    let client = SqlClient::new(SqlConfig::default());
    let logger = Arc::new(RecordingLogger::default());
    client
        .initialize(dir, key, logger.clone())
        .await
        .unwrap();
    (client, logger)
}

#[tokio::test]
async fn test_messages_persist_across_clients() {
    let dir = tempfile::tempdir().unwrap();
    let (sql, logger) = open(dir.path(), "profile-key").await;
    assert!(logger.contains("worker: opened redb store"));

    let message = json!({ "id": "m1", "conversationId": "c1", "sentAt": 10, "body": "hello" });
    assert_eq!(sql.call("saveMessage", vec![message]).await.unwrap(), json!("m1"));
    sql.call(
        "saveMessages",
        vec![json!([
            { "id": "m2", "conversationId": "c1", "sentAt": 20 },
            { "id": "m3", "conversationId": "c2", "sentAt": 30 }
        ])],
    )
    .await
    .unwrap();
    sql.close().await.unwrap();

    assert!(StorageLocation::new(dir.path()).database_file().exists());

    let (sql, _) = open(dir.path(), "profile-key").await;
    let fetched = sql.call("getMessageById", vec![json!("m1")]).await.unwrap();
    assert_eq!(fetched["body"], json!("hello"));

    let history = sql
        .call("getMessagesByConversation", vec![json!("c1")])
        .await
        .unwrap();
    let ids: Vec<_> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["m2", "m1"]);
    sql.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_method_and_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let (sql, _) = open(dir.path(), "k").await;

    let err = sql.call("dropAllTables", vec![]).await.unwrap_err();
    let remote = err.remote().expect("remote error");
    assert_eq!(remote.name, "InvalidMethod");
    assert_eq!(remote.context, "call(dropAllTables)");
    assert!(!remote.is_corruption());

    let err = sql
        .call("getItemById", vec![json!(1), json!(2)])
        .await
        .unwrap_err();
    assert_eq!(err.remote().unwrap().name, "InvalidArguments");

    // The worker keeps serving after a bad request.
    assert_eq!(sql.call("getConversationCount", vec![]).await.unwrap(), json!(0));
    sql.close().await.unwrap();
}

#[tokio::test]
async fn test_wrong_key_is_corruption_and_store_can_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (sql, _) = open(dir.path(), "right").await;
    sql.close().await.unwrap();

    let sql = SqlClient::new(SqlConfig::default());
    let err = sql
        .initialize(dir.path(), "wrong", Arc::new(RecordingLogger::default()))
        .await
        .unwrap_err();
    assert!(err.remote().unwrap().is_corruption(), "{err}");
    assert!(sql.when_corrupted().await.message.contains("file is not a database"));
    assert!(matches!(sql.lifecycle(), Lifecycle::Failed(_)));

    sql.remove_storage().await.unwrap();
    assert!(!StorageLocation::new(dir.path()).database_file().exists());
    sql.close().await.unwrap();
}

#[tokio::test]
async fn test_remove_after_close_deletes_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let (sql, logger) = open(dir.path(), "k").await;
    sql.call("createOrUpdateItem", vec![json!({ "id": "theme", "value": "dark" })])
        .await
        .unwrap();
    sql.close().await.unwrap();

    let file = StorageLocation::new(dir.path()).database_file();
    assert!(file.exists());
    sql.remove_storage().await.unwrap();
    assert!(!file.exists());
    assert_eq!(sql.lifecycle(), Lifecycle::Closed);
    assert!(logger.contains("removeDB: removing all database files"));

    let call = sql.call("getAllItems", vec![]).await;
    assert!(matches!(call, Err(SqlError::AlreadyClosed)));
}

#[tokio::test]
async fn test_memory_backend_round_trip() {
    let sql = SqlClient::new(SqlConfig::default().in_memory());
    let logger = Arc::new(RecordingLogger::default());
    sql.initialize("/nonexistent/profile", "k", logger.clone())
        .await
        .unwrap();

    sql.call("createOrUpdateSession", vec![json!({ "id": "s1", "conversationId": "c1" })])
        .await
        .unwrap();
    sql.call("createOrUpdateSession", vec![json!({ "id": "s2", "conversationId": "c2" })])
        .await
        .unwrap();
    let removed = sql
        .call("removeSessionsByConversation", vec![json!("c1")])
        .await
        .unwrap();
    assert_eq!(removed, json!(1));
    assert_eq!(
        sql.call("getSessionById", vec![json!("s1")]).await.unwrap(),
        json!(null)
    );

    sql.remove_storage().await.unwrap();
    assert!(logger.contains("in-memory store has nothing on disk"));
    sql.close().await.unwrap();
}
