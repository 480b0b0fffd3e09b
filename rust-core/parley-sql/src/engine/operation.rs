// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The closed set of storage operations a client may call by name.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::records::{ConversationRecord, ItemRecord, MessageRecord, SessionRecord};
use super::{EngineError, MessageStore};

/// Default page size for `getMessagesByConversation`.
pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

/// Whether an operation mutates the store.
///
/// Write operations are held back while write access is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateOrUpdateItem,
    GetItemById,
    GetAllItems,
    RemoveItemById,
    RemoveAllItems,
    SaveConversation,
    UpdateConversation,
    GetConversationById,
    GetAllConversations,
    GetConversationCount,
    RemoveConversation,
    SaveMessage,
    SaveMessages,
    GetMessageById,
    GetMessageCount,
    GetMessagesByConversation,
    RemoveMessage,
    CreateOrUpdateSession,
    GetSessionById,
    RemoveSessionsByConversation,
    RemoveAll,
}

impl Operation {
    pub const ALL: [Operation; 21] = [
        Operation::CreateOrUpdateItem,
        Operation::GetItemById,
        Operation::GetAllItems,
        Operation::RemoveItemById,
        Operation::RemoveAllItems,
        Operation::SaveConversation,
        Operation::UpdateConversation,
        Operation::GetConversationById,
        Operation::GetAllConversations,
        Operation::GetConversationCount,
        Operation::RemoveConversation,
        Operation::SaveMessage,
        Operation::SaveMessages,
        Operation::GetMessageById,
        Operation::GetMessageCount,
        Operation::GetMessagesByConversation,
        Operation::RemoveMessage,
        Operation::CreateOrUpdateSession,
        Operation::GetSessionById,
        Operation::RemoveSessionsByConversation,
        Operation::RemoveAll,
    ];

    /// The wire name used in `call` requests.
    pub fn name(self) -> &'static str {
        match self {
            Operation::CreateOrUpdateItem => "createOrUpdateItem",
            Operation::GetItemById => "getItemById",
            Operation::GetAllItems => "getAllItems",
            Operation::RemoveItemById => "removeItemById",
            Operation::RemoveAllItems => "removeAllItems",
            Operation::SaveConversation => "saveConversation",
            Operation::UpdateConversation => "updateConversation",
            Operation::GetConversationById => "getConversationById",
            Operation::GetAllConversations => "getAllConversations",
            Operation::GetConversationCount => "getConversationCount",
            Operation::RemoveConversation => "removeConversation",
            Operation::SaveMessage => "saveMessage",
            Operation::SaveMessages => "saveMessages",
            Operation::GetMessageById => "getMessageById",
            Operation::GetMessageCount => "getMessageCount",
            Operation::GetMessagesByConversation => "getMessagesByConversation",
            Operation::RemoveMessage => "removeMessage",
            Operation::CreateOrUpdateSession => "createOrUpdateSession",
            Operation::GetSessionById => "getSessionById",
            Operation::RemoveSessionsByConversation => "removeSessionsByConversation",
            Operation::RemoveAll => "removeAll",
        }
    }

    pub fn access(self) -> Access {
        match self {
            Operation::GetItemById
            | Operation::GetAllItems
            | Operation::GetConversationById
            | Operation::GetAllConversations
            | Operation::GetConversationCount
            | Operation::GetMessageById
            | Operation::GetMessageCount
            | Operation::GetMessagesByConversation
            | Operation::GetSessionById => Access::Read,
            _ => Access::Write,
        }
    }

    /// Accepted argument counts.
    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            Operation::GetAllItems
            | Operation::RemoveAllItems
            | Operation::GetAllConversations
            | Operation::GetConversationCount
            | Operation::RemoveAll => 0..=0,
            Operation::GetMessageCount => 0..=1,
            Operation::GetMessagesByConversation => 1..=2,
            _ => 1..=1,
        }
    }

    /// Validate `args` and run the operation against `store`.
    pub async fn invoke(self, store: &MessageStore, args: Vec<Value>) -> Result<Value, EngineError> {
        let mut args = Args::new(self, args)?;
        match self {
            Operation::CreateOrUpdateItem => {
                let item: ItemRecord = args.take()?;
                store.items().put(&item.id, &item).await?;
                Ok(Value::Null)
            }
            Operation::GetItemById => {
                let id: String = args.take()?;
                to_value(store.items().get::<ItemRecord>(&id).await?)
            }
            Operation::GetAllItems => to_value(store.items().all::<ItemRecord>().await?),
            Operation::RemoveItemById => {
                let id: String = args.take()?;
                to_value(store.items().delete(&id).await?)
            }
            Operation::RemoveAllItems => to_value(store.items().clear().await?),
            Operation::SaveConversation => {
                let conversation: ConversationRecord = args.take()?;
                store.conversations().put(&conversation.id, &conversation).await?;
                Ok(Value::Null)
            }
            Operation::UpdateConversation => {
                let conversation: ConversationRecord = args.take()?;
                let conversations = store.conversations();
                if conversations.get::<Value>(&conversation.id).await?.is_none() {
                    return Err(EngineError::NotFound(format!(
                        "conversation {}",
                        conversation.id
                    )));
                }
                conversations.put(&conversation.id, &conversation).await?;
                Ok(Value::Null)
            }
            Operation::GetConversationById => {
                let id: String = args.take()?;
                to_value(store.conversations().get::<ConversationRecord>(&id).await?)
            }
            Operation::GetAllConversations => {
                to_value(store.conversations().all::<ConversationRecord>().await?)
            }
            Operation::GetConversationCount => to_value(store.conversations().count().await?),
            Operation::RemoveConversation => {
                let id: String = args.take()?;
                to_value(store.conversations().delete(&id).await?)
            }
            Operation::SaveMessage => {
                let message: MessageRecord = args.take()?;
                store.messages().put(&message.id, &message).await?;
                Ok(Value::String(message.id))
            }
            Operation::SaveMessages => {
                let messages: Vec<MessageRecord> = args.take()?;
                let entries: Vec<(String, MessageRecord)> =
                    messages.into_iter().map(|m| (m.id.clone(), m)).collect();
                store.messages().put_many(&entries).await?;
                to_value(entries.len())
            }
            Operation::GetMessageById => {
                let id: String = args.take()?;
                to_value(store.messages().get::<MessageRecord>(&id).await?)
            }
            Operation::GetMessageCount => match args.take_optional::<String>()? {
                Some(conversation_id) => {
                    let count = store
                        .messages()
                        .all::<MessageRecord>()
                        .await?
                        .iter()
                        .filter(|m| m.conversation_id == conversation_id)
                        .count();
                    to_value(count)
                }
                None => to_value(store.messages().count().await?),
            },
            Operation::GetMessagesByConversation => {
                let conversation_id: String = args.take()?;
                let limit = args
                    .take_optional::<usize>()?
                    .unwrap_or(DEFAULT_MESSAGE_LIMIT);
                to_value(store.messages_in_conversation(&conversation_id, limit).await?)
            }
            Operation::RemoveMessage => {
                let id: String = args.take()?;
                to_value(store.messages().delete(&id).await?)
            }
            Operation::CreateOrUpdateSession => {
                let session: SessionRecord = args.take()?;
                store.sessions().put(&session.id, &session).await?;
                Ok(Value::Null)
            }
            Operation::GetSessionById => {
                let id: String = args.take()?;
                to_value(store.sessions().get::<SessionRecord>(&id).await?)
            }
            Operation::RemoveSessionsByConversation => {
                let conversation_id: String = args.take()?;
                to_value(store.remove_sessions_by_conversation(&conversation_id).await?)
            }
            Operation::RemoveAll => store.remove_all().await,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| EngineError::InvalidMethod(s.to_string()))
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Storage(parley_storage::StorageError::from(e)))
}

/// Positional arguments of one call, consumed front to back.
struct Args {
    method: &'static str,
    values: std::vec::IntoIter<Value>,
}

impl Args {
    fn new(op: Operation, values: Vec<Value>) -> Result<Self, EngineError> {
        let arity = op.arity();
        if !arity.contains(&values.len()) {
            let expected = if arity.start() == arity.end() {
                arity.start().to_string()
            } else {
                format!("{} to {}", arity.start(), arity.end())
            };
            return Err(EngineError::InvalidArguments {
                method: op.name(),
                reason: format!("expected {expected} argument(s), got {}", values.len()),
            });
        }
        Ok(Self {
            method: op.name(),
            values: values.into_iter(),
        })
    }

    fn take<T: DeserializeOwned>(&mut self) -> Result<T, EngineError> {
        let value = self.values.next().unwrap_or(Value::Null);
        self.decode(value)
    }

    /// A trailing argument that may be absent or `null`.
    fn take_optional<T: DeserializeOwned>(&mut self) -> Result<Option<T>, EngineError> {
        match self.values.next() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.decode(value).map(Some),
        }
    }

    fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T, EngineError> {
        serde_json::from_value(value).map_err(|e| EngineError::InvalidArguments {
            method: self.method,
            reason: e.to_string(),
        })
    }
}
