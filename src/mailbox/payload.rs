//! Wire shapes returned by the mailbox REST surface. Only the fields the
//! record parser consumes are modelled; everything else is ignored by serde.

use serde::{Deserialize, Serialize};

/// A message as returned by `users.messages.get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub snippet: String,
    /// Epoch milliseconds, encoded by the API as a decimal string.
    pub internal_date: Option<String>,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePart {
    pub mime_type: String,
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartBody {
    pub size: u64,
    /// base64url-encoded content.
    pub data: Option<String>,
}

/// One page of `users.messages.list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePage {
    pub messages: Vec<ListedMessage>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListedMessage {
    pub id: String,
    pub thread_id: String,
}

impl MessagePage {
    /// Continuation cursor, treating an empty token the same as a missing one.
    pub fn cursor(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}
