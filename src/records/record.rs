use serde::{Deserialize, Serialize};

/// Identifier pair produced by the listing call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

impl MessageRef {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// One unit of input for the worker pool: the id of a message to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    id: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl From<&MessageRef> for WorkItem {
    fn from(value: &MessageRef) -> Self {
        Self::new(value.id.clone())
    }
}

impl From<MessageRef> for WorkItem {
    fn from(value: MessageRef) -> Self {
        Self { id: value.id }
    }
}

/// Normalized message metadata emitted once per successfully fetched id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub thread_id: String,
    pub timestamp_seconds: i64,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub mailing_list: String,
    pub subject: String,
    pub snippet: String,
    pub body_text: String,
}
