use serde::{Deserialize, Serialize};

/// Metadata for one attachment of a [`Message`].
///
/// The payload itself is fetched separately and cached by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// A message record as delivered by the remote mail service.
///
/// The cache only relies on `id`; every other field is carried through
/// untouched for whoever consumes the record downstream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub address_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub to_list: Vec<String>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    /// Armoured, still-encrypted body.
    #[serde(default)]
    pub body: String,
}

impl Message {
    /// Identifiers of every attachment this message references.
    pub fn attachment_ids(&self) -> impl Iterator<Item = &str> {
        self.attachments.iter().map(|a| a.id.as_str())
    }
}
