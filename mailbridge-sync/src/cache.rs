use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::message::Message;

const INITIAL_CAPACITY: usize = 64;

/// Transient store for records fetched during a synchronization pass
///
/// Messages and attachment payloads live in two independent namespaces, each
/// behind its own `RwLock`. Any number of readers of one namespace proceed in
/// parallel; a writer excludes only the other users of that same namespace, so
/// attachment traffic never waits on message traffic and vice versa.
///
/// None of the operations can fail. A missing entry is reported as `None`.
///
/// The cache gives no ordering between separate calls: a caller that needs
/// "store, then delete" to happen in that order must sequence the calls itself.
#[derive(Debug)]
pub struct SyncCache {
    pub(crate) messages: RwLock<HashMap<String, Message>>,
    pub(crate) attachments: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl SyncCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::with_capacity(INITIAL_CAPACITY)),
            attachments: RwLock::new(HashMap::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Insert `message` under its own id, replacing any previous record.
    pub fn store_message(&self, message: Message) {
        self.messages.write().insert(message.id.clone(), message);
    }

    /// Insert an attachment payload, replacing any previous payload for `id`.
    pub fn store_attachment(&self, id: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.attachments.write().insert(id.into(), data.into());
    }

    /// Remove the given messages. Unknown ids are ignored.
    pub fn delete_messages<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut messages = self.messages.write();
        for id in ids {
            messages.remove(id.as_ref());
        }
    }

    /// Remove the given attachments. Unknown ids are ignored.
    pub fn delete_attachments<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut attachments = self.attachments.write();
        for id in ids {
            attachments.remove(id.as_ref());
        }
    }

    #[must_use]
    pub fn get_message(&self, id: &str) -> Option<Message> {
        self.messages.read().get(id).cloned()
    }

    /// Payloads are reference counted, so this never copies the bytes.
    #[must_use]
    pub fn get_attachment(&self, id: &str) -> Option<Arc<[u8]>> {
        self.attachments.read().get(id).cloned()
    }

    /// Drop everything, keeping the cache object itself.
    ///
    /// Messages are swapped out first, then attachments. Each namespace goes
    /// from full to empty in one step, but an observer reading both may see
    /// the messages already gone while the attachments are still present.
    pub fn clear(&self) {
        *self.messages.write() = HashMap::with_capacity(INITIAL_CAPACITY);
        *self.attachments.write() = HashMap::with_capacity(INITIAL_CAPACITY);
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }

    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_count() == 0 && self.attachment_count() == 0
    }
}

impl Default for SyncCache {
    fn default() -> Self {
        Self::new()
    }
}
