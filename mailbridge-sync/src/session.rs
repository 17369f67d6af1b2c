use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use mailbridge_common::internal;

use crate::{
    Message, SyncCache, SyncConfig,
    error::{DownloadError, Result, SyncError},
};

/// Source of message records and attachment payloads, usually the remote
/// mail service's API client.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn message(&self, id: &str) -> std::result::Result<Message, DownloadError>;

    async fn attachment(&self, id: &str) -> std::result::Result<Vec<u8>, DownloadError>;
}

/// One attachment handed over by [`SyncSession::take`].
pub type Attachment = (String, Arc<[u8]>);

/// A single synchronization pass
///
/// The session owns its [`SyncCache`]; nothing outside the session ever sees
/// it. Producers fill the cache through [`SyncSession::prefetch`], the
/// consumer drains it one message at a time with [`SyncSession::take`], and
/// [`SyncSession::finish`] resets it at the end of the pass.
pub struct SyncSession<D: Downloader> {
    downloader: Arc<D>,
    cache: SyncCache,
    config: SyncConfig,
}

impl<D: Downloader> SyncSession<D> {
    /// # Errors
    /// If `config` asks for zero workers or an empty batch.
    pub fn new(downloader: Arc<D>, config: SyncConfig) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(SyncError::InvalidConfiguration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(SyncError::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            downloader,
            cache: SyncCache::new(),
            config,
        })
    }

    pub const fn cache(&self) -> &SyncCache {
        &self.cache
    }

    /// Download `ids` and their attachments into the cache.
    ///
    /// Ids are processed in batches of `batch_size`, with at most
    /// `max_workers` downloads in flight. A message is only stored once all
    /// of its attachments are, so a consumer never sees a message whose
    /// payloads are still missing.
    ///
    /// Returns the number of messages cached.
    ///
    /// # Errors
    /// [`SyncError::Download`] listing every id that failed. Messages that
    /// did download remain in the cache.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn prefetch<I, S>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let mut cached = 0;
        let mut failed = Vec::new();

        for batch in ids.chunks(self.config.batch_size) {
            let downloads: Vec<_> = batch
                .iter()
                .map(|id| async move { (id, self.fetch(id).await) })
                .collect();
            let results: Vec<_> = stream::iter(downloads)
                .buffer_unordered(self.config.max_workers)
                .collect()
                .await;

            for (id, result) in results {
                match result {
                    Ok(()) => cached += 1,
                    Err(err) => {
                        internal!(level = WARN, "Failed to download message {id}: {err}");
                        failed.push((id.clone(), err));
                    }
                }
            }

            internal!(
                level = DEBUG,
                "Prefetched batch of {}, {} messages and {} attachments cached",
                batch.len(),
                self.cache.message_count(),
                self.cache.attachment_count()
            );
        }

        if failed.is_empty() {
            Ok(cached)
        } else {
            Err(SyncError::Download { failed })
        }
    }

    async fn fetch(&self, id: &str) -> std::result::Result<(), DownloadError> {
        let message = self.downloader.message(id).await?;

        for attachment in message.attachment_ids() {
            if self.cache.get_attachment(attachment).is_some() {
                continue;
            }
            let data = self.downloader.attachment(attachment).await?;
            self.cache.store_attachment(attachment, data);
        }

        self.cache.store_message(message);
        Ok(())
    }

    /// Hand a cached message and its attachment payloads to the caller,
    /// evicting them from the cache.
    ///
    /// Attachments missing from the cache are left out of the returned list.
    /// An attachment also referenced by another cached message stays cached
    /// for that message.
    pub fn take(&self, id: &str) -> Option<(Message, Vec<Attachment>)> {
        let message = self.cache.get_message(id)?;

        let attachments: Vec<Attachment> = message
            .attachment_ids()
            .filter_map(|a| {
                self.cache
                    .get_attachment(a)
                    .map(|data| (a.to_string(), data))
            })
            .collect();

        self.cache.delete_messages([id]);

        let unshared: Vec<&str> = {
            let remaining = self.cache.messages.read();
            message
                .attachment_ids()
                .filter(|a| {
                    !remaining
                        .values()
                        .any(|m| m.attachment_ids().any(|other| other == *a))
                })
                .collect()
        };
        self.cache.delete_attachments(unshared);

        Some((message, attachments))
    }

    /// End the pass, releasing whatever the consumer did not take.
    pub fn finish(&self) {
        let (messages, attachments) = (self.cache.message_count(), self.cache.attachment_count());
        if messages > 0 || attachments > 0 {
            internal!(
                level = DEBUG,
                "Sync pass finished with {messages} messages and {attachments} attachments unconsumed"
            );
        }
        self.cache.clear();
    }
}
