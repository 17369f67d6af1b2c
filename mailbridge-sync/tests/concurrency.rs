//! The cache and a sync pass under real multi-threaded contention.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use mailbridge_sync::{
    AttachmentRef, Downloader, Message, SyncCache, SyncConfig, SyncSession,
    error::DownloadError,
};

const KEYS: usize = 16;
const WRITERS: usize = 8;
const ROUNDS: usize = 500;

fn stamped(key: usize, stamp: &str) -> Message {
    Message {
        id: format!("k{key}"),
        subject: stamp.to_string(),
        sender: stamp.to_string(),
        body: stamp.repeat(8),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_store_delete_never_tears() {
    let cache = Arc::new(SyncCache::new());

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for round in 0..ROUNDS {
                    let key = (writer + round) % KEYS;
                    cache.store_message(stamped(key, &format!("{writer}-{round}")));

                    if round % 7 == 0 {
                        cache.delete_messages([format!("k{}", (key + 1) % KEYS)]);
                    }
                    if round % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    let reader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for round in 0..ROUNDS * 2 {
                if let Some(message) = cache.get_message(&format!("k{}", round % KEYS)) {
                    assert_eq!(message.subject, message.sender);
                    assert_eq!(message.body, message.subject.repeat(8));
                }
                if round % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    reader.await.unwrap();

    for key in 0..KEYS {
        if let Some(message) = cache.get_message(&format!("k{key}")) {
            assert_eq!(message.id, format!("k{key}"));
            assert_eq!(message.subject, message.sender);
        }
    }

    cache.clear();
    for key in 0..KEYS {
        assert!(cache.get_message(&format!("k{key}")).is_none());
    }
    assert!(cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_attachment_traffic_runs_alongside_message_traffic() {
    let cache = Arc::new(SyncCache::new());

    let messages = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for i in 0..ROUNDS {
                cache.store_message(stamped(i % KEYS, "m"));
            }
        })
    };

    let attachments = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for i in 0..ROUNDS {
                cache.store_attachment(format!("a{i}"), vec![u8::try_from(i % 256).unwrap(); 4]);
                if i % 2 == 0 {
                    cache.delete_attachments([format!("a{i}")]);
                }
            }
        })
    };

    messages.await.unwrap();
    attachments.await.unwrap();

    assert_eq!(cache.message_count(), KEYS);
    assert_eq!(cache.attachment_count(), ROUNDS / 2);
    assert_eq!(&*cache.get_attachment("a1").unwrap(), &[1, 1, 1, 1]);
    assert!(cache.get_attachment("a2").is_none());
}

struct SlowRemote;

#[async_trait]
impl Downloader for SlowRemote {
    async fn message(&self, id: &str) -> Result<Message, DownloadError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(Message {
            id: id.to_string(),
            attachments: vec![AttachmentRef {
                id: format!("{id}-att"),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    async fn attachment(&self, id: &str) -> Result<Vec<u8>, DownloadError> {
        Ok(id.as_bytes().to_vec())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_consumer_drains_while_producer_fills() {
    let config = SyncConfig {
        batch_size: 10,
        max_workers: 4,
    };
    let session = Arc::new(SyncSession::new(Arc::new(SlowRemote), config).unwrap());
    let ids: Vec<String> = (0..60).map(|i| format!("m{i}")).collect();

    let producer = {
        let session = Arc::clone(&session);
        let ids = ids.clone();
        tokio::spawn(async move { session.prefetch(ids).await })
    };

    let consumer = {
        let session = Arc::clone(&session);
        let ids = ids.clone();
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            while seen.len() < ids.len() {
                for id in &ids {
                    if let Some((message, attachments)) = session.take(id) {
                        // A message only becomes visible with its payloads.
                        assert_eq!(attachments.len(), 1);
                        assert_eq!(&*attachments[0].1, format!("{id}-att").as_bytes());
                        assert!(seen.insert(message.id));
                    }
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            seen
        })
    };

    assert_eq!(producer.await.unwrap().unwrap(), ids.len());
    let seen = tokio::time::timeout(Duration::from_secs(10), consumer)
        .await
        .expect("consumer finished")
        .unwrap();

    assert_eq!(seen.len(), ids.len());
    session.finish();
    assert!(session.cache().is_empty());
}
