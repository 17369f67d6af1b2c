//! A fully wired [`Bridge`] over recording collaborators.
//!
//! Both endpoints serve on ephemeral ports, so tests can run in parallel.
//! The cache starts with one stored message so relocation has something to
//! copy.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use mailbridge::{
    Bridge, BridgeBuilder, FatalError, FatalReceiver, fatal,
    integration::NoopAutostarter,
    locator::{Locations, Locator, gluon_store_path},
    vault::Settings,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use super::mocks::{
    CountingDirOps, CountingUpdater, Journal, RecordingImapFactory, RecordingSmtp, TestVault,
};

pub const SEEDED_MESSAGE: &str = "u1/inbox/1.eml";

pub struct Harness {
    pub root: TempDir,
    pub bridge: Bridge,
    pub journal: Journal,
    pub vault: Arc<TestVault>,
    pub imap: Arc<RecordingImapFactory>,
    pub smtp: Arc<RecordingSmtp>,
    pub dir_ops: Arc<CountingDirOps>,
    pub updater: Arc<CountingUpdater>,
    pub autostarter: Arc<NoopAutostarter>,
    pub locations: Locations,
    fatal: FatalReceiver,
}

impl Harness {
    /// Build the bridge, seed the store and start serving.
    pub async fn start() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let locations = Locations::new(root.path().join("base"));
        let journal = Journal::default();

        let vault = Arc::new(TestVault::new(Settings {
            imap_port: 0,
            smtp_port: 0,
            ..Settings::with_gluon_dir(locations.gluon_cache_path().expect("cache path"))
        }));
        let imap = Arc::new(RecordingImapFactory::new(journal.clone()));
        let smtp = Arc::new(RecordingSmtp::new(journal.clone()));
        let dir_ops = Arc::new(CountingDirOps::new(journal.clone()));
        let updater = Arc::new(CountingUpdater::default());
        let autostarter = Arc::new(NoopAutostarter::new(false));

        let (reporter, fatal) = fatal::channel();
        let bridge = BridgeBuilder::new(
            vault.clone(),
            Arc::new(locations.clone()),
            imap.clone(),
            smtp.clone(),
        )
        .dir_ops(dir_ops.clone())
        .updater(updater.clone())
        .autostarter(autostarter.clone())
        .build(reporter)
        .expect("build bridge");

        let seeded = gluon_store_path(&bridge.gluon_cache_dir()).join(SEEDED_MESSAGE);
        std::fs::create_dir_all(seeded.parent().expect("parent")).expect("seed dirs");
        std::fs::write(&seeded, b"Subject: hello\r\n\r\nworld\r\n").expect("seed message");

        bridge.start().await.expect("start bridge");
        journal.clear();

        Self {
            root,
            bridge,
            journal,
            vault,
            imap,
            smtp,
            dir_ops,
            updater,
            autostarter,
            locations,
            fatal,
        }
    }

    /// A directory outside the current cache to move it to.
    pub fn target(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    /// First line sent by the IMAP server currently in use, if it serves.
    pub async fn imap_banner(&self) -> Option<String> {
        banner(self.imap.latest().local_addr().await?).await
    }

    /// First line sent by the SMTP server, if it serves.
    pub async fn smtp_banner(&self) -> Option<String> {
        banner(self.smtp.local_addr().await?).await
    }

    /// Wait briefly for a fatal error.
    pub async fn next_fatal(&mut self) -> Option<FatalError> {
        timeout(Duration::from_secs(1), self.fatal.recv())
            .await
            .ok()
            .flatten()
    }

    /// Whether a fatal error has been reported without waiting.
    pub fn no_fatal(&mut self) -> bool {
        self.fatal.try_recv().is_err()
    }

    pub async fn shutdown(&self) {
        self.bridge.stop().await;
    }
}

async fn banner(address: SocketAddr) -> Option<String> {
    let stream = timeout(Duration::from_secs(2), TcpStream::connect(address))
        .await
        .ok()?
        .ok()?;

    let mut lines = BufReader::new(stream).lines();
    timeout(Duration::from_secs(2), lines.next_line())
        .await
        .ok()?
        .ok()?
}
