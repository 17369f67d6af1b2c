//! Collaborators that record what the bridge asks of them.
//!
//! Every call lands in a shared [`Journal`], so tests can assert on the
//! order of operations across collaborators. Failures are switched on with
//! the `fail_*` flags.

use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use mailbridge::{
    ServiceError, UserBinding, VaultError,
    fsops::{DirOps, LocalDirOps},
    integration::UpdateTrigger,
    server::{ImapServer, ImapServerFactory, SmtpServer, TcpImapServer, TcpSmtpServer},
    vault::{Settings, UpdateChannel, Vault},
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Ordered log of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    /// Position of the last entry equal to `entry`.
    pub fn last_position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().rposition(|e| e == entry)
    }
}

pub struct RecordingImap {
    inner: Arc<TcpImapServer>,
    journal: Journal,
}

#[async_trait]
impl ImapServer for RecordingImap {
    async fn add_user(&self, user: &UserBinding) -> Result<(), ServiceError> {
        self.journal.push(format!("imap.add_user:{}", user.user_id));
        self.inner.add_user(user).await
    }

    async fn update_user(&self, user: &UserBinding) -> Result<(), ServiceError> {
        self.journal.push(format!("imap.update_user:{}", user.user_id));
        self.inner.update_user(user).await
    }

    async fn remove_user(&self, user_id: &str) -> Result<(), ServiceError> {
        self.journal.push(format!("imap.remove_user:{user_id}"));
        self.inner.remove_user(user_id).await
    }

    async fn serve(&self, address: SocketAddr, tls: bool) -> Result<(), ServiceError> {
        self.journal.push("imap.serve");
        self.inner.serve(address, tls).await
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.journal.push("imap.close");
        self.inner.close().await
    }
}

/// Builds real [`TcpImapServer`]s and remembers them.
pub struct RecordingImapFactory {
    journal: Journal,
    built: Mutex<Vec<Arc<TcpImapServer>>>,
    pub fail_build: AtomicBool,
}

impl RecordingImapFactory {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            built: Mutex::default(),
            fail_build: AtomicBool::new(false),
        }
    }

    pub fn latest(&self) -> Arc<TcpImapServer> {
        Arc::clone(self.built.lock().last().expect("no IMAP server built yet"))
    }

    pub fn build_count(&self) -> usize {
        self.built.lock().len()
    }
}

impl ImapServerFactory for RecordingImapFactory {
    fn build(&self, cache_dir: &Path, data_dir: &Path) -> Result<Arc<dyn ImapServer>, ServiceError> {
        self.journal.push("imap.build");

        if self.fail_build.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("build refused".to_string()));
        }

        let server = Arc::new(TcpImapServer::new(cache_dir, data_dir)?);
        self.built.lock().push(Arc::clone(&server));

        Ok(Arc::new(RecordingImap {
            inner: server,
            journal: self.journal.clone(),
        }))
    }
}

pub struct RecordingSmtp {
    inner: TcpSmtpServer,
    journal: Journal,
    pub fail_close: AtomicBool,
}

impl RecordingSmtp {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: TcpSmtpServer::new(),
            journal,
            fail_close: AtomicBool::new(false),
        }
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().await
    }
}

#[async_trait]
impl SmtpServer for RecordingSmtp {
    async fn serve(&self, address: SocketAddr, tls: bool) -> Result<(), ServiceError> {
        self.journal.push("smtp.serve");
        self.inner.serve(address, tls).await
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.journal.push("smtp.close");

        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("close refused".to_string()));
        }

        self.inner.close().await
    }
}

/// Held by [`CountingDirOps::copy_tree`] until the test lets it go.
pub struct Gate {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// [`LocalDirOps`] with call counting, failure injection and a gate.
pub struct CountingDirOps {
    journal: Journal,
    copies: AtomicUsize,
    removed: Mutex<Vec<PathBuf>>,
    gate: Mutex<Option<Gate>>,
    pub fail_copy: AtomicBool,
    pub panic_copy: AtomicBool,
}

impl CountingDirOps {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            copies: AtomicUsize::new(0),
            removed: Mutex::default(),
            gate: Mutex::default(),
            fail_copy: AtomicBool::new(false),
            panic_copy: AtomicBool::new(false),
        }
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().clone()
    }

    /// Make the next copy wait. Returns a receiver that fires once the copy
    /// has started, and the sender that lets it continue.
    pub fn hold_next_copy(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered, entered_rx) = oneshot::channel();
        let (release_tx, release) = oneshot::channel();
        *self.gate.lock() = Some(Gate { entered, release });
        (entered_rx, release_tx)
    }
}

impl DirOps for CountingDirOps {
    fn copy_tree(&self, src: &Path, dst: &Path) -> io::Result<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.journal.push("dir.copy");

        let gate = self.gate.lock().take();
        if let Some(Gate { entered, release }) = gate {
            let _ = entered.send(());
            let _ = release.blocking_recv();
        }

        assert!(!self.panic_copy.load(Ordering::SeqCst), "copy exploded");

        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        }

        LocalDirOps.copy_tree(src, dst)
    }

    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        self.journal.push("dir.remove");
        self.removed.lock().push(path.to_path_buf());
        LocalDirOps.remove_tree(path)
    }
}

/// In-memory vault that can be told to refuse cache directory changes.
pub struct TestVault {
    settings: Mutex<Settings>,
    pub fail_gluon_dir: AtomicBool,
}

impl TestVault {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            fail_gluon_dir: AtomicBool::new(false),
        }
    }
}

impl Vault for TestVault {
    fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut Settings)) -> Result<(), VaultError> {
        let mut current = self.settings.lock();
        let mut next = current.clone();
        f(&mut next);

        if next.gluon_dir != current.gluon_dir && self.fail_gluon_dir.load(Ordering::SeqCst) {
            return Err(VaultError::ReadOnly("gluon_dir".to_string()));
        }

        *current = next;
        Ok(())
    }

    fn reset(&self, gluon_dir: &Path) -> Result<(), VaultError> {
        *self.settings.lock() = Settings::with_gluon_dir(gluon_dir);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CountingUpdater {
    checks: Mutex<Vec<UpdateChannel>>,
}

impl CountingUpdater {
    pub fn checks(&self) -> Vec<UpdateChannel> {
        self.checks.lock().clone()
    }
}

impl UpdateTrigger for CountingUpdater {
    fn check_now(&self, channel: UpdateChannel) {
        self.checks.lock().push(channel);
    }
}
