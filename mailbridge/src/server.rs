//! The network-facing collaborators of the bridge.
//!
//! The bridge only needs to stop, rebuild and restart these; the protocol
//! engines behind them are pluggable. [`TcpImapServer`] and
//! [`TcpSmtpServer`] are the stand-alone implementations: they own the
//! sockets and the account bindings, and answer every connection with a
//! readiness banner, which is what probes and the daemon's own health checks
//! rely on.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use mailbridge_common::{
    Signal,
    error::{ListenerError, SessionError},
    incoming, internal,
    listener::{Listener, Running},
    outgoing,
    traits::{Protocol, SessionHandler},
};
use parking_lot::RwLock;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{Mutex, broadcast::Receiver},
};

use crate::{error::ServiceError, locator::gluon_store_path, users::UserBinding};

/// The mail-retrieval endpoint and the account state behind it.
#[async_trait]
pub trait ImapServer: Send + Sync {
    /// Make an account's mailboxes available to clients.
    async fn add_user(&self, user: &UserBinding) -> Result<(), ServiceError>;

    /// Refresh an already attached account, e.g. after its view settings changed.
    async fn update_user(&self, user: &UserBinding) -> Result<(), ServiceError>;

    async fn remove_user(&self, user_id: &str) -> Result<(), ServiceError>;

    /// Start accepting connections on `address`.
    async fn serve(&self, address: SocketAddr, tls: bool) -> Result<(), ServiceError>;

    /// Stop accepting and close open sessions in an orderly fashion.
    ///
    /// Closing a server that is not serving succeeds.
    async fn close(&self) -> Result<(), ServiceError>;
}

/// Builds a fresh [`ImapServer`] over a given cache location.
pub trait ImapServerFactory: Send + Sync {
    /// # Errors
    /// If the server cannot use `cache_dir` or `data_dir`.
    fn build(&self, cache_dir: &Path, data_dir: &Path) -> Result<Arc<dyn ImapServer>, ServiceError>;
}

/// The mail-submission endpoint.
#[async_trait]
pub trait SmtpServer: Send + Sync {
    async fn serve(&self, address: SocketAddr, tls: bool) -> Result<(), ServiceError>;

    async fn close(&self) -> Result<(), ServiceError>;
}

/// Greets every client with a fixed line and says goodbye on shutdown.
#[derive(Debug, Clone)]
pub struct Banner {
    name: &'static str,
    greeting: String,
    farewell: String,
}

impl Banner {
    pub fn imap(tls: bool) -> Self {
        Self {
            name: "IMAP",
            greeting: format!("* OK [CAPABILITY IMAP4rev1{}] mailbridge ready", if tls { "" } else { " STARTTLS" }),
            farewell: "* BYE mailbridge is shutting down".to_string(),
        }
    }

    pub fn smtp(tls: bool) -> Self {
        Self {
            name: "SMTP",
            greeting: format!("220 mailbridge ESMTP ready{}", if tls { " (TLS)" } else { "" }),
            farewell: "421 mailbridge closing transmission channel".to_string(),
        }
    }
}

pub struct BannerSession {
    stream: TcpStream,
    peer: SocketAddr,
    banner: Banner,
}

impl SessionHandler for BannerSession {
    async fn run(mut self, mut signal: Receiver<Signal>) -> Result<(), SessionError> {
        incoming!("{} connection from {}", self.banner.name, self.peer);

        outgoing!("{}", self.banner.greeting);
        self.stream
            .write_all(format!("{}\r\n", self.banner.greeting).as_bytes())
            .await?;

        let (reader, mut writer) = self.stream.split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => incoming!("{}", line),
                    None => return Ok(()),
                },

                _ = signal.recv() => {
                    outgoing!("{}", self.banner.farewell);
                    writer
                        .write_all(format!("{}\r\n", self.banner.farewell).as_bytes())
                        .await?;
                    writer.shutdown().await?;
                    return Err(SessionError::Shutdown);
                }
            }
        }
    }
}

impl Protocol for Banner {
    type Session = BannerSession;

    fn handle(&self, stream: TcpStream, address: SocketAddr) -> Self::Session {
        BannerSession {
            stream,
            peer: address,
            banner: self.clone(),
        }
    }

    fn ty() -> &'static str {
        "Banner"
    }
}

/// At most one running listener, replaced on each `serve`.
#[derive(Debug, Default)]
struct Slot(Mutex<Option<Running>>);

impl Slot {
    async fn start(&self, service: &'static str, banner: Banner, address: SocketAddr) -> Result<(), ServiceError> {
        let mut slot = self.0.lock().await;
        if slot.is_some() {
            return Err(ListenerError::AlreadyRunning(service).into());
        }
        *slot = Some(Listener::new(banner, address).bind().await?);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        match self.0.lock().await.take() {
            Some(running) => Ok(running.stop().await?),
            None => Ok(()),
        }
    }

    async fn local_addr(&self) -> Option<SocketAddr> {
        self.0.lock().await.as_ref().map(Running::local_addr)
    }
}

/// Stand-alone [`ImapServer`] keeping its store under `cache_dir`.
#[derive(Debug)]
pub struct TcpImapServer {
    cache_dir: PathBuf,
    data_dir: PathBuf,
    users: RwLock<BTreeMap<String, UserBinding>>,
    listener: Slot,
}

impl TcpImapServer {
    /// # Errors
    /// If the store or database directories cannot be created.
    pub fn new(cache_dir: &Path, data_dir: &Path) -> Result<Self, ServiceError> {
        std::fs::create_dir_all(gluon_store_path(cache_dir))?;
        std::fs::create_dir_all(data_dir)?;

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            users: RwLock::default(),
            listener: Slot::default(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn users(&self) -> Vec<UserBinding> {
        self.users.read().values().cloned().collect()
    }

    /// Address actually bound, useful when serving on port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }
}

#[async_trait]
impl ImapServer for TcpImapServer {
    async fn add_user(&self, user: &UserBinding) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all(gluon_store_path(&self.cache_dir).join(&user.user_id)).await?;
        self.users.write().insert(user.user_id.clone(), user.clone());
        internal!(level = DEBUG, "Attached user {} to IMAP server", user.user_id);
        Ok(())
    }

    async fn update_user(&self, user: &UserBinding) -> Result<(), ServiceError> {
        match self.users.write().get_mut(&user.user_id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(ServiceError::UnknownUser(user.user_id.clone())),
        }
    }

    async fn remove_user(&self, user_id: &str) -> Result<(), ServiceError> {
        self.users
            .write()
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::UnknownUser(user_id.to_string()))
    }

    async fn serve(&self, address: SocketAddr, tls: bool) -> Result<(), ServiceError> {
        self.listener.start("IMAP", Banner::imap(tls), address).await
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.listener.stop().await
    }
}

/// Builds [`TcpImapServer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpImapServerFactory;

impl ImapServerFactory for TcpImapServerFactory {
    fn build(&self, cache_dir: &Path, data_dir: &Path) -> Result<Arc<dyn ImapServer>, ServiceError> {
        internal!(level = INFO, "Building IMAP server over {}", cache_dir.display());
        Ok(Arc::new(TcpImapServer::new(cache_dir, data_dir)?))
    }
}

/// Stand-alone [`SmtpServer`].
#[derive(Debug, Default)]
pub struct TcpSmtpServer {
    listener: Slot,
}

impl TcpSmtpServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }
}

#[async_trait]
impl SmtpServer for TcpSmtpServer {
    async fn serve(&self, address: SocketAddr, tls: bool) -> Result<(), ServiceError> {
        self.listener.start("SMTP", Banner::smtp(tls), address).await
    }

    async fn close(&self) -> Result<(), ServiceError> {
        self.listener.stop().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    async fn first_line(address: SocketAddr) -> String {
        let stream = TcpStream::connect(address).await.unwrap();
        BufReader::new(stream)
            .lines()
            .next_line()
            .await
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_smtp_serve_close_serve() {
        let smtp = TcpSmtpServer::new();
        smtp.serve("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
        let address = smtp.local_addr().await.unwrap();
        assert!(first_line(address).await.starts_with("220 "));

        assert!(matches!(
            smtp.serve(address, false).await,
            Err(ServiceError::Listener(ListenerError::AlreadyRunning("SMTP")))
        ));

        smtp.close().await.unwrap();
        smtp.close().await.unwrap();
        assert!(TcpStream::connect(address).await.is_err());

        smtp.serve(address, false).await.unwrap();
        assert!(first_line(address).await.starts_with("220 "));
        smtp.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_imap_close_says_bye_to_open_sessions() {
        let root = tempfile::tempdir().unwrap();
        let imap = TcpImapServer::new(&root.path().join("cache"), &root.path().join("data")).unwrap();
        imap.serve("127.0.0.1:0".parse().unwrap(), false).await.unwrap();

        let stream = TcpStream::connect(imap.local_addr().await.unwrap()).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("* OK"));

        imap.close().await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("* BYE mailbridge is shutting down")
        );
    }

    #[tokio::test]
    async fn test_imap_users() {
        let root = tempfile::tempdir().unwrap();
        let cache = root.path().join("cache");
        let imap = TcpImapServerFactory.build(&cache, &root.path().join("data")).unwrap();

        imap.add_user(&UserBinding::new("u1", "alice")).await.unwrap();
        assert!(gluon_store_path(&cache).join("u1").is_dir());

        let mut updated = UserBinding::new("u1", "alice");
        updated.show_all_mail = false;
        imap.update_user(&updated).await.unwrap();
        assert!(matches!(
            imap.update_user(&UserBinding::new("u2", "bob")).await,
            Err(ServiceError::UnknownUser(_))
        ));

        imap.remove_user("u1").await.unwrap();
        assert!(imap.remove_user("u1").await.is_err());
    }
}
