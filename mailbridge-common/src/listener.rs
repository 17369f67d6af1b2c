use std::{io, net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast::{self, Receiver, Sender},
    task::JoinHandle,
};

use crate::{
    Signal,
    error::ListenerError,
    internal,
    traits::protocol::{Protocol, SessionHandler},
};

/// A socket address paired with the protocol that serves it.
///
/// Binding happens in [`Listener::bind`], so a port conflict is reported to
/// the caller rather than surfacing later from inside the accept loop.
pub struct Listener<Proto: Protocol> {
    handler: Arc<Proto>,
    socket: SocketAddr,
}

impl<Proto: Protocol> Listener<Proto> {
    pub fn new(handler: Proto, socket: SocketAddr) -> Self {
        Self {
            handler: Arc::new(handler),
            socket,
        }
    }

    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    /// Bind the socket and start accepting connections in the background.
    ///
    /// # Errors
    /// If the socket cannot be bound.
    #[tracing::instrument(level = "trace", skip(self), fields(protocol = Proto::ty(), socket = %self.socket))]
    pub async fn bind(self) -> Result<Running, ListenerError> {
        let listener = TcpListener::bind(self.socket)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: self.socket,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        internal!(level = INFO, "{} listening on {}", Proto::ty(), local_addr);

        let (shutdown, receiver) = broadcast::channel(4);
        let task = tokio::spawn(accept(listener, local_addr, Arc::clone(&self.handler), receiver));

        Ok(Running {
            protocol: Proto::ty(),
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Source of inbound connections for the accept loop.
trait Incoming: Send + Sync + 'static {
    fn next_connection(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Incoming for TcpListener {
    fn next_connection(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        self.accept()
    }
}

async fn accept<Proto: Protocol, I: Incoming>(
    listener: I,
    address: SocketAddr,
    handler: Arc<Proto>,
    mut shutdown: Receiver<Signal>,
) {
    let mut sessions = Vec::default();

    loop {
        tokio::select! {
            sig = shutdown.recv() => {
                if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                    internal!(level = INFO, "{} Listener {} Received Shutdown signal, finishing sessions ...", Proto::ty(), address);
                    join_all(sessions).await;
                    return;
                }
            }

            connection = listener.next_connection() => {
                // A failed accept (EMFILE, a peer resetting before we got to
                // it) only loses that one connection.
                let (stream, peer) = match connection {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        internal!(level = WARN, "{} Listener {} failed to accept a connection: {err}", Proto::ty(), address);
                        tokio::task::yield_now().await;
                        continue;
                    }
                };
                tracing::debug!("Connection received on {address} from {peer}");

                let session = handler.handle(stream, peer);
                let signal = shutdown.resubscribe();

                sessions.retain(|s: &JoinHandle<()>| !s.is_finished());
                sessions.push(tokio::spawn(async move {
                    if let Err(err) = session.run(signal).await
                        && !err.is_shutdown()
                    {
                        internal!(level = ERROR, "Error: {err}");
                    }
                }));
            }
        }
    }
}

/// Handle to a bound, accepting listener.
///
/// Dropping the handle without calling [`Running::stop`] also stops the
/// accept loop, but without waiting for open sessions to finish.
#[derive(Debug)]
pub struct Running {
    protocol: &'static str,
    local_addr: SocketAddr,
    shutdown: Sender<Signal>,
    task: JoinHandle<()>,
}

impl Running {
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub const fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Stop accepting, tell open sessions to close, and wait for them.
    ///
    /// # Errors
    /// If the accept loop task panicked.
    pub async fn stop(self) -> Result<(), ListenerError> {
        internal!("Stopping {} listener on {}", self.protocol, self.local_addr);

        // Nobody is subscribed if the loop already ended.
        let _ = self.shutdown.send(Signal::Shutdown);
        Ok(self.task.await?)
    }
}
