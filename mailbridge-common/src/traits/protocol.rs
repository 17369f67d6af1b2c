use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::{Signal, error::SessionError};

pub trait SessionHandler {
    /// Drive the session until the peer leaves or `signal` asks it to stop.
    ///
    /// On [`Signal::Shutdown`] a session should say goodbye to the peer
    /// before returning, so clients see an orderly close rather than a reset.
    fn run(
        self,
        signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

pub trait Protocol: Send + Sync + 'static {
    type Session: SessionHandler + Send + 'static;

    fn handle(&self, stream: TcpStream, address: SocketAddr) -> Self::Session;

    fn ty() -> &'static str;
}
