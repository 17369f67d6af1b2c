pub mod cache;
pub mod config;
pub mod error;
pub mod message;
pub mod session;

pub use cache::SyncCache;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use message::{AttachmentRef, Message};
pub use session::{Downloader, SyncSession};
