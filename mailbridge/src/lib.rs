pub mod bridge;
pub mod config;
pub mod error;
pub mod fatal;
pub mod fsops;
pub mod integration;
pub mod locator;
pub mod server;
pub mod settings;
pub mod users;
pub mod vault;

pub use bridge::{Bridge, BridgeBuilder};
pub use config::Config;
pub use error::{Service, ServiceError, SettingsError, UserError, VaultError};
pub use fatal::{FatalError, FatalReceiver, FatalReporter};
pub use settings::ReconfigureState;
pub use users::{UserBinding, UserRegistry, UsersLock};
