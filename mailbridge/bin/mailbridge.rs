#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::sync::Arc;

use mailbridge::{
    BridgeBuilder, Config, fatal,
    fsops::LocalDirOps,
    locator::{Locations, Locator},
    server::{TcpImapServerFactory, TcpSmtpServer},
    vault::FileVault,
};
use mailbridge_common::{internal, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::load()?;
    internal!(level = INFO, "Using {}", config.base_dir.display());

    let locations = Locations::new(&config.base_dir);
    let vault = FileVault::open(
        locations.settings_path()?.join("vault.ron"),
        locations.gluon_cache_path()?,
    )?;

    let (reporter, receiver) = fatal::channel();
    let bridge = BridgeBuilder::new(
        Arc::new(vault),
        Arc::new(locations),
        Arc::new(TcpImapServerFactory),
        Arc::new(TcpSmtpServer::new()),
    )
    .dir_ops(Arc::new(LocalDirOps))
    .host(config.host)
    .build(reporter)?;

    bridge.run(receiver).await
}
