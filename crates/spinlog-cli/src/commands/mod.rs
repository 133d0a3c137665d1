pub mod config;
pub mod recover;
pub mod run;
pub mod sessions;
pub mod watch;

use spinlog_core::Shutdown;

/// Raise the returned token on Ctrl-C or SIGTERM.
pub(crate) fn shutdown_on_signal() -> Result<Shutdown, ctrlc::Error> {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        handle.request();
    })?;
    Ok(shutdown)
}
