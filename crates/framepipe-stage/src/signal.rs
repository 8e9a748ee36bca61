//! Bridges SIGINT and SIGTERM to a stage's [`Interrupt`].

use std::thread;

use framepipe_node::Interrupt;
use tokio::signal::unix::{SignalKind, signal};

use crate::error::StageError;

/// Trigger `interrupt` on the first SIGINT or SIGTERM.
///
/// Handlers are registered before this returns; a detached thread running a
/// current-thread runtime waits for the signal.
pub fn install(interrupt: Interrupt) -> Result<(), StageError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(StageError::Signal)?;

    let (mut sigint, mut sigterm) = runtime
        .block_on(async {
            Ok::<_, std::io::Error>((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            ))
        })
        .map_err(StageError::Signal)?;

    thread::Builder::new()
        .name("framepipe-signals".into())
        .spawn(move || {
            runtime.block_on(async move {
                let name = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                };
                tracing::info!(signal = name, "shutdown requested");
                interrupt.trigger();
            });
        })
        .map_err(StageError::Signal)?;
    Ok(())
}
