use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::attempts::ConnectionAttemptLog;

/// Periodically writes the connection attempt log to disk
pub struct AttemptFlusher {
    stop_sender: Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl AttemptFlusher {
    pub fn spawn(attempts: Arc<ConnectionAttemptLog>, interval: Duration) -> anyhow::Result<Self> {
        let (stop_sender, stop_receiver) = bounded(1);

        let handle: JoinHandle<anyhow::Result<()>> = Builder::new()
            .name("attempt-flusher".into())
            .spawn(move || loop {
                match stop_receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = attempts.flush_if_dirty() {
                            ::log::error!("Saving connection attempts failed: {:#}", err);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                }
            })
            .context("spawn attempt flusher")?;

        Ok(Self {
            stop_sender,
            handle,
        })
    }

    pub fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_sender.send(());

        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("attempt flusher panicked")),
        }
    }
}
