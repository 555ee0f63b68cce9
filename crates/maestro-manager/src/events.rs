//! Engine event loop.

use crate::{ContainerManager, ManagerError, Result};
use futures::StreamExt;
use maestro_engine::{EngineEvent, EventFilters};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl ContainerManager {
    /// Runs the daemon until `shutdown` is cancelled.
    ///
    /// Subscribes to engine events for labeled targets, then reconciles the
    /// current snapshot; the subscription is opened first so no event is
    /// lost while the snapshot runs. When the event stream hits EOF the loop
    /// resubscribes and reconciles again - events may have been lost during
    /// the gap. An event stream error is fatal.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let mut events = self
                .engine
                .events(EventFilters::labeled(self.labels.backup_name.clone()));

            tokio::select! {
                result = self.init_backupers() => result?,
                _ = shutdown.cancelled() => return Ok(()),
            }

            loop {
                tokio::select! {
                    item = events.next() => match item {
                        Some(Ok(event)) => self.handle_event(event).await?,
                        Some(Err(err)) => {
                            return Err(ManagerError::EventStream(err.to_string()));
                        }
                        None => {
                            info!("event stream closed, resubscribing");
                            break;
                        }
                    },
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
        }
    }

    async fn handle_event(&self, event: EngineEvent) -> Result<()> {
        let name = event
            .attributes
            .get(&self.labels.backup_name)
            .cloned()
            .unwrap_or_default();

        match event.action.as_str() {
            "start" => self.create_backuper(&name).await,
            "die" => self.drop_backuper(&name).await,
            other => {
                debug!("ignoring '{other}' event for '{name}'");
                Ok(())
            }
        }
    }
}
