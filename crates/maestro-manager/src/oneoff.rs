//! One-off restore / force-backup runs.
//!
//! A one-off temporarily displaces the companion of its target: the
//! companion is stopped, a short-lived container runs against the target's
//! data read-write, and the companion is started again iff it was running
//! before. The one-off carries `auto_remove`, so the engine reaps it on
//! exit.

use crate::{ContainerManager, ManagerError, Result};
use futures::StreamExt;
use maestro_core::{container_name, Template};
use maestro_engine::{EngineError, EventFilters};
use tracing::info;

impl ContainerManager {
    /// Runs one one-off container for `name` from the given variant
    /// template.
    ///
    /// `marker_label` is placed on the one-off (with the backup name as
    /// value) so it can be found later; `tag` is the image tag used when the
    /// template builds its own image. Invocations for the same name must be
    /// serialized by the caller; different names are independent.
    pub(crate) async fn one_off(
        &self,
        name: &str,
        template: &Template,
        marker_label: &str,
        name_format: &str,
        tag: &str,
    ) -> Result<()> {
        let companion = self
            .find_by_label_value(&self.labels.backuper_name, name, false)
            .await?;
        let was_running = companion
            .as_ref()
            .map(|c| c.is_alive())
            .unwrap_or(false);

        if let Some(companion) = &companion {
            info!("stopping companion for '{name}'");
            self.engine.stop_container(&companion.id).await?;
        }

        let mut derived = self.prepare_backuper_config_for(name, true).await?;
        derived.labels.0.remove(&self.labels.backuper_name);
        derived
            .labels
            .0
            .insert(marker_label.to_string(), name.to_string());

        let mut one_off = template.overlay(&derived);
        one_off.auto_remove = true;

        let one_off_name = container_name(name_format, name);
        let id = self.create_container(&one_off, tag, &one_off_name).await?;

        // Subscribe to the container's die event before starting it, so the
        // exit cannot slip between start and subscription.
        let mut die_events = self.engine.events(EventFilters::container_die(&id));
        let die_wait = tokio::spawn(async move {
            match die_events.next().await {
                Some(Ok(_)) => Ok(()),
                Some(Err(err)) => Err(err),
                None => Err(EngineError::StreamClosed),
            }
        });

        info!("starting one-off container for '{name}'");
        self.engine.start_container(&id).await?;

        info!("waiting for one-off container for '{name}' to finish");
        die_wait
            .await
            .map_err(|err| ManagerError::EventStream(format!("die-wait task failed: {err}")))??;

        if was_running {
            if let Some(companion) = &companion {
                info!("restarting companion for '{name}'");
                self.engine
                    .start_container(&companion.id)
                    .await
                    .map_err(|source| ManagerError::CompanionRestart {
                        name: name.to_string(),
                        source,
                    })?;
            }
        }

        Ok(())
    }
}
