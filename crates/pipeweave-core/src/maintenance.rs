//! Maintenance (§4.11): a singleton admission-control state machine.

use chrono::Utc;
use diesel::prelude::*;

use crate::database::Store;
use crate::error::MaintenanceError;
use crate::models::{MaintenanceMode, MaintenanceRow, MaintenanceState, MAINTENANCE_SINGLETON_ID};
use crate::schema::{maintenance_state, task_runs};

#[derive(Clone)]
pub struct Maintenance {
    store: Store,
}

impl Maintenance {
    pub fn new(store: Store) -> Self {
        Maintenance { store }
    }

    pub async fn state(&self) -> Result<MaintenanceState, MaintenanceError> {
        let row = self.load_or_init().await?;
        Ok(row.into())
    }

    async fn load_or_init(&self) -> Result<MaintenanceRow, MaintenanceError> {
        let now = Utc::now().naive_utc();
        let row: MaintenanceRow = self
            .store
            .interact(move |conn| {
                let existing: Option<MaintenanceRow> = maintenance_state::table
                    .find(MAINTENANCE_SINGLETON_ID)
                    .first(conn)
                    .optional()?;
                match existing {
                    Some(row) => Ok(row),
                    None => {
                        let row = MaintenanceRow {
                            id: MAINTENANCE_SINGLETON_ID,
                            mode: MaintenanceMode::Running.as_str().to_string(),
                            mode_changed_at: now,
                        };
                        diesel::insert_into(maintenance_state::table).values(&row).execute(conn)?;
                        Ok(row)
                    }
                }
            })
            .await?;
        Ok(row)
    }

    async fn active_run_counts(&self) -> Result<(i64, i64), MaintenanceError> {
        let pending: i64 = self
            .store
            .interact(|conn| {
                task_runs::table
                    .filter(task_runs::status.eq("pending"))
                    .count()
                    .get_result(conn)
            })
            .await?;
        let running: i64 = self
            .store
            .interact(|conn| {
                task_runs::table
                    .filter(task_runs::status.eq("running"))
                    .count()
                    .get_result(conn)
            })
            .await?;
        Ok((pending, running))
    }

    async fn set_mode(&self, mode: MaintenanceMode) -> Result<(), MaintenanceError> {
        let now = Utc::now().naive_utc();
        self.store
            .interact(move |conn| {
                diesel::update(maintenance_state::table.find(MAINTENANCE_SINGLETON_ID))
                    .set((maintenance_state::mode.eq(mode.as_str()), maintenance_state::mode_changed_at.eq(now)))
                    .execute(conn)
            })
            .await?;
        Ok(())
    }

    /// Starts the drain: jumps straight to `maintenance` if nothing is
    /// in flight, otherwise waits for in-flight work via
    /// `waiting_for_maintenance`.
    pub async fn request_maintenance(&self) -> Result<MaintenanceMode, MaintenanceError> {
        let current = self.load_or_init().await?;
        let mode = MaintenanceMode::parse(&current.mode);
        if mode != MaintenanceMode::Running {
            return Ok(mode);
        }

        let (pending, running) = self.active_run_counts().await?;
        let next = if pending == 0 && running == 0 { MaintenanceMode::Maintenance } else { MaintenanceMode::WaitingForMaintenance };
        self.set_mode(next).await?;
        Ok(next)
    }

    pub async fn enter_maintenance(&self) -> Result<(), MaintenanceError> {
        let (pending, running) = self.active_run_counts().await?;
        if pending != 0 || running != 0 {
            return Err(MaintenanceError::ActiveRunsRemain(pending, running));
        }
        self.set_mode(MaintenanceMode::Maintenance).await
    }

    pub async fn exit_maintenance(&self) -> Result<(), MaintenanceError> {
        self.set_mode(MaintenanceMode::Running).await
    }

    /// Event hook invoked from `QueueManager::mark_completed`/`mark_failed`:
    /// auto-promotes `waiting_for_maintenance` to `maintenance` once no
    /// pending/running work remains.
    pub async fn on_task_status_change(&self) -> Result<(), MaintenanceError> {
        let current = self.load_or_init().await?;
        if MaintenanceMode::parse(&current.mode) != MaintenanceMode::WaitingForMaintenance {
            return Ok(());
        }
        let (pending, running) = self.active_run_counts().await?;
        if pending == 0 && running == 0 {
            self.set_mode(MaintenanceMode::Maintenance).await?;
        }
        Ok(())
    }

    pub async fn is_running(&self) -> Result<bool, MaintenanceError> {
        Ok(self.state().await?.mode == MaintenanceMode::Running)
    }
}
