use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::maintenance_state;

/// Singleton row id for `maintenance_state` — there is exactly one row.
pub const MAINTENANCE_SINGLETON_ID: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceMode {
    Running,
    WaitingForMaintenance,
    Maintenance,
}

impl MaintenanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceMode::Running => "running",
            MaintenanceMode::WaitingForMaintenance => "waiting_for_maintenance",
            MaintenanceMode::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "waiting_for_maintenance" => MaintenanceMode::WaitingForMaintenance,
            "maintenance" => MaintenanceMode::Maintenance,
            _ => MaintenanceMode::Running,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = maintenance_state)]
pub struct MaintenanceRow {
    pub id: i32,
    pub mode: String,
    pub mode_changed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceState {
    pub mode: MaintenanceMode,
    pub mode_changed_at: NaiveDateTime,
}

impl From<MaintenanceRow> for MaintenanceState {
    fn from(row: MaintenanceRow) -> Self {
        MaintenanceState {
            mode: MaintenanceMode::parse(&row.mode),
            mode_changed_at: row.mode_changed_at,
        }
    }
}
