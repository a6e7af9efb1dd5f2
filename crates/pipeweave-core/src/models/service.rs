use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Disconnected,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => ServiceStatus::Inactive,
            "disconnected" => ServiceStatus::Disconnected,
            _ => ServiceStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = services)]
pub struct ServiceRow {
    pub id: String,
    pub version: String,
    pub base_url: String,
    pub registered_at: NaiveDateTime,
    pub last_heartbeat: NaiveDateTime,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub version: String,
    pub base_url: String,
    pub registered_at: NaiveDateTime,
    pub last_heartbeat: NaiveDateTime,
    pub status: ServiceStatus,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            version: row.version,
            base_url: row.base_url,
            registered_at: row.registered_at,
            last_heartbeat: row.last_heartbeat,
            status: ServiceStatus::parse(&row.status),
        }
    }
}

impl From<Service> for ServiceRow {
    fn from(s: Service) -> Self {
        ServiceRow {
            id: s.id,
            version: s.version,
            base_url: s.base_url,
            registered_at: s.registered_at,
            last_heartbeat: s.last_heartbeat,
            status: s.status.as_str().to_string(),
        }
    }
}
