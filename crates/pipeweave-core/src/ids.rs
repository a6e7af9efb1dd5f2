//! ID minting. All IDs are opaque strings (§3); prefixes are convention
//! only, used here so log lines and DB rows are self-describing at a
//! glance.

pub fn mint(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}

pub const TASK_RUN_PREFIX: &str = "trun_";
pub const PIPELINE_RUN_PREFIX: &str = "prun_";
pub const DLQ_PREFIX: &str = "dlq_";
pub const TASK_CODE_HISTORY_PREFIX: &str = "tch_";
