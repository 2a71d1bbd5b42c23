use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Read-only view of the most recent run for status queries.
#[derive(Clone, Debug, PartialEq)]
pub struct RunInfo {
    pub id: u64,
    pub code: String,
    pub limit: Duration,
    pub fade: bool,
    pub started_at: SystemTime,
    pub running: bool,
    pub outcome: Option<(i32, String)>,
}

pub type CurrentRun = Arc<Mutex<Option<RunInfo>>>;

impl RunInfo {
    pub fn new(id: u64, code: &str, limit: Duration, fade: bool) -> RunInfo {
        RunInfo {
            id,
            code: code.to_string(),
            limit,
            fade,
            started_at: SystemTime::now(),
            running: true,
            outcome: None,
        }
    }

    pub fn finish(&mut self, status: i32, message: &str) {
        self.running = false;
        self.outcome = Some((status, message.to_string()));
    }

    pub fn to_json(&self) -> json::JsonValue {
        let start = self
            .started_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        json::object! {
            id: self.id,
            code: self.code.clone(),
            limit: self.limit.as_secs_f64(),
            fade: self.fade,
            start: start,
            running: self.running,
            status: self.outcome.as_ref().map(|(status, _)| *status),
            message: self.outcome.as_ref().map(|(_, message)| message.clone()),
        }
    }
}
