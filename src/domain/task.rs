use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::company::CompanyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<TaskState> {
        match value {
            "pending" => Some(TaskState::Pending),
            "processing" => Some(TaskState::Processing),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

/// The company fields a worker needs to discover and verify a website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub legal_name: String,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub tax_id: Option<String>,
    pub declared_url: Option<String>,
}

impl TaskPayload {
    pub fn from_record(record: &CompanyRecord) -> Self {
        Self {
            legal_name: record.legal_name.clone(),
            province: record.province.clone(),
            postal_code: record.postal_code.clone(),
            tax_id: record.tax_id.clone(),
            declared_url: record.declared_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub company_id: String,
    pub company_data: TaskPayload,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(company_id: impl Into<String>, company_data: TaskPayload) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            company_id: company_id.into(),
            company_data,
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            result: None,
            error: None,
        }
    }

    pub fn for_company(record: &CompanyRecord) -> Result<Task, String> {
        if record.id.trim().is_empty() {
            return Err("company is missing an id".to_string());
        }
        if record.legal_name.trim().is_empty() {
            return Err(format!("company {} is missing a legal name", record.id));
        }
        Ok(Task::new(record.id.clone(), TaskPayload::from_record(record)))
    }

    pub fn mark_processing(&mut self, worker_id: &str) {
        self.state = TaskState::Processing;
        self.started_at = Some(Utc::now());
        self.worker_id = Some(worker_id.to_string());
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.state = TaskState::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending={} processing={} completed={} failed={}",
            self.pending, self.processing, self.completed, self.failed
        )
    }
}
