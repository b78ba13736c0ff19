use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::execution::schema::InputField;
use crate::core::providers::Provider;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub currency: String,
    /// Path segment of the workflow on the engine (`/webhook/{engine_ref}`).
    pub engine_ref: String,
    pub input_schema: Vec<InputField>,
    pub required_providers: Vec<Provider>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl AgentRecord {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAgent {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub engine_ref: String,
    #[serde(default)]
    pub input_schema: Vec<InputField>,
    #[serde(default)]
    pub required_providers: Vec<Provider>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub engine_ref: Option<String>,
    pub input_schema: Option<Vec<InputField>>,
    pub required_providers: Option<Vec<Provider>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRemoval {
    Deleted,
    /// The agent had execution history, so it was hidden instead of dropped.
    Deactivated,
    NotFound,
}

/// The four labels an execution row moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Running)
                | (ExecutionStatus::Pending, ExecutionStatus::Failed)
                | (ExecutionStatus::Running, ExecutionStatus::Completed)
                | (ExecutionStatus::Running, ExecutionStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionRecord {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub status: ExecutionStatus,
    pub input_snapshot: Value,
    pub output_snapshot: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Columns written together with a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PurchaseRecord {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub amount_cents: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionRecord {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub status: String,
    pub current_period_end: Option<String>,
    pub created_at: String,
}

/// Raw `system_config` row. Secret values are ciphertext; see the vault.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub iv: Option<String>,
    pub is_secret: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiTokenRecord {
    pub id: String,
    pub user_id: String,
    pub role: Role,
    pub name: String,
    pub created_at: String,
}
