use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

/// Phase of the diagnosis workflow. Only used to select the prompt and tool
/// configuration for the next turn; the stage machine never rejects a
/// transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Perception,
    Decomposition,
    Execution,
    Confirmation,
    Guidance,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Perception => "perception",
            Stage::Decomposition => "decomposition",
            Stage::Execution => "execution",
            Stage::Confirmation => "confirmation",
            Stage::Guidance => "guidance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultCode {
    pub code: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfo {
    pub vin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_number: Option<String>,
    pub brand: String,
    pub model: String,
    pub year: u16,
    pub engine_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mileage: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_maintenance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_codes: Option<Vec<FaultCode>>,
}

/// A closed historical repair record, attached to tasks by the enrichment
/// engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalCase {
    pub id: String,
    pub date: String,
    pub vehicle_model: String,
    pub plate_number: String,
    pub fault_description: String,
    pub solution: String,
    pub repair_time: String,
    pub cost: String,
    pub technician: String,
}

/// One diagnostic check emitted by the model inside a `tasks` envelope.
/// `related_cases` is populated at most once, by enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub desc: String,
    #[serde(rename = "relatedCases", skip_serializing_if = "Option::is_none")]
    pub related_cases: Option<Vec<HistoricalCase>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// One repair plan. The model streams these field by field, so everything
/// is optional and a partially arrived plan still renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// The model emits either a single repair plan or an array of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepairData {
    Many(Vec<RepairPlan>),
    One(RepairPlan),
}

/// Technician feedback on a single task, stored as a sideband field on the
/// tasks envelope after the checklist has been clicked through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFeedback {
    pub task_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Answer to one interactive question, stored as a sideband field on the
/// questions envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnswer {
    pub question_id: String,
    pub answer: String,
}

/// One conversation, owned by the in-memory store for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub current_stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_info: Option<VehicleInfo>,
    pub symptoms: Vec<String>,
    pub tasks: Vec<Task>,
    pub confirmed_faults: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inbound body of both chat endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stage: Option<Stage>,
}
