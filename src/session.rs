//! In-memory conversation store. Sessions live for the process lifetime;
//! nothing is persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::extract::EnvelopeKind;
use crate::llm::ChatMessage;
use crate::types::{Session, Stage, Task, VehicleInfo};

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            current_stage: Stage::Perception,
            vehicle_info: None,
            symptoms: Vec::new(),
            tasks: Vec::new(),
            confirmed_faults: Vec::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    fn update<F>(&self, session_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sessions.get_mut(session_id) {
            Some(session) => {
                apply(session);
                session.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn add_message(&self, session_id: &str, message: ChatMessage) -> bool {
        self.update(session_id, |session| session.messages.push(message))
    }

    pub fn set_stage(&self, session_id: &str, stage: Stage) -> bool {
        self.update(session_id, |session| session.current_stage = stage)
    }

    pub fn set_vehicle_info(&self, session_id: &str, info: VehicleInfo) -> bool {
        self.update(session_id, |session| session.vehicle_info = Some(info))
    }

    pub fn add_symptom(&self, session_id: &str, symptom: String) -> bool {
        self.update(session_id, |session| session.symptoms.push(symptom))
    }

    pub fn set_tasks(&self, session_id: &str, tasks: Vec<Task>) -> bool {
        self.update(session_id, |session| session.tasks = tasks)
    }

    pub fn add_confirmed_fault(&self, session_id: &str, fault: String) -> bool {
        self.update(session_id, |session| session.confirmed_faults.push(fault))
    }
}

/// Infer the next workflow stage from the envelope the assistant just
/// emitted. Checks run in a fixed order so a reply carrying several card
/// types lands on the earliest stage in that order. `None` means the reply
/// was plain prose and the stage stays where it is.
pub fn infer_stage(content: &str) -> Option<Stage> {
    if content.contains(EnvelopeKind::Questions.prefix()) {
        Some(Stage::Perception)
    } else if content.contains(EnvelopeKind::Tasks.prefix()) {
        Some(Stage::Decomposition)
    } else if content.contains(EnvelopeKind::Faults.prefix()) {
        Some(Stage::Confirmation)
    } else if content.contains(EnvelopeKind::Repair.prefix()) {
        Some(Stage::Guidance)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_sessions_are_retrievable_and_start_at_perception() {
        let store = SessionStore::new();
        let session = store.create();
        assert_eq!(session.current_stage, Stage::Perception);
        assert!(session.messages.is_empty());

        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn updates_touch_updated_at_and_miss_unknown_ids() {
        let store = SessionStore::new();
        let session = store.create();

        assert!(store.add_message(&session.id, ChatMessage::user("机油灯亮了")));
        assert!(store.set_stage(&session.id, Stage::Execution));
        assert!(!store.set_stage("missing", Stage::Execution));

        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.messages.len(), 1);
        assert_eq!(fetched.current_stage, Stage::Execution);
        assert!(fetched.updated_at >= session.updated_at);
    }

    #[test]
    fn confirmed_faults_accumulate() {
        let store = SessionStore::new();
        let session = store.create();
        store.add_confirmed_fault(&session.id, "VVT执行器卡滞".to_string());
        store.add_confirmed_fault(&session.id, "机油压力低".to_string());
        assert_eq!(store.get(&session.id).unwrap().confirmed_faults.len(), 2);
    }

    #[test]
    fn stage_follows_emitted_envelope_type() {
        assert_eq!(
            infer_stage("请回答：{\"type\":\"questions\",\"data\":[]}"),
            Some(Stage::Perception)
        );
        assert_eq!(
            infer_stage("{\"type\":\"tasks\",\"data\":[]}"),
            Some(Stage::Decomposition)
        );
        assert_eq!(
            infer_stage("{\"type\":\"faults\",\"data\":[]}"),
            Some(Stage::Confirmation)
        );
        assert_eq!(
            infer_stage("{\"type\":\"repair\",\"data\":{}}"),
            Some(Stage::Guidance)
        );
        assert_eq!(infer_stage("纯文本回复"), None);
        // Questions wins over tasks when both are present.
        assert_eq!(
            infer_stage("{\"type\":\"tasks\",\"data\":[]} {\"type\":\"questions\",\"data\":[]}"),
            Some(Stage::Perception)
        );
    }
}
