use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::extract::ExtractedProcess;

// ─── Deployment identity ──────────────────────────────────────

/// Canonical process metadata returned by the engine on deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: i64,
    pub resource_name: String,
}

// ─── Tasks ────────────────────────────────────────────────────

/// Who may work on a user task. Fields are independent of each other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub assignee: Option<String>,
    pub candidate_groups: Option<String>,
    pub candidate_users: Option<String>,
}

impl AssignmentRule {
    pub fn is_empty(&self) -> bool {
        self.assignee.is_none() && self.candidate_groups.is_none() && self.candidate_users.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTask {
    pub id: String,
    pub name: String,
    /// `formId` of the linked form, if any.
    pub form_id: Option<String>,
    pub assignment: AssignmentRule,
    /// Raw due-date expression (FEEL or ISO 8601), passed through verbatim.
    pub due_date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTask {
    pub id: String,
    pub name: String,
    pub task_type: Option<String>,
}

impl ServiceTask {
    /// The job type workers subscribe to. Falls back to the element id when
    /// the model declares no `taskDefinition`.
    pub fn effective_type(&self) -> &str {
        self.task_type.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    User(UserTask),
    Service(ServiceTask),
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::User(t) => &t.id,
            Task::Service(t) => &t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Task::User(t) => &t.name,
            Task::Service(t) => &t.name,
        }
    }
}

// ─── Process definition ───────────────────────────────────────

/// A deployed process paired with the tasks extracted from its model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub metadata: ProcessMetadata,
    /// Tasks in document order.
    pub tasks: Vec<Task>,
}

impl ProcessDefinition {
    /// Pair deployment metadata with extracted processes by BPMN process id.
    ///
    /// Processes present in the model but absent from the deployment result
    /// (non-executable pools) are skipped. Metadata without a matching
    /// process yields a definition with no tasks.
    pub fn assemble(
        metadata: &[ProcessMetadata],
        extracted: Vec<ExtractedProcess>,
    ) -> Vec<ProcessDefinition> {
        let mut remaining = extracted;
        let mut defs = Vec::with_capacity(metadata.len());

        for meta in metadata {
            let tasks = match remaining
                .iter()
                .position(|p| p.id == meta.bpmn_process_id)
            {
                Some(idx) => remaining.remove(idx).tasks,
                None => {
                    warn!(
                        process_id = %meta.bpmn_process_id,
                        "Deployed process not found in model, generating process entity only"
                    );
                    Vec::new()
                }
            };
            defs.push(ProcessDefinition {
                metadata: meta.clone(),
                tasks,
            });
        }

        for skipped in &remaining {
            warn!(process_id = %skipped.id, "Process was not deployed, skipping its tasks");
        }

        defs
    }

    pub fn user_tasks(&self) -> impl Iterator<Item = &UserTask> {
        self.tasks.iter().filter_map(|t| match t {
            Task::User(u) => Some(u),
            Task::Service(_) => None,
        })
    }

    pub fn service_tasks(&self) -> impl Iterator<Item = &ServiceTask> {
        self.tasks.iter().filter_map(|t| match t {
            Task::Service(s) => Some(s),
            Task::User(_) => None,
        })
    }
}

// ─── Entities ─────────────────────────────────────────────────

/// The three families of generated modules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Process,
    UserTask,
    ServiceTask,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Process => "process",
            EntityKind::UserTask => "user_task",
            EntityKind::ServiceTask => "service_task",
        }
    }
}

/// Stable identity of a generated entity across runs.
///
/// `source_id` is the BPMN process id, the user-task element id, or the
/// service-task job type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub source_id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> ProcessMetadata {
        ProcessMetadata {
            bpmn_process_id: id.to_string(),
            version: 1,
            process_definition_key: 2251799813685249,
            resource_name: format!("{id}.bpmn"),
        }
    }

    fn extracted(id: &str, tasks: Vec<Task>) -> ExtractedProcess {
        ExtractedProcess {
            id: id.to_string(),
            name: None,
            tasks,
        }
    }

    #[test]
    fn assemble_pairs_by_process_id() {
        let task = Task::Service(ServiceTask {
            id: "Activity_1".to_string(),
            name: "Notify".to_string(),
            task_type: Some("send-email".to_string()),
        });
        let defs = ProcessDefinition::assemble(
            &[meta("order")],
            vec![extracted("other", vec![]), extracted("order", vec![task.clone()])],
        );
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].metadata.bpmn_process_id, "order");
        assert_eq!(defs[0].tasks, vec![task]);
    }

    #[test]
    fn assemble_keeps_metadata_without_model() {
        let defs = ProcessDefinition::assemble(&[meta("ghost")], vec![]);
        assert_eq!(defs.len(), 1);
        assert!(defs[0].tasks.is_empty());
    }

    #[test]
    fn service_task_type_falls_back_to_id() {
        let task = ServiceTask {
            id: "Activity_9".to_string(),
            name: String::new(),
            task_type: None,
        };
        assert_eq!(task.effective_type(), "Activity_9");
    }

    #[test]
    fn entity_key_display() {
        let key = EntityKey::new(EntityKind::UserTask, "Activity_2");
        assert_eq!(key.to_string(), "user_task:Activity_2");
    }
}
