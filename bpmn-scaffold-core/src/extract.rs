//! Metadata extraction from BPMN 2.0 XML (Zeebe dialect).
//!
//! Only the parts the generator needs are read: processes, their user and
//! service tasks, and the Zeebe extension elements attached to each task.
//! Namespace prefixes are ignored, so `bpmn:userTask` and `userTask` match
//! alike.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, ScaffoldError};
use crate::types::{AssignmentRule, ServiceTask, Task, UserTask};

/// How repeated extension elements of one kind on a single task resolve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// A later element replaces an earlier one wholesale.
    #[default]
    LastWins,
    /// A later element that differs from an earlier one is an error.
    /// Identical repeats are accepted.
    Reject,
}

/// One `<process>` element and the tasks found inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedProcess {
    pub id: String,
    pub name: Option<String>,
    /// Tasks in document order, including those inside sub-processes.
    pub tasks: Vec<Task>,
}

/// Parse process-definition bytes into processes with their tasks.
pub fn extract_processes(bytes: &[u8], policy: DuplicatePolicy) -> Result<Vec<ExtractedProcess>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ScaffoldError::MetadataParse(format!("model is not valid UTF-8: {}", e)))?;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut state = ExtractState::new(policy);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                state.open(&name, &e)?;
                state.stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                state.open(&name, &e)?;
                state.close(&name)?;
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.stack.pop();
                state.close(&name)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ScaffoldError::MetadataParse(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if let Some(open) = state.stack.last() {
        return Err(ScaffoldError::MetadataParse(format!(
            "unexpected end of document inside <{}>",
            open
        )));
    }
    if state.processes.is_empty() {
        return Err(ScaffoldError::MetadataParse(
            "document contains no <process> element".to_string(),
        ));
    }

    debug!(
        processes = state.processes.len(),
        tasks = state.processes.iter().map(|p| p.tasks.len()).sum::<usize>(),
        "Extracted process metadata"
    );
    Ok(state.processes)
}

// ── Parser state ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTag {
    User,
    Service,
}

#[derive(Debug)]
struct TaskBuilder {
    tag: TaskTag,
    id: String,
    name: String,
    form_id: Option<Option<String>>,
    assignment: Option<AssignmentRule>,
    due_date: Option<Option<String>>,
    task_type: Option<Option<String>>,
}

impl TaskBuilder {
    fn build(self) -> Task {
        match self.tag {
            TaskTag::User => Task::User(UserTask {
                id: self.id,
                name: self.name,
                form_id: self.form_id.flatten(),
                assignment: self.assignment.unwrap_or_default(),
                due_date: self.due_date.flatten(),
            }),
            TaskTag::Service => Task::Service(ServiceTask {
                id: self.id,
                name: self.name,
                task_type: self.task_type.flatten(),
            }),
        }
    }
}

struct ExtractState {
    policy: DuplicatePolicy,
    stack: Vec<String>,
    processes: Vec<ExtractedProcess>,
    current_process: Option<ExtractedProcess>,
    current_task: Option<TaskBuilder>,
    in_extensions: bool,
}

impl ExtractState {
    fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            stack: Vec::new(),
            processes: Vec::new(),
            current_process: None,
            current_task: None,
            in_extensions: false,
        }
    }

    fn open(&mut self, name: &str, e: &BytesStart<'_>) -> Result<()> {
        match name {
            "process" => {
                let attrs = attributes(e)?;
                self.current_process = Some(ExtractedProcess {
                    id: attrs.get("id").cloned().unwrap_or_default(),
                    name: attrs.get("name").cloned(),
                    tasks: Vec::new(),
                });
            }
            "userTask" | "serviceTask" if self.current_process.is_some() => {
                let attrs = attributes(e)?;
                let id = attrs.get("id").cloned().unwrap_or_default();
                if id.is_empty() {
                    return Err(ScaffoldError::MetadataParse(format!(
                        "<{}> without an id attribute",
                        name
                    )));
                }
                self.current_task = Some(TaskBuilder {
                    tag: if name == "userTask" {
                        TaskTag::User
                    } else {
                        TaskTag::Service
                    },
                    id,
                    name: attrs.get("name").cloned().unwrap_or_default(),
                    form_id: None,
                    assignment: None,
                    due_date: None,
                    task_type: None,
                });
            }
            "extensionElements" if self.current_task.is_some() => {
                self.in_extensions = true;
            }
            "formDefinition" | "assignmentDefinition" | "taskSchedule" | "taskDefinition"
                if self.in_extensions =>
            {
                let attrs = attributes(e)?;
                let policy = self.policy;
                if let Some(task) = self.current_task.as_mut() {
                    apply_extension(task, name, &attrs, policy)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        match name {
            "extensionElements" => self.in_extensions = false,
            "userTask" | "serviceTask" => {
                if let (Some(task), Some(process)) =
                    (self.current_task.take(), self.current_process.as_mut())
                {
                    process.tasks.push(task.build());
                }
                self.in_extensions = false;
            }
            "process" => {
                if let Some(process) = self.current_process.take() {
                    if process.id.is_empty() {
                        return Err(ScaffoldError::MetadataParse(
                            "<process> without an id attribute".to_string(),
                        ));
                    }
                    self.processes.push(process);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn apply_extension(
    task: &mut TaskBuilder,
    element: &str,
    attrs: &HashMap<String, String>,
    policy: DuplicatePolicy,
) -> Result<()> {
    let attr = |key: &str| attrs.get(key).filter(|v| !v.is_empty()).cloned();
    let task_id = task.id.clone();
    match element {
        "formDefinition" => assign(&mut task.form_id, attr("formId"), policy, &task_id, element),
        "assignmentDefinition" => assign(
            &mut task.assignment,
            AssignmentRule {
                assignee: attr("assignee"),
                candidate_groups: attr("candidateGroups"),
                candidate_users: attr("candidateUsers"),
            },
            policy,
            &task_id,
            element,
        ),
        "taskSchedule" => assign(&mut task.due_date, attr("dueDate"), policy, &task_id, element),
        "taskDefinition" => assign(&mut task.task_type, attr("type"), policy, &task_id, element),
        _ => Ok(()),
    }
}

fn assign<T: PartialEq>(
    slot: &mut Option<T>,
    value: T,
    policy: DuplicatePolicy,
    task_id: &str,
    element: &str,
) -> Result<()> {
    if policy == DuplicatePolicy::Reject {
        if let Some(existing) = slot.as_ref() {
            if *existing != value {
                return Err(ScaffoldError::ConflictingExtension {
                    task_id: task_id.to_string(),
                    element: element.to_string(),
                });
            }
        }
    }
    *slot = Some(value);
    Ok(())
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            ScaffoldError::MetadataParse(format!("bad attribute on <{}>: {}", local_name(e), err))
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ScaffoldError::MetadataParse(format!("bad attribute value: {}", err)))?
            .into_owned();
        out.insert(key, value);
    }
    Ok(out)
}
