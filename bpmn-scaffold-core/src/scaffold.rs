//! Generation runs against one target codebase.
//!
//! A run plans every entity first (identifiers and collisions are checked
//! before anything is written), then commits entities one at a time. Each
//! entity is a single [`ChangeSet`]: its own files, its blocks in the shared
//! registries and its manifest entry land together or not at all. Entities
//! committed before a failure stay on disk and are listed in the error.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ScaffoldConfig;
use crate::error::{Result, ScaffoldError};
use crate::extract::extract_processes;
use crate::form::FormLocator;
use crate::manifest::{sha256_hex, ArtifactRecord, Drift, EntityRecord, FragmentRecord, Manifest};
use crate::naming::{normalize, IdentifierRegistry, IdentifierSet};
use crate::patch;
use crate::staging::ChangeSet;
use crate::synth::{GeneratedArtifact, Synthesizer};
use crate::types::{EntityKey, EntityKind, ProcessDefinition, ProcessMetadata, ServiceTask, UserTask};

/// Outcome of one committed entity.
#[derive(Clone, Debug, Serialize)]
pub struct EntityOutcome {
    pub entity: String,
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerationReport {
    pub run_id: Uuid,
    pub entities: Vec<EntityOutcome>,
}

enum Source<'a> {
    Process(&'a ProcessMetadata),
    UserTask(&'a UserTask),
    ServiceTask {
        task_type: String,
        tasks: Vec<&'a ServiceTask>,
    },
}

struct Planned<'a> {
    key: EntityKey,
    ids: IdentifierSet,
    source: Source<'a>,
}

pub struct Scaffolder {
    config: ScaffoldConfig,
    synth: Synthesizer,
    forms: FormLocator,
    /// Serializes runs so shared files never see interleaved merges.
    lock: Mutex<()>,
}

impl Scaffolder {
    pub fn new(config: ScaffoldConfig) -> Result<Self> {
        let synth = Synthesizer::new(&config)?;
        let forms = FormLocator::new(config.forms_dir.clone());
        Ok(Self {
            config,
            synth,
            forms,
            lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ScaffoldConfig {
        &self.config
    }

    /// Write the shared registry skeletons that do not exist yet. Existing
    /// files are never touched. Returns the created paths.
    pub fn init_target(&self) -> Result<Vec<PathBuf>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut changes = ChangeSet::new(&self.config.target_root);
        let mut created = Vec::new();
        for (path, content) in self.synth.skeletons()? {
            if self.config.target_path(&path).exists() {
                debug!(path = %path.display(), "Skeleton exists, leaving it alone");
                continue;
            }
            created.push(path.clone());
            changes.write(path, content);
        }
        changes.commit()?;

        info!(created = created.len(), root = %self.config.target_root.display(), "Initialized target");
        Ok(created)
    }

    /// Extract the model, pair it with deployment metadata and generate
    /// every entity.
    pub fn generate_deployment(&self, model: &[u8], metadata: &[ProcessMetadata]) -> Result<GenerationReport> {
        let extracted = extract_processes(model, self.config.duplicate_extensions)?;
        let definitions = ProcessDefinition::assemble(metadata, extracted);
        self.generate_definitions(&definitions)
    }

    /// Generate only the process entity for already-deployed metadata.
    pub fn generate_process(&self, metadata: &ProcessMetadata) -> Result<GenerationReport> {
        self.generate_definitions(&[ProcessDefinition {
            metadata: metadata.clone(),
            tasks: Vec::new(),
        }])
    }

    pub fn generate_definitions(&self, definitions: &[ProcessDefinition]) -> Result<GenerationReport> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let run_id = Uuid::now_v7();
        info!(%run_id, processes = definitions.len(), "Starting generation run");

        let mut manifest = Manifest::load(&self.config.manifest_file())?;
        let plan = self.plan(definitions, &manifest)?;

        let mut outcomes: Vec<EntityOutcome> = Vec::with_capacity(plan.len());
        for planned in &plan {
            match self.commit_entity(planned, &mut manifest, run_id) {
                Ok(outcome) => {
                    info!(
                        %run_id,
                        entity = %planned.key,
                        written = outcome.written.len(),
                        unchanged = outcome.unchanged.len(),
                        "Entity generated"
                    );
                    outcomes.push(outcome);
                }
                Err(source) => {
                    warn!(%run_id, entity = %planned.key, error = %source, "Generation aborted");
                    return Err(ScaffoldError::Aborted {
                        entity: planned.key.to_string(),
                        completed: outcomes.iter().map(|o| o.entity.clone()).collect(),
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(%run_id, entities = outcomes.len(), "Generation run complete");
        Ok(GenerationReport {
            run_id,
            entities: outcomes,
        })
    }

    /// Compare the manifest with the target tree.
    pub fn verify(&self) -> Result<Vec<Drift>> {
        let manifest = self.manifest()?;
        Ok(manifest.drift(&self.config.target_root))
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.config.manifest_file())
    }

    // ── Planning ──

    /// Order: processes, then service tasks grouped by job type, then user
    /// tasks. All identifiers are claimed here so a collision fails the run
    /// before the first write.
    fn plan<'a>(&self, definitions: &'a [ProcessDefinition], manifest: &Manifest) -> Result<Vec<Planned<'a>>> {
        let mut processes = Vec::new();
        let mut services: Vec<Planned<'a>> = Vec::new();
        let mut user_tasks: Vec<Planned<'a>> = Vec::new();

        for def in definitions {
            let id = &def.metadata.bpmn_process_id;
            processes.push(Planned {
                key: EntityKey::new(EntityKind::Process, id.clone()),
                ids: normalize(id),
                source: Source::Process(&def.metadata),
            });

            for task in def.service_tasks() {
                let task_type = task.effective_type().to_string();
                match services.iter().position(|p| p.key.source_id == task_type) {
                    Some(pos) => {
                        if let Source::ServiceTask { tasks, .. } = &mut services[pos].source {
                            tasks.push(task);
                        }
                    }
                    None => services.push(Planned {
                        key: EntityKey::new(EntityKind::ServiceTask, task_type.clone()),
                        ids: normalize(&task_type),
                        source: Source::ServiceTask {
                            task_type,
                            tasks: vec![task],
                        },
                    }),
                }
            }

            for task in def.user_tasks() {
                if user_tasks.iter().any(|p| p.key.source_id == task.id) {
                    warn!(task_id = %task.id, "User task id repeated across processes, keeping first");
                    continue;
                }
                let raw = if task.name.trim().is_empty() {
                    &task.id
                } else {
                    &task.name
                };
                user_tasks.push(Planned {
                    key: EntityKey::new(EntityKind::UserTask, task.id.clone()),
                    ids: normalize(raw),
                    source: Source::UserTask(task),
                });
            }
        }

        let plan: Vec<Planned<'a>> = processes.into_iter().chain(services).chain(user_tasks).collect();

        let mut registry = IdentifierRegistry::new();
        manifest.seed(&mut registry)?;
        for planned in &plan {
            registry.release(&planned.key);
        }
        for planned in &plan {
            registry.allocate(&planned.key, &planned.ids)?;
        }

        debug!(entities = plan.len(), "Planned generation");
        Ok(plan)
    }

    // ── Commit ──

    fn render(&self, planned: &Planned<'_>) -> Result<Vec<GeneratedArtifact>> {
        match &planned.source {
            Source::Process(meta) => self.synth.process(&planned.key, &planned.ids, meta),
            Source::UserTask(task) => {
                let form = self.forms.resolve(task)?;
                if form.is_none() {
                    debug!(task_id = %task.id, "No form for user task");
                }
                self.synth.user_task(&planned.key, &planned.ids, task, form.as_ref())
            }
            Source::ServiceTask { task_type, tasks } => {
                self.synth
                    .service_task(&planned.key, &planned.ids, task_type, tasks)
            }
        }
    }

    fn commit_entity(&self, planned: &Planned<'_>, manifest: &mut Manifest, run_id: Uuid) -> Result<EntityOutcome> {
        let artifacts = self.render(planned)?;

        let mut changes = ChangeSet::new(&self.config.target_root);
        let mut next = manifest.clone();
        self.supersede(planned, &mut next, &mut changes)?;

        let mut artifact_records = Vec::new();
        let mut fragment_records = Vec::new();

        for artifact in artifacts {
            match artifact {
                GeneratedArtifact::Standalone { path, content } => {
                    artifact_records.push(ArtifactRecord {
                        path: path.clone(),
                        sha256: sha256_hex(content.as_bytes()),
                    });
                    changes.write(path, content);
                }
                GeneratedArtifact::SharedFragment {
                    path,
                    anchor,
                    slot,
                    block_id,
                    content,
                } => {
                    let current = changes.read(&path)?.ok_or_else(|| {
                        ScaffoldError::io(
                            self.config.target_path(&path),
                            std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                "shared file missing, run init first",
                            ),
                        )
                    })?;
                    let patched = patch::apply(self.config.patch_mode, &path, &current, &anchor, &block_id, &content)?;
                    changes.write(path.clone(), patched);
                    fragment_records.push(FragmentRecord { path, slot, block_id });
                }
            }
        }

        let orphans = next.record(EntityRecord {
            key: planned.key.clone(),
            raw_name: planned.ids.raw.clone(),
            identifiers: planned.ids.clone(),
            artifacts: artifact_records,
            fragments: fragment_records,
            generated_at: Utc::now(),
            run_id,
        });
        for orphan in &orphans {
            warn!(entity = %planned.key, path = %orphan.display(), "Artifact no longer generated, left in place");
        }
        changes.write(self.config.manifest_path.clone(), next.to_json()?);

        let summary = changes.commit()?;
        *manifest = next;

        Ok(EntityOutcome {
            entity: planned.key.to_string(),
            written: summary.written,
            unchanged: summary.unchanged,
        })
    }

    /// Drop records of other entities whose identifiers this entity takes
    /// over, together with their shared-file blocks. Runs inside the
    /// entity's change set, so a later failure of the previous owner cannot
    /// leave two owners in the ledger.
    fn supersede(&self, planned: &Planned<'_>, next: &mut Manifest, changes: &mut ChangeSet) -> Result<()> {
        for stale in next.superseded_by(&planned.key, &planned.ids) {
            let Some(record) = next.remove(&stale) else {
                continue;
            };
            for fragment in &record.fragments {
                if let Some(current) = changes.read(&fragment.path)? {
                    let trimmed = patch::remove_block(&current, &fragment.block_id);
                    changes.write(fragment.path.clone(), trimmed);
                }
            }
            warn!(
                entity = %planned.key,
                previous = %stale,
                artifacts = record.artifacts.len(),
                "Identifiers taken over from previous owner"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssignmentRule, Task};

    fn scaffolder(root: &std::path::Path) -> Scaffolder {
        let config = ScaffoldConfig {
            target_root: root.join("app"),
            forms_dir: root.join("forms"),
            ..ScaffoldConfig::default()
        };
        std::fs::create_dir_all(root.join("forms")).unwrap();
        Scaffolder::new(config).unwrap()
    }

    fn meta(id: &str) -> ProcessMetadata {
        ProcessMetadata {
            bpmn_process_id: id.to_string(),
            version: 1,
            process_definition_key: 100,
            resource_name: format!("{id}.bpmn"),
        }
    }

    fn service(id: &str, task_type: &str) -> Task {
        Task::Service(ServiceTask {
            id: id.to_string(),
            name: id.to_string(),
            task_type: Some(task_type.to_string()),
        })
    }

    fn user(id: &str, name: &str) -> Task {
        Task::User(UserTask {
            id: id.to_string(),
            name: name.to_string(),
            form_id: None,
            assignment: AssignmentRule::default(),
            due_date: None,
        })
    }

    #[test]
    fn init_writes_skeletons_once() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());

        let created = scaffolder.init_target().unwrap();
        assert_eq!(created.len(), 6);

        let routes = dir.path().join("app/src/routes.rs");
        std::fs::write(&routes, "// customised\n// @scaffold:anchor process-routes\n").unwrap();
        let created = scaffolder.init_target().unwrap();
        assert!(created.is_empty());
        assert!(std::fs::read_to_string(&routes).unwrap().starts_with("// customised"));
    }

    #[test]
    fn generation_without_init_aborts_first_entity() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());
        let err = scaffolder.generate_process(&meta("order")).unwrap_err();
        match err {
            ScaffoldError::Aborted { entity, completed, source } => {
                assert_eq!(entity, "process:order");
                assert!(completed.is_empty());
                assert!(matches!(*source, ScaffoldError::FileIo { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("app/src/store/order_process.rs").exists());
    }

    #[test]
    fn service_tasks_sharing_a_type_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());
        scaffolder.init_target().unwrap();

        let def = ProcessDefinition {
            metadata: meta("order"),
            tasks: vec![service("a", "send-email"), service("b", "send-email")],
        };
        let report = scaffolder.generate_definitions(&[def]).unwrap();
        let entities: Vec<&str> = report.entities.iter().map(|e| e.entity.as_str()).collect();
        assert_eq!(entities, vec!["process:order", "service_task:send-email"]);

        let module =
            std::fs::read_to_string(dir.path().join("app/src/service/send_email_service_task.rs")).unwrap();
        assert!(module.contains("(\"a\", \"a\"),"));
        assert!(module.contains("(\"b\", \"b\"),"));
    }

    #[test]
    fn collision_fails_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());
        scaffolder.init_target().unwrap();

        let def = ProcessDefinition {
            metadata: meta("order"),
            tasks: vec![user("t1", "Review Order"), user("t2", "review-order")],
        };
        let err = scaffolder.generate_definitions(&[def]).unwrap_err();
        assert!(matches!(err, ScaffoldError::IdentifierCollision { .. }));
        assert!(!dir.path().join("app/src/store/order_process.rs").exists());
        assert!(!dir.path().join("app/.scaffold/manifest.json").exists());
    }

    #[test]
    fn renamed_user_task_releases_old_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());
        scaffolder.init_target().unwrap();

        let first = ProcessDefinition {
            metadata: meta("order"),
            tasks: vec![user("t1", "Review")],
        };
        scaffolder.generate_definitions(&[first]).unwrap();

        let renamed = ProcessDefinition {
            metadata: meta("order"),
            tasks: vec![user("t1", "Approve"), user("t2", "Review")],
        };
        scaffolder.generate_definitions(&[renamed]).unwrap();

        let manifest = scaffolder.manifest().unwrap();
        let t2 = manifest.get(&EntityKey::new(EntityKind::UserTask, "t2")).unwrap();
        assert_eq!(t2.identifiers.file_stem, "review");
    }

    #[test]
    fn abort_after_identifier_takeover_keeps_target_usable() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());
        scaffolder.init_target().unwrap();

        scaffolder
            .generate_definitions(&[ProcessDefinition {
                metadata: meta("flow"),
                tasks: vec![user("t1", "Review")],
            }])
            .unwrap();

        let approve = Task::User(UserTask {
            id: "t1".to_string(),
            name: "Approve".to_string(),
            form_id: Some("missing".to_string()),
            assignment: AssignmentRule::default(),
            due_date: None,
        });
        let err = scaffolder
            .generate_definitions(&[ProcessDefinition {
                metadata: meta("flow"),
                tasks: vec![user("t2", "Review"), approve],
            }])
            .unwrap_err();
        match &err {
            ScaffoldError::Aborted { entity, completed, .. } => {
                assert_eq!(entity, "user_task:t1");
                assert_eq!(completed, &vec!["process:flow".to_string(), "user_task:t2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let manifest = scaffolder.manifest().unwrap();
        assert!(manifest.get(&EntityKey::new(EntityKind::UserTask, "t1")).is_none());
        let store_mod = std::fs::read_to_string(dir.path().join("app/src/store/mod.rs")).unwrap();
        assert_eq!(store_mod.matches("pub mod review_user_task;").count(), 1);
        assert!(!store_mod.contains("user_task:t1"));
        assert!(scaffolder.verify().unwrap().is_empty());

        scaffolder.generate_process(&meta("unrelated")).unwrap();
    }

    #[test]
    fn verify_reports_edits() {
        let dir = tempfile::tempdir().unwrap();
        let scaffolder = scaffolder(dir.path());
        scaffolder.init_target().unwrap();
        scaffolder.generate_process(&meta("order")).unwrap();
        assert!(scaffolder.verify().unwrap().is_empty());

        std::fs::write(dir.path().join("app/src/store/order_process.rs"), "// edited\n").unwrap();
        let drift = scaffolder.verify().unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].path, PathBuf::from("src/store/order_process.rs"));
    }
}
