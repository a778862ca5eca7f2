//! Artifact synthesis.
//!
//! Renders every generated file from the embedded handlebars templates.
//! Rendering is pure: the same inputs always produce byte-identical output,
//! and nothing here touches the filesystem.

use handlebars::Handlebars;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{Anchors, Features, Layout, ScaffoldConfig};
use crate::error::Result;
use crate::form::FormSchema;
use crate::naming::IdentifierSet;
use crate::types::{EntityKey, EntityKind, ProcessMetadata, ServiceTask, UserTask};

const TEMPLATES: &[(&str, &str)] = &[
    ("process_up", include_str!("templates/process_up.sql.hbs")),
    ("process_down", include_str!("templates/process_down.sql.hbs")),
    ("process_store", include_str!("templates/process_store.rs.hbs")),
    ("process_handler", include_str!("templates/process_handler.rs.hbs")),
    ("entity_cache", include_str!("templates/entity_cache.rs.hbs")),
    ("user_task_up", include_str!("templates/user_task_up.sql.hbs")),
    ("user_task_down", include_str!("templates/user_task_down.sql.hbs")),
    ("user_task_store", include_str!("templates/user_task_store.rs.hbs")),
    ("user_task_handler", include_str!("templates/user_task_handler.rs.hbs")),
    ("form_payload", include_str!("templates/form_payload.rs.hbs")),
    ("service_task", include_str!("templates/service_task.rs.hbs")),
    ("skeleton_store_mod", include_str!("templates/skeleton_store_mod.rs.hbs")),
    ("skeleton_pagination", include_str!("templates/skeleton_pagination.rs.hbs")),
    ("skeleton_cache_mod", include_str!("templates/skeleton_cache_mod.rs.hbs")),
    ("skeleton_handlers_mod", include_str!("templates/skeleton_handlers_mod.rs.hbs")),
    ("skeleton_service_mod", include_str!("templates/skeleton_service_mod.rs.hbs")),
    ("skeleton_routes", include_str!("templates/skeleton_routes.rs.hbs")),
];

// ─── Artifacts ────────────────────────────────────────────────

/// One unit of generated output. Paths are relative to the target root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratedArtifact {
    /// A whole file owned by one entity.
    Standalone { path: PathBuf, content: String },
    /// A snippet merged into a file shared by all entities.
    SharedFragment {
        path: PathBuf,
        anchor: String,
        /// Slot name, e.g. `store-fields`.
        slot: String,
        /// `<slot>/<entity key>`, unique per file.
        block_id: String,
        content: String,
    },
}

impl GeneratedArtifact {
    pub fn path(&self) -> &PathBuf {
        match self {
            GeneratedArtifact::Standalone { path, .. } => path,
            GeneratedArtifact::SharedFragment { path, .. } => path,
        }
    }

    pub fn is_standalone(&self) -> bool {
        matches!(self, GeneratedArtifact::Standalone { .. })
    }
}

// ─── Template contexts ────────────────────────────────────────

#[derive(Serialize)]
struct ProcessContext<'a> {
    type_name: &'a str,
    module: &'a str,
    field: &'a str,
    table: &'a str,
    bpmn_process_id: &'a str,
    version: i32,
    process_definition_key: i64,
    resource_name: &'a str,
    features: Features,
}

#[derive(Serialize)]
struct CacheContext<'a> {
    entity: String,
    module: &'a str,
    row_type: String,
}

#[derive(Serialize)]
struct UserTaskContext<'a> {
    type_name: &'a str,
    module: &'a str,
    field: &'a str,
    table: &'a str,
    task_id: &'a str,
    task_name: &'a str,
    form_id: Option<&'a str>,
    assignee: Option<&'a str>,
    candidate_groups: Option<&'a str>,
    candidate_users: Option<&'a str>,
    due_date: Option<&'a str>,
    has_form: bool,
    form_type: String,
    payload: String,
}

#[derive(Serialize)]
struct PayloadContext<'a> {
    type_name: &'a str,
    form_id: &'a str,
    fields: Vec<PayloadFieldContext<'a>>,
}

#[derive(Serialize)]
struct PayloadFieldContext<'a> {
    key: &'a str,
    ident: &'a str,
    rust_type: &'static str,
    required: bool,
}

#[derive(Serialize)]
struct ServiceContext<'a> {
    task_type: &'a str,
    tasks: Vec<ServiceTaskRef<'a>>,
}

#[derive(Serialize)]
struct ServiceTaskRef<'a> {
    id: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct SkeletonContext<'a> {
    anchors: &'a Anchors,
}

// ─── Synthesizer ──────────────────────────────────────────────

pub struct Synthesizer {
    handlebars: Handlebars<'static>,
    layout: Layout,
    anchors: Anchors,
    features: Features,
}

impl Synthesizer {
    pub fn new(config: &ScaffoldConfig) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("rust_str", Box::new(rust_str_helper));
        handlebars.register_helper("rust_opt_str", Box::new(rust_opt_str_helper));
        for (name, source) in TEMPLATES {
            handlebars.register_template_string(name, *source)?;
        }

        Ok(Self {
            handlebars,
            layout: config.layout.clone(),
            anchors: config.anchors.clone(),
            features: config.features,
        })
    }

    fn render<T: Serialize>(&self, template: &str, data: &T) -> Result<String> {
        Ok(self.handlebars.render(template, data)?)
    }

    /// Files and registrations for a process entity.
    pub fn process(
        &self,
        key: &EntityKey,
        ids: &IdentifierSet,
        meta: &ProcessMetadata,
    ) -> Result<Vec<GeneratedArtifact>> {
        let module = ids.module_name(EntityKind::Process);
        let row_type = format!("{}Process", ids.type_name);
        let ctx = ProcessContext {
            type_name: &ids.type_name,
            module: &module,
            field: &module,
            table: &ids.table_name,
            bpmn_process_id: &meta.bpmn_process_id,
            version: meta.version,
            process_definition_key: meta.process_definition_key,
            resource_name: &meta.resource_name,
            features: self.features,
        };

        let mut artifacts = vec![
            self.standalone(
                self.layout.migrations_dir.join(format!("{}.up.sql", module)),
                self.render("process_up", &ctx)?,
            ),
            self.standalone(
                self.layout.migrations_dir.join(format!("{}.down.sql", module)),
                self.render("process_down", &ctx)?,
            ),
            self.standalone(
                self.layout.store_dir.join(format!("{}.rs", module)),
                self.render("process_store", &ctx)?,
            ),
            self.standalone(
                self.layout.cache_dir.join(format!("{}.rs", module)),
                self.render("entity_cache", &self.cache_context(key, &module, row_type.clone()))?,
            ),
            self.standalone(
                self.layout.handlers_dir.join(format!("{}.rs", module)),
                self.render("process_handler", &ctx)?,
            ),
        ];
        artifacts.extend(self.registry_fragments(key, &module, &row_type));
        artifacts.push(self.fragment(
            key,
            self.layout.routes_file.clone(),
            &self.anchors.process_routes,
            "process-routes",
            format!(
                "processes = processes.nest(\"/{}\", handlers::{}::routes());",
                ids.file_stem, module
            ),
        ));

        debug!(entity = %key, artifacts = artifacts.len(), "Synthesized process artifacts");
        Ok(artifacts)
    }

    /// Files and registrations for a user-task entity.
    pub fn user_task(
        &self,
        key: &EntityKey,
        ids: &IdentifierSet,
        task: &UserTask,
        form: Option<&FormSchema>,
    ) -> Result<Vec<GeneratedArtifact>> {
        let module = ids.module_name(EntityKind::UserTask);
        let row_type = format!("{}UserTask", ids.type_name);

        let shape = form.map(|f| f.payload_shape(&ids.type_name));
        let payload = match (&shape, form) {
            (Some(shape), Some(form)) => {
                let form_id = form.id.as_deref().or(task.form_id.as_deref()).unwrap_or(&task.id);
                let ctx = PayloadContext {
                    type_name: &shape.type_name,
                    form_id,
                    fields: shape
                        .fields
                        .iter()
                        .map(|f| PayloadFieldContext {
                            key: &f.key,
                            ident: &f.ident,
                            rust_type: f.ty.rust_type(),
                            required: f.required,
                        })
                        .collect(),
                };
                self.render("form_payload", &ctx)?.trim_end().to_string()
            }
            _ => String::new(),
        };

        let ctx = UserTaskContext {
            type_name: &ids.type_name,
            module: &module,
            field: &module,
            table: &ids.table_name,
            task_id: &task.id,
            task_name: &task.name,
            form_id: task.form_id.as_deref(),
            assignee: task.assignment.assignee.as_deref(),
            candidate_groups: task.assignment.candidate_groups.as_deref(),
            candidate_users: task.assignment.candidate_users.as_deref(),
            due_date: task.due_date.as_deref(),
            has_form: shape.is_some(),
            form_type: shape.as_ref().map(|s| s.type_name.clone()).unwrap_or_default(),
            payload,
        };

        let mut artifacts = vec![
            self.standalone(
                self.layout.migrations_dir.join(format!("{}.up.sql", module)),
                self.render("user_task_up", &ctx)?,
            ),
            self.standalone(
                self.layout.migrations_dir.join(format!("{}.down.sql", module)),
                self.render("user_task_down", &ctx)?,
            ),
            self.standalone(
                self.layout.store_dir.join(format!("{}.rs", module)),
                self.render("user_task_store", &ctx)?,
            ),
            self.standalone(
                self.layout.cache_dir.join(format!("{}.rs", module)),
                self.render("entity_cache", &self.cache_context(key, &module, row_type.clone()))?,
            ),
            self.standalone(
                self.layout.handlers_dir.join(format!("{}.rs", module)),
                self.render("user_task_handler", &ctx)?,
            ),
        ];
        artifacts.extend(self.registry_fragments(key, &module, &row_type));
        artifacts.push(self.fragment(
            key,
            self.layout.routes_file.clone(),
            &self.anchors.user_task_routes,
            "user-task-routes",
            format!(
                "user_tasks = user_tasks.nest(\"/{}\", handlers::{}::routes());",
                ids.file_stem, module
            ),
        ));

        debug!(entity = %key, artifacts = artifacts.len(), "Synthesized user task artifacts");
        Ok(artifacts)
    }

    /// Constants module for one job type, listing every task that uses it.
    pub fn service_task(
        &self,
        key: &EntityKey,
        ids: &IdentifierSet,
        task_type: &str,
        tasks: &[&ServiceTask],
    ) -> Result<Vec<GeneratedArtifact>> {
        let module = ids.module_name(EntityKind::ServiceTask);
        let ctx = ServiceContext {
            task_type,
            tasks: tasks
                .iter()
                .map(|t| ServiceTaskRef {
                    id: &t.id,
                    name: &t.name,
                })
                .collect(),
        };

        let artifacts = vec![
            self.standalone(
                self.layout.service_dir.join(format!("{}.rs", module)),
                self.render("service_task", &ctx)?,
            ),
            self.fragment(
                key,
                self.layout.service_dir.join("mod.rs"),
                &self.anchors.service_modules,
                "service-modules",
                format!("pub mod {};", module),
            ),
        ];

        debug!(entity = %key, "Synthesized service task artifacts");
        Ok(artifacts)
    }

    /// Shared files written once by `init`, each carrying its anchors.
    pub fn skeletons(&self) -> Result<Vec<(PathBuf, String)>> {
        let ctx = SkeletonContext {
            anchors: &self.anchors,
        };
        Ok(vec![
            (self.layout.store_dir.join("mod.rs"), self.render("skeleton_store_mod", &ctx)?),
            (
                self.layout.store_dir.join("pagination.rs"),
                self.render("skeleton_pagination", &ctx)?,
            ),
            (self.layout.cache_dir.join("mod.rs"), self.render("skeleton_cache_mod", &ctx)?),
            (
                self.layout.handlers_dir.join("mod.rs"),
                self.render("skeleton_handlers_mod", &ctx)?,
            ),
            (
                self.layout.service_dir.join("mod.rs"),
                self.render("skeleton_service_mod", &ctx)?,
            ),
            (self.layout.routes_file.clone(), self.render("skeleton_routes", &ctx)?),
        ])
    }

    // ── Helpers ──

    fn cache_context<'a>(&self, key: &EntityKey, module: &'a str, row_type: String) -> CacheContext<'a> {
        CacheContext {
            entity: key.to_string(),
            module,
            row_type,
        }
    }

    fn standalone(&self, path: PathBuf, content: String) -> GeneratedArtifact {
        GeneratedArtifact::Standalone { path, content }
    }

    fn fragment(
        &self,
        key: &EntityKey,
        path: PathBuf,
        anchor: &str,
        slot: &str,
        content: String,
    ) -> GeneratedArtifact {
        GeneratedArtifact::SharedFragment {
            path,
            anchor: anchor.to_string(),
            slot: slot.to_string(),
            block_id: format!("{}/{}", slot, key),
            content,
        }
    }

    /// Store, cache and handler registrations shared by process and user-task
    /// entities.
    fn registry_fragments(&self, key: &EntityKey, module: &str, row_type: &str) -> Vec<GeneratedArtifact> {
        let store_mod = self.layout.store_dir.join("mod.rs");
        let cache_mod = self.layout.cache_dir.join("mod.rs");
        let a = &self.anchors;
        vec![
            self.fragment(key, store_mod.clone(), &a.store_modules, "store-modules", format!("pub mod {};", module)),
            self.fragment(
                key,
                store_mod.clone(),
                &a.store_fields,
                "store-fields",
                format!("pub {}: {}::{}Store,", module, module, row_type),
            ),
            self.fragment(
                key,
                store_mod,
                &a.store_constructors,
                "store-constructors",
                format!("{}: {}::{}Store::new(pool.clone()),", module, module, row_type),
            ),
            self.fragment(key, cache_mod.clone(), &a.cache_modules, "cache-modules", format!("pub mod {};", module)),
            self.fragment(
                key,
                cache_mod.clone(),
                &a.cache_fields,
                "cache-fields",
                format!("pub {}: {}::{}Cache,", module, module, row_type),
            ),
            self.fragment(
                key,
                cache_mod,
                &a.cache_constructors,
                "cache-constructors",
                format!("{}: {}::{}Cache::new(conn.clone()),", module, module, row_type),
            ),
            self.fragment(
                key,
                self.layout.handlers_dir.join("mod.rs"),
                &a.handler_modules,
                "handler-modules",
                format!("pub mod {};", module),
            ),
        ]
    }
}

// Handlebars helpers

/// Render a string parameter as a Rust string literal.
fn rust_str_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&format!("{:?}", param))?;
    Ok(())
}

/// Render a nullable string parameter as `Some("...")` or `None`.
fn rust_opt_str_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    match h.param(0).and_then(|v| v.value().as_str()) {
        Some(s) => out.write(&format!("Some({:?})", s))?,
        None => out.write("None")?,
    }
    Ok(())
}
