//! End-to-end generation against a temporary target tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bpmn_scaffold_core::patch::PatchMode;
use bpmn_scaffold_core::{ProcessMetadata, ScaffoldConfig, ScaffoldError, Scaffolder};

const ARTICLE_MODEL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"
                  xmlns:zeebe="http://camunda.org/schema/zeebe/1.0" id="defs">
  <bpmn:process id="article_flow" name="Article Flow" isExecutable="true">
    <bpmn:startEvent id="start" />
    <bpmn:userTask id="Activity_write" name="Pembuatan Artikel">
      <bpmn:extensionElements>
        <zeebe:formDefinition formId="form-write" />
        <zeebe:assignmentDefinition candidateGroups="writers" />
      </bpmn:extensionElements>
    </bpmn:userTask>
    <bpmn:serviceTask id="Activity_mail" name="Kirim Email">
      <bpmn:extensionElements>
        <zeebe:taskDefinition type="send-email" />
      </bpmn:extensionElements>
    </bpmn:serviceTask>
    <bpmn:endEvent id="end" />
  </bpmn:process>
</bpmn:definitions>"#;

const WRITE_FORM: &str = r#"{
  "id": "form-write",
  "components": [
    {"label": "Title", "type": "textfield", "key": "title", "validate": {"required": true}},
    {"label": "Content", "type": "textarea", "key": "content"},
    {"label": "Version", "type": "number", "key": "version", "validate": {"required": true}}
  ]
}"#;

fn metadata() -> Vec<ProcessMetadata> {
    vec![ProcessMetadata {
        bpmn_process_id: "article_flow".to_string(),
        version: 1,
        process_definition_key: 2251799813685249,
        resource_name: "article_flow.bpmn".to_string(),
    }]
}

fn setup(root: &Path, patch_mode: PatchMode) -> Scaffolder {
    let forms = root.join("forms");
    std::fs::create_dir_all(&forms).unwrap();
    std::fs::write(forms.join("form-write.form"), WRITE_FORM).unwrap();

    let config = ScaffoldConfig {
        target_root: root.join("app"),
        forms_dir: forms,
        patch_mode,
        ..ScaffoldConfig::default()
    };
    let scaffolder = Scaffolder::new(config).unwrap();
    scaffolder.init_target().unwrap();
    scaffolder
}

/// Every file under `dir` except the manifest, keyed by relative path.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, String> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n == ".scaffold") {
                    continue;
                }
                walk(base, &path, out);
            } else {
                let rel = path.strip_prefix(base).unwrap().to_path_buf();
                out.insert(rel, std::fs::read_to_string(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join("app").join(rel))
        .unwrap_or_else(|e| panic!("reading {rel}: {e}"))
}

#[test]
fn generates_process_user_task_and_service_task() {
    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Merge);

    let report = scaffolder
        .generate_deployment(ARTICLE_MODEL.as_bytes(), &metadata())
        .unwrap();
    let entities: Vec<&str> = report.entities.iter().map(|e| e.entity.as_str()).collect();
    assert_eq!(
        entities,
        vec![
            "process:article_flow",
            "service_task:send-email",
            "user_task:Activity_write"
        ]
    );

    for rel in [
        "migrations/article_flow_process.up.sql",
        "migrations/article_flow_process.down.sql",
        "src/store/article_flow_process.rs",
        "src/cache/article_flow_process.rs",
        "src/handlers/article_flow_process.rs",
        "migrations/pembuatan_artikel_user_task.up.sql",
        "src/store/pembuatan_artikel_user_task.rs",
        "src/cache/pembuatan_artikel_user_task.rs",
        "src/handlers/pembuatan_artikel_user_task.rs",
        "src/service/send_email_service_task.rs",
    ] {
        assert!(dir.path().join("app").join(rel).is_file(), "missing {rel}");
    }
    assert!(!dir.path().join("app/src/store/send_email_service_task.rs").exists());

    let task_store = read(dir.path(), "src/store/pembuatan_artikel_user_task.rs");
    assert!(task_store.contains("pub struct FormDataPembuatanArtikel {"));
    assert_eq!(task_store.matches("#[validate(required)]").count(), 2);
    assert!(task_store.contains("pub title: Option<String>,"));
    assert!(task_store.contains("pub content: Option<String>,"));
    assert!(task_store.contains("pub version: Option<f64>,"));
    assert!(task_store.contains("pub const CANDIDATE_GROUPS: Option<&str> = Some(\"writers\");"));

    let store_mod = read(dir.path(), "src/store/mod.rs");
    assert_eq!(store_mod.matches("pub mod article_flow_process;").count(), 1);
    assert_eq!(store_mod.matches("pub mod pembuatan_artikel_user_task;").count(), 1);
    assert!(store_mod.contains(
        "article_flow_process: article_flow_process::ArticleFlowProcessStore::new(pool.clone()),"
    ));

    let service_mod = read(dir.path(), "src/service/mod.rs");
    assert!(service_mod.contains("pub mod send_email_service_task;"));

    let routes = read(dir.path(), "src/routes.rs");
    assert!(routes.contains("handlers::article_flow_process::routes()"));
    assert!(routes.contains("handlers::pembuatan_artikel_user_task::routes()"));

    let manifest = scaffolder.manifest().unwrap();
    assert_eq!(manifest.entities.len(), 3);
    assert!(scaffolder.verify().unwrap().is_empty());
}

#[test]
fn rerun_leaves_files_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Merge);
    let app = dir.path().join("app");

    scaffolder
        .generate_deployment(ARTICLE_MODEL.as_bytes(), &metadata())
        .unwrap();
    let first = snapshot(&app);

    let report = scaffolder
        .generate_deployment(ARTICLE_MODEL.as_bytes(), &metadata())
        .unwrap();
    let second = snapshot(&app);

    assert_eq!(first, second);
    for entity in &report.entities {
        assert_eq!(
            entity.written,
            vec![PathBuf::from(".scaffold/manifest.json")],
            "{} rewrote generated files",
            entity.entity
        );
    }
}

#[test]
fn standalone_artifacts_are_deterministic_across_targets() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    for dir in [&a, &b] {
        setup(dir.path(), PatchMode::Merge)
            .generate_deployment(ARTICLE_MODEL.as_bytes(), &metadata())
            .unwrap();
    }
    assert_eq!(snapshot(&a.path().join("app")), snapshot(&b.path().join("app")));
}

#[test]
fn append_mode_duplicates_registrations() {
    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Append);
    let process = &metadata()[0];

    for _ in 0..3 {
        scaffolder.generate_process(process).unwrap();
    }
    let store_mod = read(dir.path(), "src/store/mod.rs");
    assert_eq!(store_mod.matches("pub mod article_flow_process;").count(), 3);
}

#[test]
fn merge_mode_keeps_one_registration() {
    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Merge);
    let process = &metadata()[0];

    for _ in 0..3 {
        scaffolder.generate_process(process).unwrap();
    }
    let store_mod = read(dir.path(), "src/store/mod.rs");
    assert_eq!(store_mod.matches("pub mod article_flow_process;").count(), 1);
    let routes = read(dir.path(), "src/routes.rs");
    assert_eq!(routes.matches("handlers::article_flow_process::routes()").count(), 1);
}

#[test]
fn unreadable_form_aborts_that_task_only() {
    const MODEL: &str = r#"<definitions><process id="review_flow">
        <userTask id="Activity_review" name="Review" />
        <userTask id="Activity_approve" name="Approve">
          <extensionElements><formDefinition formId="approve-form" /></extensionElements>
        </userTask>
      </process></definitions>"#;

    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Merge);
    std::fs::write(dir.path().join("forms/approve-form.form"), "{ this is not json").unwrap();

    let metadata = vec![ProcessMetadata {
        bpmn_process_id: "review_flow".to_string(),
        version: 1,
        process_definition_key: 1,
        resource_name: "review_flow.bpmn".to_string(),
    }];
    let err = scaffolder
        .generate_deployment(MODEL.as_bytes(), &metadata)
        .unwrap_err();

    match &err {
        ScaffoldError::Aborted {
            entity,
            completed,
            source,
        } => {
            assert_eq!(entity, "user_task:Activity_approve");
            assert_eq!(
                completed,
                &vec![
                    "process:review_flow".to_string(),
                    "user_task:Activity_review".to_string()
                ]
            );
            assert!(matches!(**source, ScaffoldError::FormRead { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_input_error());

    let app = dir.path().join("app");
    assert!(app.join("src/store/review_flow_process.rs").is_file());
    assert!(app.join("src/store/review_user_task.rs").is_file());
    assert!(!app.join("src/store/approve_user_task.rs").exists());
    assert!(!app.join("migrations/approve_user_task.up.sql").exists());
    assert!(!read(dir.path(), "src/store/mod.rs").contains("approve_user_task"));

    let manifest = scaffolder.manifest().unwrap();
    assert_eq!(manifest.entities.len(), 2);
    assert!(scaffolder.verify().unwrap().is_empty());

    std::fs::write(
        dir.path().join("forms/approve-form.form"),
        r#"{"components": [{"type": "textfield", "key": "note"}]}"#,
    )
    .unwrap();
    let report = scaffolder
        .generate_deployment(MODEL.as_bytes(), &metadata)
        .unwrap();
    assert_eq!(report.entities.len(), 3);
    assert!(app.join("src/store/approve_user_task.rs").is_file());
    assert_eq!(scaffolder.manifest().unwrap().entities.len(), 3);
    assert!(scaffolder.verify().unwrap().is_empty());
}

#[test]
fn renamed_task_abort_then_rerun_recovers() {
    const BEFORE: &str = r#"<definitions><process id="flow">
        <userTask id="t1" name="Review" />
      </process></definitions>"#;
    const AFTER: &str = r#"<definitions><process id="flow">
        <userTask id="t2" name="Review" />
        <userTask id="t1" name="Approve">
          <extensionElements><formDefinition formId="approve" /></extensionElements>
        </userTask>
      </process></definitions>"#;

    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Merge);
    let metadata = vec![ProcessMetadata {
        bpmn_process_id: "flow".to_string(),
        version: 1,
        process_definition_key: 5,
        resource_name: "flow.bpmn".to_string(),
    }];

    scaffolder.generate_deployment(BEFORE.as_bytes(), &metadata).unwrap();
    let err = scaffolder
        .generate_deployment(AFTER.as_bytes(), &metadata)
        .unwrap_err();
    assert!(matches!(err.root_cause(), ScaffoldError::FormRead { .. }));

    // An unrelated process still generates.
    scaffolder
        .generate_process(&ProcessMetadata {
            bpmn_process_id: "billing".to_string(),
            ..metadata[0].clone()
        })
        .unwrap();

    std::fs::write(dir.path().join("forms/approve.form"), r#"{"components": []}"#).unwrap();
    scaffolder.generate_deployment(AFTER.as_bytes(), &metadata).unwrap();

    let store_mod = read(dir.path(), "src/store/mod.rs");
    assert_eq!(store_mod.matches("pub mod review_user_task;").count(), 1);
    assert_eq!(store_mod.matches("pub mod approve_user_task;").count(), 1);
    assert_eq!(scaffolder.manifest().unwrap().entities.len(), 4);
    assert!(scaffolder.verify().unwrap().is_empty());
}

#[test]
fn malformed_model_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let scaffolder = setup(dir.path(), PatchMode::Merge);
    let before = snapshot(&dir.path().join("app"));

    let err = scaffolder
        .generate_deployment(b"<definitions><process id=\"x\">", &metadata())
        .unwrap_err();
    assert!(matches!(err, ScaffoldError::MetadataParse(_)));
    assert_eq!(snapshot(&dir.path().join("app")), before);
}
