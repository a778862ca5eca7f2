//! Camunda form schemas and the payload structs derived from them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, ScaffoldError};
use crate::types::UserTask;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
    Select,
    Other(String),
}

impl FieldKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "textfield" | "text" => FieldKind::Text,
            "textarea" => FieldKind::Textarea,
            "number" => FieldKind::Number,
            "select" => FieldKind::Select,
            other => FieldKind::Other(other.to_string()),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldKind::Text | FieldKind::Textarea | FieldKind::Select => FieldType::String,
            FieldKind::Number => FieldType::Float,
            FieldKind::Other(_) => FieldType::Json,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    pub label: Option<String>,
    pub kind: FieldKind,
    pub required: bool,
}

/// Input fields of one form, flattened in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSchema {
    pub id: Option<String>,
    pub fields: Vec<FormField>,
}

impl FormSchema {
    /// Parse form JSON. `origin` is only used in error messages.
    pub fn from_json(bytes: &[u8], origin: &Path) -> Result<Self> {
        let raw: RawForm = serde_json::from_slice(bytes).map_err(|e| ScaffoldError::FormRead {
            path: origin.to_path_buf(),
            reason: format!("invalid form JSON: {}", e),
        })?;

        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        flatten(&raw.components, &mut fields, &mut seen, origin);

        Ok(FormSchema { id: raw.id, fields })
    }

    /// Derive the payload struct shape for the task whose type stem is
    /// `type_name`.
    pub fn payload_shape(&self, type_name: &str) -> PayloadShape {
        let mut used = HashSet::new();
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let base = field_ident(&f.key);
                let mut ident = base.clone();
                let mut n = 2;
                while !used.insert(ident.clone()) {
                    ident = format!("{}_{}", base, n);
                    n += 1;
                }
                PayloadField {
                    key: f.key.clone(),
                    ident,
                    ty: f.kind.field_type(),
                    required: f.required,
                }
            })
            .collect();

        PayloadShape {
            type_name: format!("FormData{}", type_name),
            fields,
        }
    }
}

fn flatten(
    components: &[RawComponent],
    out: &mut Vec<FormField>,
    seen: &mut HashSet<String>,
    origin: &Path,
) {
    for component in components {
        if !component.key.is_empty() {
            if seen.insert(component.key.clone()) {
                out.push(FormField {
                    key: component.key.clone(),
                    label: component.label.clone(),
                    kind: FieldKind::parse(&component.kind),
                    required: component.validate.required,
                });
            } else {
                warn!(
                    form = %origin.display(),
                    key = %component.key,
                    "Duplicate form key, keeping first occurrence"
                );
            }
        }
        flatten(&component.components, out, seen, origin);
    }
}

// ── Payload shape ──

/// Rust type a form field maps to in generated code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Float,
    Json,
}

impl FieldType {
    pub fn rust_type(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Float => "f64",
            FieldType::Json => "serde_json::Value",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PayloadField {
    /// JSON key as it appears in the form.
    pub key: String,
    /// Rust field name.
    pub ident: String,
    pub ty: FieldType,
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PayloadShape {
    pub type_name: String,
    pub fields: Vec<PayloadField>,
}

impl PayloadShape {
    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|f| f.required).count()
    }
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "static", "struct", "trait", "true", "type", "unsafe", "use",
    "where", "while", "yield",
];

/// snake_case Rust field name for a form key: `firstName` → `first_name`.
fn field_ident(key: &str) -> String {
    let mut ident = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                ident.push('_');
            }
            ident.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            ident.push(c);
            prev_lower = true;
        } else {
            ident.push('_');
            prev_lower = false;
        }
    }
    if !ident.chars().any(|c| c.is_ascii_alphanumeric()) || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "field_");
    }
    match ident.as_str() {
        "self" | "super" | "crate" | "Self" => format!("{}_", ident),
        kw if RUST_KEYWORDS.contains(&kw) => format!("r#{}", ident),
        _ => ident,
    }
}

// ── Reading ──

/// Read and parse a form file.
pub fn read_form(path: &Path) -> Result<FormSchema> {
    let bytes = std::fs::read(path).map_err(|e| ScaffoldError::FormRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let schema = FormSchema::from_json(&bytes, path)?;
    debug!(form = %path.display(), fields = schema.fields.len(), "Read form schema");
    Ok(schema)
}

/// Finds the form file for a user task under one directory.
#[derive(Clone, Debug)]
pub struct FormLocator {
    forms_dir: PathBuf,
}

impl FormLocator {
    pub fn new(forms_dir: impl Into<PathBuf>) -> Self {
        Self {
            forms_dir: forms_dir.into(),
        }
    }

    /// Paths tried for `task`, in order: `<formId>.form`, then `<taskId>.form`.
    pub fn candidates(&self, task: &UserTask) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(2);
        if let Some(form_id) = task.form_id.as_deref() {
            paths.push(self.forms_dir.join(format!("{}.form", form_id)));
        }
        paths.push(self.forms_dir.join(format!("{}.form", task.id)));
        paths
    }

    /// Load the task's form.
    ///
    /// A task that declares a form id must have a readable form file. A task
    /// without one gets a form only if `<taskId>.form` exists.
    pub fn resolve(&self, task: &UserTask) -> Result<Option<FormSchema>> {
        let candidates = self.candidates(task);
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => read_form(path).map(Some),
            None if task.form_id.is_some() => Err(ScaffoldError::FormRead {
                path: candidates[0].clone(),
                reason: "form file not found".to_string(),
            }),
            None => Ok(None),
        }
    }
}

// ── Wire shape ──

#[derive(Deserialize)]
struct RawForm {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    components: Vec<RawComponent>,
}

#[derive(Deserialize)]
struct RawComponent {
    #[serde(default)]
    key: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    validate: RawValidate,
    #[serde(default)]
    components: Vec<RawComponent>,
}

#[derive(Deserialize, Default)]
struct RawValidate {
    #[serde(default)]
    required: bool,
}
