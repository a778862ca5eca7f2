//! Error taxonomy for a generation run.
//!
//! Every variant surfaces to the caller as a single failure; nothing is
//! retried. `Aborted` wraps a per-entity failure and lists the entities that
//! were already committed, since those stay on disk.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("Metadata parse error: {0}")]
    MetadataParse(String),

    #[error("Task '{task_id}' declares conflicting <{element}> elements")]
    ConflictingExtension { task_id: String, element: String },

    #[error("Failed to read form {}: {reason}", path.display())]
    FormRead { path: PathBuf, reason: String },

    #[error("Identifier '{identifier}' derived for {entity} is already owned by {owner}")]
    IdentifierCollision {
        identifier: String,
        entity: String,
        owner: String,
    },

    #[error("Name '{0}' does not yield a usable identifier")]
    InvalidIdentifier(String),

    #[error("Invalid resource name '{0}'")]
    InvalidResource(String),

    #[error("File I/O failed on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Anchor '{anchor}' found {found} times in {} (expected exactly one)", path.display())]
    Anchor {
        path: PathBuf,
        anchor: String,
        found: usize,
    },

    #[error("Template render error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Template syntax error: {0}")]
    TemplateSyntax(#[source] Box<handlebars::TemplateError>),

    #[error("Deployment failed: {0}")]
    Deployment(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Generation aborted at {entity} (committed: {completed:?}): {source}")]
    Aborted {
        entity: String,
        completed: Vec<String>,
        #[source]
        source: Box<ScaffoldError>,
    },
}

impl ScaffoldError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScaffoldError::FileIo {
            path: path.into(),
            source,
        }
    }

    /// The innermost error, looking through `Aborted`.
    pub fn root_cause(&self) -> &ScaffoldError {
        match self {
            ScaffoldError::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True for failures caused by the caller's input rather than the
    /// environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self.root_cause(),
            ScaffoldError::MetadataParse(_)
                | ScaffoldError::ConflictingExtension { .. }
                | ScaffoldError::FormRead { .. }
                | ScaffoldError::IdentifierCollision { .. }
                | ScaffoldError::InvalidIdentifier(_)
                | ScaffoldError::InvalidResource(_)
        )
    }
}

impl From<handlebars::TemplateError> for ScaffoldError {
    fn from(err: handlebars::TemplateError) -> Self {
        ScaffoldError::TemplateSyntax(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ScaffoldError>;
