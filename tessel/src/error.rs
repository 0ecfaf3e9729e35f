//! Error types.
use tessel_common::LiteralError;
use thiserror::Error;

/// Syntax error in a property path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid path `{path}` at offset {position}: {reason}")]
pub struct PathError {
    pub path: String,
    pub position: usize,
    pub reason: &'static str,
}

/// Errors raised while parsing templates, directive lists or markup.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("invalid literal: {0}")]
    Literal(#[from] LiteralError),
    #[error("unknown filter `{0}`")]
    MissingFilter(String),
    #[error("invalid filter call `{0}`")]
    Filter(String),
    #[error("unterminated token in `{0}`")]
    Unterminated(String),
    #[error("invalid markup at offset {position}: {reason}")]
    Html { position: usize, reason: &'static str },
    #[error("invalid directive list `{0}`")]
    Directive(String),
}

/// Structural errors, raised when mounting a subtree or pushing a scope into it.
#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unknown directive `{0}`")]
    MissingDirective(String),
    #[error("directive `{name}` failed")]
    Directive {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot repeat a fragment: a single template element is required")]
    FragmentRoot,
    #[error("the template element must be attached to a parent")]
    Detached,
}

/// Runtime errors, caught at the renderer boundary.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("filter `{name}` failed")]
    Filter {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("could not mount a list item")]
    Mount(#[from] Box<MountError>),
}

impl From<MountError> for RenderError {
    fn from(err: MountError) -> Self {
        RenderError::Mount(Box::new(err))
    }
}

/// Render errors collected during one frame.
#[derive(Debug, Error)]
#[error("{} renderer(s) failed during the frame", .errors.len())]
pub struct FrameError {
    pub errors: Vec<RenderError>,
}

/// Errors loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration")]
    Json(#[from] serde_json::Error),
}
