use thiserror::Error;

/// Main error type for the Arbor search core
#[derive(Error, Debug)]
pub enum CsError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Search cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CsError {
    /// True for errors that abort a search because the catalog or the
    /// candidate data is malformed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CsError::Catalog(_) | CsError::Model(_) | CsError::Domain(_) | CsError::Config(_)
        )
    }
}

/// Catalog-related errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unknown parameter {parameter} on component {component}")]
    UnknownParameter { component: String, parameter: String },

    #[error("Unknown interface {interface} on component {component}")]
    UnknownInterface { component: String, interface: String },

    #[error("Invalid domain for {component}.{parameter}: {message}")]
    InvalidDomain {
        component: String,
        parameter: String,
        message: String,
    },

    #[error("Duplicate component: {name}")]
    DuplicateComponent { name: String },

    #[error("Component not found: {name}")]
    ComponentNotFound { name: String },
}

/// Candidate-tree errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Path not found: interface {interface} is not declared at {path}")]
    PathNotFound { path: String, interface: String },

    #[error("Interface {interface} at {path} is declared but not satisfied")]
    InterfaceUnsatisfied { path: String, interface: String },

    #[error("Interface {interface} at {path} is already satisfied")]
    InterfaceAlreadySatisfied { path: String, interface: String },

    #[error("Node index {index} is missing from the tree")]
    NodeMissing { index: u32 },
}

/// Parameter-domain errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Domain kind mismatch: {left} vs {right}")]
    KindMismatch { left: String, right: String },

    #[error("Cannot parse parameter value: {input}")]
    Parse { input: String },
}

/// Evaluation-scheduler errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Worker pool creation failed: {message}")]
    PoolCreation { message: String },

    #[error("Worker channel disconnected")]
    Disconnected,
}

/// Result type alias for Arbor operations
pub type CsResult<T> = Result<T, CsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CsError::Config(format!($($arg)*))
    };
}
