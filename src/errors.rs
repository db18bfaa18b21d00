use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed underlying failure carried by a [`ContainerError`].
pub type ErrorCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of every failure the container can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerErrorCode {
    TokenNotRegistered,
    DuplicateRegistration,
    FactoryFailed,
    CircularDependency,
    Disposed,
    ScopeRequired,
    DisposalFailed,
    InvalidLifecycle,
    InvalidOperation,
    NotValidated,
    AliasTargetNotFound,
}

impl ContainerErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerErrorCode::TokenNotRegistered => "TokenNotRegistered",
            ContainerErrorCode::DuplicateRegistration => "DuplicateRegistration",
            ContainerErrorCode::FactoryFailed => "FactoryFailed",
            ContainerErrorCode::CircularDependency => "CircularDependency",
            ContainerErrorCode::Disposed => "Disposed",
            ContainerErrorCode::ScopeRequired => "ScopeRequired",
            ContainerErrorCode::DisposalFailed => "DisposalFailed",
            ContainerErrorCode::InvalidLifecycle => "InvalidLifecycle",
            ContainerErrorCode::InvalidOperation => "InvalidOperation",
            ContainerErrorCode::NotValidated => "NotValidated",
            ContainerErrorCode::AliasTargetNotFound => "AliasTargetNotFound",
        }
    }
}

impl fmt::Display for ContainerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned by every fallible container operation.
///
/// `code` is the stable classification callers match on; everything else is
/// diagnostic detail that [`crate::metrics::ErrorSanitizer`] may strip before
/// the error leaves a production process.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct ContainerError {
    pub code: ContainerErrorCode,
    pub message: String,
    pub token_description: Option<String>,
    #[source]
    pub cause: Option<ErrorCause>,
    /// Token descriptions from the first occurrence of the repeated token to the repeat.
    pub cycle: Vec<String>,
    /// Individual failures folded into an aggregate `DisposalFailed`.
    pub failures: Vec<ContainerError>,
    /// Hierarchical name of the scope the error was raised in.
    pub scope: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ContainerError {
    pub fn new(code: ContainerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            token_description: None,
            cause: None,
            cycle: Vec::new(),
            failures: Vec::new(),
            scope: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_token(mut self, description: impl Into<String>) -> Self {
        self.token_description = Some(description.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<ErrorCause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn token_not_registered(token: &str) -> Self {
        Self::new(
            ContainerErrorCode::TokenNotRegistered,
            format!("Service {} not registered", token),
        )
        .with_token(token)
    }

    pub fn duplicate_registration(token: &str) -> Self {
        Self::new(
            ContainerErrorCode::DuplicateRegistration,
            format!("Service {} already registered", token),
        )
        .with_token(token)
    }

    pub fn circular_dependency(cycle: Vec<String>) -> Self {
        let repeated = cycle.last().cloned().unwrap_or_default();
        let mut error = Self::new(
            ContainerErrorCode::CircularDependency,
            format!("Circular dependency: {}", cycle.join(" -> ")),
        )
        .with_token(repeated);
        error.cycle = cycle;
        error
    }

    pub fn factory_failed(token: &str, provider: &str, cause: anyhow::Error) -> Self {
        Self::new(
            ContainerErrorCode::FactoryFailed,
            format!("{} failed for {}: {}", provider, token, cause),
        )
        .with_token(token)
        .with_cause(cause)
    }

    pub fn disposed(operation: &str) -> Self {
        Self::new(
            ContainerErrorCode::Disposed,
            format!("Cannot {} on disposed container", operation),
        )
    }

    pub fn not_validated(operation: &str) -> Self {
        Self::new(
            ContainerErrorCode::NotValidated,
            format!(
                "Container must be validated before {}. Call validate() first.",
                operation
            ),
        )
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ContainerErrorCode::InvalidOperation, message)
    }

    /// Wraps a failure raised while building `dependency` on behalf of `dependent`.
    ///
    /// The inner code and cycle are kept so callers can still match on the root failure.
    pub fn dependency_failed(dependent: &str, dependency: &str, inner: ContainerError) -> Self {
        let code = inner.code;
        let cycle = inner.cycle.clone();
        let scope = inner.scope.clone();
        let mut error = Self::new(
            code,
            format!(
                "Failed to build {}: dependency {} could not be resolved ({})",
                dependent, dependency, inner.message
            ),
        )
        .with_token(dependent)
        .with_cause(inner);
        error.cycle = cycle;
        error.scope = scope;
        error
    }

    /// Folds individual disposal failures into one `DisposalFailed` report.
    pub fn disposal_failed(scope: &str, failures: Vec<ContainerError>) -> Self {
        let mut error = Self::new(
            ContainerErrorCode::DisposalFailed,
            format!(
                "{} cleanup failure(s) while disposing scope {}",
                failures.len(),
                scope
            ),
        )
        .with_scope(scope);
        error.failures = failures;
        error
    }

    pub fn is(&self, code: ContainerErrorCode) -> bool {
        self.code == code
    }

    /// Walks the `cause` chain, outermost first.
    pub fn error_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }
}

/// Errors raised while loading [`crate::config::ContainerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Configuration field '{field}' has invalid value '{value}'")]
    InvalidValue { field: String, value: String },
    #[error("Configuration field '{0}' is out of range")]
    OutOfRange(String),
}
