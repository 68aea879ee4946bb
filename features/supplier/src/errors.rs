use std::sync::Arc;

use thiserror::Error;

use crate::{dependency_graph::CircularDependencyError, types::DynError};

/// Errors when registering a name on a [Market](crate::market::Market)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The name is already taken in this market
    #[error("'{0}' is already registered in this market")]
    DuplicateName(String),
    /// Node names must not be empty
    #[error("A node name must not be empty")]
    EmptyName,
}

/// Errors while declaring or deriving a product supplier
///
/// Raised at construction time, never deferred.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// A required part of the declaration is missing
    #[error("'{product}' is missing its {field}")]
    MissingField {
        product: String,
        field: &'static str,
    },
    /// A part of the declaration has the wrong kind
    #[error("'{product}' has an invalid {field}: expected {expected}, got {actual}")]
    InvalidKind {
        product: String,
        field: &'static str,
        expected: String,
        actual: String,
    },
    /// A deferred supplier was defined more than once
    #[error("Deferred supplier '{0}' has already been defined")]
    AlreadyDefined(String),
    /// The declaration depends on itself
    #[error(transparent)]
    Circular(#[from] CircularDependencyError),
}

/// Errors when assembling or reading supplies
#[derive(Error, Debug, Clone)]
pub enum SupplyError {
    /// Nothing supplies the requested name
    #[error("Nothing supplies '{0}' - pass it in the supplies or add a supplier for it")]
    Unsatisfied(String),
    /// A factory or init hook failed
    ///
    /// The error is cached, every read returns the same `Arc`.
    #[error("Factory for '{product}' failed - error: {error}")]
    FactoryFailed {
        product: String,
        error: Arc<DynError>,
    },
    /// The supplied value has another type than requested
    #[error("Failed to downcast '{name}', required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        name: String,
        required_type: &'static str,
        actual_type: &'static str,
    },
    /// The same name was bundled twice
    #[error("'{0}' was supplied more than once")]
    DuplicateSupply(String),
    /// Shadowed declarations wired the assembled graph into a loop
    #[error(transparent)]
    Circular(#[from] CircularDependencyError),
}

impl SupplyError {
    /// The cached factory error, if this is one
    pub fn factory_error(&self) -> Option<&Arc<DynError>> {
        match self {
            SupplyError::FactoryFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}
