use std::{
    collections::HashSet,
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use futures::executor::ThreadPool;

use crate::{
    errors::{ConfigError, RegisterError},
    memo::RunOnce,
    supplier::{DeferredSupplier, ProductConfig, ProductSupplier, ResourceSupplier},
    types::Injectable,
};

/// How non lazy dependencies are pre-run while assembling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prerun {
    /// Detached tasks on the market's thread pool, `assemble` does not wait for them
    #[default]
    Background,
    /// Before `assemble` returns, on the calling thread
    Inline,
    /// Not at all, every product is built on first read
    Disabled,
}

/// Settings shared by every supplier of a market
#[derive(Debug, Clone, Default)]
pub struct MarketConfig {
    pub prerun: Prerun,
    /// Threads of the pre-run pool, defaults to the number of CPUs
    pub pool_size: Option<usize>,
}
impl MarketConfig {
    pub fn prerun(mut self, prerun: Prerun) -> Self {
        self.prerun = prerun;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }
}

/// Namespace handing out unique node names
///
/// Every supplier is declared through a market, names can only be taken once.
#[derive(Clone)]
pub struct Market(Arc<MarketInner>);
struct MarketInner {
    config: MarketConfig,
    names: Mutex<HashSet<String>>,
    pool: RunOnce<Option<ThreadPool>>,
}
impl Debug for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Market")
            .field("config", &self.0.config)
            .field("names", &self.lock_names().len())
            .finish()
    }
}
impl Default for Market {
    fn default() -> Self {
        Self::new()
    }
}

impl Market {
    pub fn new() -> Self {
        Self::with_config(MarketConfig::default())
    }

    pub fn with_config(config: MarketConfig) -> Self {
        let pool_size = config.pool_size;
        let start: Box<dyn FnOnce() -> Option<ThreadPool> + Send> =
            Box::new(move || start_pool(pool_size));

        Market(Arc::new(MarketInner {
            config,
            names: Mutex::new(HashSet::new()),
            pool: RunOnce::new(start),
        }))
    }

    pub fn config(&self) -> &MarketConfig {
        &self.0.config
    }

    /// Takes a name, returning the offer to declare its supplier with
    pub fn register(&self, name: impl Into<String>) -> Result<Offer, RegisterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegisterError::EmptyName);
        }

        if !self.lock_names().insert(name.clone()) {
            return Err(RegisterError::DuplicateName(name));
        }

        tracing::debug!("Registered '{name}'");
        Ok(Offer {
            market: self.clone(),
            name: name.into(),
        })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock_names().contains(name)
    }

    /// The pre-run pool, started on first use
    pub(crate) fn pool(&self) -> Option<&ThreadPool> {
        self.0.pool.get().as_ref()
    }

    fn lock_names(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.0.names.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn start_pool(pool_size: Option<usize>) -> Option<ThreadPool> {
    let mut builder = ThreadPool::builder();
    builder.name_prefix("supplier-prerun-");
    if let Some(size) = pool_size.filter(|size| *size > 0) {
        builder.pool_size(size);
    }

    match builder.create() {
        Ok(pool) => {
            tracing::debug!("Started the pre-run pool");
            Some(pool)
        }
        Err(error) => {
            tracing::warn!("Could not start the pre-run pool, pre-running inline instead: {error}");
            None
        }
    }
}

/// A registered name waiting for its supplier declaration
pub struct Offer {
    market: Market,
    name: Arc<str>,
}
impl Debug for Offer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Offer").field(&self.name).finish()
    }
}

impl Offer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a leaf input holding values of type `T`
    pub fn as_resource<T: Injectable>(self) -> ResourceSupplier<T> {
        ResourceSupplier::new(self.name.to_string())
    }

    /// Declares a derived node, validating the declaration
    pub fn as_product(self, config: ProductConfig) -> Result<ProductSupplier, ConfigError> {
        ProductSupplier::from_config(self.name, config, self.market)
    }

    /// Declares a product whose declaration follows later
    pub fn deferred(self) -> DeferredSupplier {
        DeferredSupplier::new(self.name, self.market)
    }
}
