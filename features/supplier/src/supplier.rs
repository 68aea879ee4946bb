use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::{Arc, OnceLock},
};

use indexmap::IndexMap;

use crate::{
    dependency_graph,
    errors::{ConfigError, SupplyError},
    factories::{DynFactory, FnFactory, InitHook, ProductFactory},
    market::Market,
    supplies::Supplies,
    supply::{Product, Resource, SupplyMap},
    types::{DynError, Injectable, Instance, Named, TypeInfo},
};

/// Any declared node of the graph
#[derive(Clone)]
pub enum Supplier {
    /// A leaf input, supplied when assembling
    Resource(AnyResourceSupplier),
    /// A node derived from its dependencies by a factory
    Product(ProductSupplier),
    /// A product declared ahead of its definition
    Deferred(DeferredSupplier),
}
impl Debug for Supplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Supplier::Resource(resource) => resource.fmt(f),
            Supplier::Product(product) => product.fmt(f),
            Supplier::Deferred(deferred) => deferred.fmt(f),
        }
    }
}
impl Named for Supplier {
    fn name(&self) -> &str {
        match self {
            Supplier::Resource(resource) => resource.name(),
            Supplier::Product(product) => product.name(),
            Supplier::Deferred(deferred) => deferred.name(),
        }
    }
}
impl Supplier {
    /// Human readable kind, used in validation errors
    pub fn kind(&self) -> &'static str {
        match self {
            Supplier::Resource(_) => "resource supplier",
            Supplier::Product(product) if product.is_prototype() => "prototype supplier",
            Supplier::Product(_) => "product supplier",
            Supplier::Deferred(_) => "deferred supplier",
        }
    }

    /// The product supplier behind this node, if it is (or has been defined as) one
    pub fn product(&self) -> Option<ProductSupplier> {
        match self {
            Supplier::Resource(_) => None,
            Supplier::Product(product) => Some(product.clone()),
            Supplier::Deferred(deferred) => deferred.get().cloned(),
        }
    }
}

impl<T> From<ResourceSupplier<T>> for Supplier {
    fn from(supplier: ResourceSupplier<T>) -> Self {
        Supplier::Resource(supplier.inner)
    }
}
impl<T> From<&ResourceSupplier<T>> for Supplier {
    fn from(supplier: &ResourceSupplier<T>) -> Self {
        Supplier::Resource(supplier.inner.clone())
    }
}
impl From<ProductSupplier> for Supplier {
    fn from(supplier: ProductSupplier) -> Self {
        Supplier::Product(supplier)
    }
}
impl From<&ProductSupplier> for Supplier {
    fn from(supplier: &ProductSupplier) -> Self {
        Supplier::Product(supplier.clone())
    }
}
impl From<DeferredSupplier> for Supplier {
    fn from(supplier: DeferredSupplier) -> Self {
        Supplier::Deferred(supplier)
    }
}
impl From<&DeferredSupplier> for Supplier {
    fn from(supplier: &DeferredSupplier) -> Self {
        Supplier::Deferred(supplier.clone())
    }
}

// #####################################################
// Resources

/// A resource supplier with its type constraint erased
#[derive(Clone, Debug)]
pub struct AnyResourceSupplier {
    name: Arc<str>,
    constraint: TypeInfo,
}
impl Named for AnyResourceSupplier {
    fn name(&self) -> &str {
        &self.name
    }
}
impl AnyResourceSupplier {
    /// The type packed values must have
    pub fn constraint(&self) -> TypeInfo {
        self.constraint
    }
}

/// Declares a leaf input slot holding values of type `T`
pub struct ResourceSupplier<T> {
    inner: AnyResourceSupplier,
    _marker: PhantomData<fn() -> T>,
}
impl<T> Clone for ResourceSupplier<T> {
    fn clone(&self) -> Self {
        ResourceSupplier {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}
impl<T> Debug for ResourceSupplier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSupplier")
            .field("name", &self.inner.name)
            .field("constraint", &self.inner.constraint.type_name)
            .finish()
    }
}
impl<T> Named for ResourceSupplier<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }
}
impl<T: Injectable> ResourceSupplier<T> {
    pub(crate) fn new(name: String) -> Self {
        ResourceSupplier {
            inner: AnyResourceSupplier {
                name: name.into(),
                constraint: TypeInfo::of::<T>(),
            },
            _marker: PhantomData,
        }
    }

    /// Packs a value into a resource, ready to be supplied
    pub fn pack(&self, value: T) -> Resource {
        Resource::new(self.inner.clone(), Instance::new(value))
    }

    pub fn erased(&self) -> &AnyResourceSupplier {
        &self.inner
    }
}

// #####################################################
// Products

/// Declaration of a product supplier, validated by [Offer::as_product](crate::market::Offer::as_product)
#[derive(Clone, Default)]
pub struct ProductConfig {
    suppliers: Vec<Supplier>,
    just_in_time: Vec<Supplier>,
    factory: Option<Arc<dyn DynFactory>>,
    init: Option<InitHook>,
    lazy: bool,
    is_prototype: bool,
}
impl ProductConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dependency which is resolved before the factory can use it
    pub fn supplier(mut self, supplier: impl Into<Supplier>) -> Self {
        self.suppliers.push(supplier.into());
        self
    }

    pub fn suppliers<S: Into<Supplier>>(mut self, suppliers: impl IntoIterator<Item = S>) -> Self {
        self.suppliers.extend(suppliers.into_iter().map(Into::into));
        self
    }

    /// Adds a supplier handed to the factory unassembled
    pub fn just_in_time(mut self, supplier: impl Into<Supplier>) -> Self {
        self.just_in_time.push(supplier.into());
        self
    }

    /// Sets the factory building the product's value
    pub fn factory<T, F>(self, factory: F) -> Self
    where
        T: Injectable,
        F: Fn(&Supplies, &JustInTime) -> Result<T, DynError> + Send + Sync + 'static,
    {
        self.factory_from(FnFactory::new(factory))
    }

    /// Sets a stateful factory building the product's value
    pub fn factory_from(mut self, factory: impl ProductFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Sets a side effect run on the value right after the factory built it
    pub fn init<T, F>(mut self, init: F) -> Self
    where
        T: Injectable,
        F: Fn(&T, &Supplies) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.init = Some(InitHook::new(init));
        self
    }

    /// Lazy products are not pre-run while assembling
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn prototype(mut self, is_prototype: bool) -> Self {
        self.is_prototype = is_prototype;
        self
    }
}

pub(crate) struct ProductDecl {
    name: Arc<str>,
    suppliers: Vec<Supplier>,
    just_in_time: JustInTime,
    factory: Arc<dyn DynFactory>,
    init: Option<InitHook>,
    lazy: bool,
    is_prototype: bool,
    jit_only: bool,
    market: Market,
}
impl ProductDecl {
    fn derive(&self) -> ProductDecl {
        ProductDecl {
            name: self.name.clone(),
            suppliers: self.suppliers.clone(),
            just_in_time: self.just_in_time.clone(),
            factory: self.factory.clone(),
            init: self.init.clone(),
            lazy: self.lazy,
            is_prototype: self.is_prototype,
            jit_only: self.jit_only,
            market: self.market.clone(),
        }
    }
}

/// Immutable declaration of a derived node
///
/// Transformations ([prototype](Self::prototype), [try_with](Self::try_with),
/// [with](Self::with), [jit_only](Self::jit_only)) return new suppliers.
#[derive(Clone)]
pub struct ProductSupplier(pub(crate) Arc<ProductDecl>);
impl Debug for ProductSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductSupplier")
            .field("name", &self.0.name)
            .field("provides", &self.0.factory.provides().type_name)
            .field("suppliers", &self.dependency_names().collect::<Vec<_>>())
            .field("just_in_time", &self.0.just_in_time.names().collect::<Vec<_>>())
            .field("lazy", &self.0.lazy)
            .field("is_prototype", &self.0.is_prototype)
            .finish()
    }
}
impl Named for ProductSupplier {
    fn name(&self) -> &str {
        &self.0.name
    }
}

impl ProductSupplier {
    /// Validates a declaration and builds the supplier
    pub(crate) fn from_config(
        name: Arc<str>,
        config: ProductConfig,
        market: Market,
    ) -> Result<ProductSupplier, ConfigError> {
        let ProductConfig {
            suppliers,
            just_in_time,
            factory,
            init,
            lazy,
            is_prototype,
        } = config;

        let Some(factory) = factory else {
            return Err(ConfigError::MissingField {
                product: name.to_string(),
                field: "factory",
            });
        };

        if let Some(init) = &init {
            if init.accepts() != factory.provides() {
                return Err(ConfigError::InvalidKind {
                    product: name.to_string(),
                    field: "init",
                    expected: factory.provides().type_name.to_string(),
                    actual: init.accepts().type_name.to_string(),
                });
            }
        }

        let mut jit = JustInTime::default();
        for supplier in just_in_time {
            if let Supplier::Resource(_) = supplier {
                return Err(ConfigError::InvalidKind {
                    product: name.to_string(),
                    field: "just_in_time",
                    expected: "product supplier".to_string(),
                    actual: supplier.kind().to_string(),
                });
            }
            jit.insert(supplier);
        }

        ProductDecl {
            name,
            suppliers,
            just_in_time: jit,
            factory,
            init,
            lazy,
            is_prototype,
            jit_only: false,
            market,
        }
        .checked()
    }

    pub fn is_lazy(&self) -> bool {
        self.0.lazy
    }

    pub fn is_prototype(&self) -> bool {
        self.0.is_prototype
    }

    pub fn is_jit_only(&self) -> bool {
        self.0.jit_only
    }

    /// Type of the value the factory produces
    pub fn provides(&self) -> TypeInfo {
        self.0.factory.provides()
    }

    /// Declared dependencies, in declaration order
    pub fn suppliers(&self) -> &[Supplier] {
        &self.0.suppliers
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.0.suppliers.iter().map(Named::name)
    }

    /// Names of every node this supplier needs, shallowest first
    pub fn transitive_names(&self) -> Vec<String> {
        dependency_graph::transitive(self).into_keys().collect()
    }

    pub fn just_in_time(&self) -> &JustInTime {
        &self.0.just_in_time
    }

    pub fn market(&self) -> &Market {
        &self.0.market
    }

    pub fn ptr_eq(&self, other: &ProductSupplier) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn factory(&self) -> &dyn DynFactory {
        self.0.factory.as_ref()
    }

    pub(crate) fn init_hook(&self) -> Option<&InitHook> {
        self.0.init.as_ref()
    }

    /// Packs a value as this supplier's product, bypassing the factory
    pub fn pack<T: Injectable>(&self, value: T) -> Product {
        Product::packed(self.clone(), Instance::new(value))
    }

    /// Derives a variant with the same name and a new declaration
    ///
    /// The variant is flagged as a prototype, which makes it usable with [try_with](Self::try_with).
    pub fn prototype(&self, config: ProductConfig) -> Result<ProductSupplier, ConfigError> {
        ProductSupplier::from_config(
            self.0.name.clone(),
            config.prototype(true),
            self.0.market.clone(),
        )
    }

    /// Swaps prototypes into the dependencies
    ///
    /// Each prototype replaces the dependency with the same name in place, or is
    /// appended, so it also shadows deeper declarations of that name. Targets the
    /// just in time suppliers if this supplier is [jit_only](Self::jit_only).
    pub fn try_with(
        &self,
        prototypes: impl IntoIterator<Item = ProductSupplier>,
    ) -> Result<ProductSupplier, ConfigError> {
        let mut decl = self.0.derive();

        for prototype in prototypes {
            if !prototype.is_prototype() {
                return Err(ConfigError::InvalidKind {
                    product: self.0.name.to_string(),
                    field: "try",
                    expected: "prototype supplier".to_string(),
                    actual: "product supplier".to_string(),
                });
            }

            if decl.jit_only {
                decl.just_in_time.insert(prototype.into());
                continue;
            }

            match decl
                .suppliers
                .iter()
                .position(|existing| existing.name() == prototype.name())
            {
                Some(index) => decl.suppliers[index] = prototype.into(),
                None => decl.suppliers.push(prototype.into()),
            }
        }

        decl.checked()
    }

    /// Composes other products into this one
    ///
    /// Each composed supplier replaces any dependency of the same name and is
    /// moved behind the existing dependencies, the last duplicate wins. Their
    /// products are reachable through [Product::supplies].
    pub fn with(
        &self,
        others: impl IntoIterator<Item = ProductSupplier>,
    ) -> Result<ProductSupplier, ConfigError> {
        let mut decl = self.0.derive();

        for other in others {
            decl.suppliers.retain(|existing| existing.name() != other.name());
            decl.suppliers.push(other.into());
        }

        decl.checked()
    }

    /// Makes [try_with](Self::try_with) target the just in time suppliers
    pub fn jit_only(&self) -> ProductSupplier {
        let mut decl = self.0.derive();
        decl.jit_only = true;
        ProductSupplier(Arc::new(decl))
    }
}

impl ProductDecl {
    fn checked(self) -> Result<ProductSupplier, ConfigError> {
        let supplier = ProductSupplier(Arc::new(self));
        dependency_graph::check_declaration(&supplier)?;

        tracing::trace!(
            "Declared product '{}' with {} dependencies",
            supplier.name(),
            supplier.suppliers().len()
        );
        Ok(supplier)
    }
}

// #####################################################
// Deferred

/// A product supplier declared now and defined later
///
/// Allows dependency lists to refer to a node before it exists.
#[derive(Clone)]
pub struct DeferredSupplier {
    name: Arc<str>,
    market: Market,
    defined: Arc<OnceLock<ProductSupplier>>,
}
impl Debug for DeferredSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSupplier")
            .field("name", &self.name)
            .field("defined", &self.is_defined())
            .finish()
    }
}
impl Named for DeferredSupplier {
    fn name(&self) -> &str {
        &self.name
    }
}
impl DeferredSupplier {
    pub(crate) fn new(name: Arc<str>, market: Market) -> Self {
        DeferredSupplier {
            name,
            market,
            defined: Arc::new(OnceLock::new()),
        }
    }

    /// Defines the product, checking the now complete graph for cycles
    pub fn define(&self, config: ProductConfig) -> Result<ProductSupplier, ConfigError> {
        if self.is_defined() {
            return Err(ConfigError::AlreadyDefined(self.name.to_string()));
        }

        let supplier =
            ProductSupplier::from_config(self.name.clone(), config, self.market.clone())?;

        self.defined
            .set(supplier.clone())
            .map_err(|_| ConfigError::AlreadyDefined(self.name.to_string()))?;

        Ok(supplier)
    }

    pub fn get(&self) -> Option<&ProductSupplier> {
        self.defined.get()
    }

    pub fn is_defined(&self) -> bool {
        self.defined.get().is_some()
    }
}

// #####################################################
// Just in time

/// Suppliers handed to a factory without being assembled
#[derive(Clone, Default)]
pub struct JustInTime(IndexMap<String, Supplier>);
impl Debug for JustInTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}
impl JustInTime {
    /// Inserts a supplier, replacing one with the same name in place
    pub(crate) fn insert(&mut self, supplier: Supplier) {
        self.0.insert(supplier.name().to_string(), supplier);
    }

    /// Returns the product supplier registered under the name
    pub fn get(&self, named: impl Named) -> Result<ProductSupplier, SupplyError> {
        let name = named.name();
        self.0
            .get(name)
            .and_then(Supplier::product)
            .ok_or_else(|| SupplyError::Unsatisfied(name.to_string()))
    }

    /// Assembles one of the suppliers on demand
    pub fn assemble(
        &self,
        named: impl Named,
        to_supply: SupplyMap,
    ) -> Result<Product, SupplyError> {
        self.get(named)?.assemble(to_supply)
    }

    pub fn contains(&self, named: impl Named) -> bool {
        self.0.contains_key(named.name())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
