use std::{
    any::type_name,
    collections::{HashMap, HashSet},
    fmt::Debug,
    future::Future,
    sync::Arc,
};

use futures::{
    future::{self, BoxFuture, Shared},
    FutureExt,
};

use crate::{
    assembler,
    errors::SupplyError,
    memo::Memo,
    supplier::{AnyResourceSupplier, ProductSupplier},
    supplies::Supplies,
    types::{Injectable, Instance, Named},
};

/// Name keyed supplies handed to `assemble` and `reassemble`
pub type SupplyMap = HashMap<String, Supply>;

/// Result of running a product's factory, cached per node
pub(crate) type Outcome = Result<Instance, SupplyError>;

/// Resolves once every background pre-run of an assembly has finished
pub type Settled = Shared<BoxFuture<'static, ()>>;

pub(crate) fn settled_now() -> Settled {
    future::ready(()).boxed().shared()
}

/// An instantiated leaf value
#[derive(Clone)]
pub struct Resource {
    supplier: AnyResourceSupplier,
    value: Instance,
}
impl Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.supplier.name())
            .field("type", &self.value.info.type_name)
            .finish()
    }
}
impl Named for Resource {
    fn name(&self) -> &str {
        self.supplier.name()
    }
}
impl Resource {
    pub(crate) fn new(supplier: AnyResourceSupplier, value: Instance) -> Self {
        Resource { supplier, value }
    }

    pub fn instance(&self) -> &Instance {
        &self.value
    }

    pub fn unpack<T: Injectable>(&self) -> Result<Arc<T>, SupplyError> {
        downcast(self.name(), &self.value)
    }

    /// Packs a new value under the same name, leaving this resource untouched
    pub fn pack<T: Injectable>(&self, value: T) -> Result<Resource, SupplyError> {
        let value = Instance::new(value);
        if value.info != self.supplier.constraint() {
            return Err(SupplyError::DowncastFailed {
                name: self.name().to_string(),
                required_type: self.supplier.constraint().type_name,
                actual_type: value.info.type_name,
            });
        }

        Ok(Resource::new(self.supplier.clone(), value))
    }
}

/// An instantiated derived node
///
/// The factory runs at most once, on the first [unpack](Self::unpack) or during
/// the pre-run of the assembly that created it. Clones share the cached value.
#[derive(Clone)]
pub struct Product(Arc<ProductInner>);
struct ProductInner {
    supplier: ProductSupplier,
    supplies: Supplies,
    cell: Arc<Memo<Outcome>>,
    packed: bool,
    settled: Settled,
}
impl Debug for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.0.cell.peek() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Product")
            .field("name", &self.name())
            .field("state", &state)
            .field("packed", &self.0.packed)
            .field("supplies", &self.0.supplies)
            .finish()
    }
}
impl Named for Product {
    fn name(&self) -> &str {
        self.0.supplier.name()
    }
}

impl Product {
    /// A root product owning the pre-run of its assembly
    pub(crate) fn assembled(supplier: ProductSupplier, supplies: Supplies, settled: Settled) -> Self {
        Product(Arc::new(ProductInner {
            supplier,
            supplies,
            cell: Arc::new(Memo::new()),
            packed: false,
            settled,
        }))
    }

    /// A dependency node, sharing its cache with the accessor map
    pub(crate) fn bound(supplier: ProductSupplier, supplies: Supplies, cell: Arc<Memo<Outcome>>) -> Self {
        Product(Arc::new(ProductInner {
            supplier,
            supplies,
            cell,
            packed: false,
            settled: settled_now(),
        }))
    }

    pub(crate) fn packed(supplier: ProductSupplier, value: Instance) -> Self {
        Product(Arc::new(ProductInner {
            supplier,
            supplies: Supplies::empty(),
            cell: Arc::new(Memo::resolved(Ok(value))),
            packed: true,
            settled: settled_now(),
        }))
    }

    /// The supplier this product was assembled from
    pub fn supplier(&self) -> &ProductSupplier {
        &self.0.supplier
    }

    /// The accessor map the factory reads from
    pub fn supplies(&self) -> &Supplies {
        &self.0.supplies
    }

    pub fn is_packed(&self) -> bool {
        self.0.packed
    }

    /// Whether the factory already ran
    pub fn is_resolved(&self) -> bool {
        self.0.cell.is_done()
    }

    /// Returns the type erased value, running the factory on first access
    pub fn instance(&self) -> Result<Instance, SupplyError> {
        self.0
            .cell
            .get_or_run(|| assembler::evaluate(&self.0.supplier, &self.0.supplies))
            .clone()
    }

    /// Returns the value, running the factory on first access
    ///
    /// Later calls return the same `Arc`, or the same cached error.
    pub fn unpack<T: Injectable>(&self) -> Result<Arc<T>, SupplyError> {
        downcast(self.name(), &self.instance()?)
    }

    /// A new product holding `value`, bypassing the factory
    pub fn pack<T: Injectable>(&self, value: T) -> Product {
        self.0.supplier.pack(value)
    }

    /// A new product with some supplies replaced
    ///
    /// Only nodes depending on a replaced name are recomputed, everything else
    /// keeps its cached value. Packed products are returned as is.
    pub fn reassemble(&self, overrides: SupplyMap) -> Product {
        assembler::reassemble(self, overrides)
    }

    /// Whether this product's resolved supply tree reaches one of the names
    pub fn depends_on_one_of(&self, names: &HashSet<String>) -> bool {
        if self.0.packed {
            return false;
        }

        let mut memo = HashMap::new();
        self.0
            .supplier
            .dependency_names()
            .any(|dependency| {
                names.contains(dependency) || self.0.supplies.depends_on(dependency, names, &mut memo)
            })
    }

    /// Resolves once the background pre-run started by this product's assembly finished
    ///
    /// Never needed for correctness, reads wait for running factories anyway.
    pub fn settled(&self) -> impl Future<Output = ()> + Send + 'static {
        self.0.settled.clone()
    }

    /// Whether both products share the same cached value
    pub fn ptr_eq(&self, other: &Product) -> bool {
        Arc::ptr_eq(&self.0.cell, &other.0.cell)
    }
}

/// A resolved node, either a [Resource] or a [Product]
#[derive(Clone, Debug)]
pub enum Supply {
    Resource(Resource),
    Product(Product),
}
impl Named for Supply {
    fn name(&self) -> &str {
        match self {
            Supply::Resource(resource) => resource.name(),
            Supply::Product(product) => product.name(),
        }
    }
}
impl From<Resource> for Supply {
    fn from(resource: Resource) -> Self {
        Supply::Resource(resource)
    }
}
impl From<Product> for Supply {
    fn from(product: Product) -> Self {
        Supply::Product(product)
    }
}
impl Supply {
    pub fn instance(&self) -> Result<Instance, SupplyError> {
        match self {
            Supply::Resource(resource) => Ok(resource.instance().clone()),
            Supply::Product(product) => product.instance(),
        }
    }

    pub fn unpack<T: Injectable>(&self) -> Result<Arc<T>, SupplyError> {
        match self {
            Supply::Resource(resource) => resource.unpack(),
            Supply::Product(product) => product.unpack(),
        }
    }

    pub fn as_product(&self) -> Option<&Product> {
        match self {
            Supply::Product(product) => Some(product),
            Supply::Resource(_) => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Supply::Resource(resource) => Some(resource),
            Supply::Product(_) => None,
        }
    }
}

fn downcast<T: Injectable>(name: &str, instance: &Instance) -> Result<Arc<T>, SupplyError> {
    instance
        .downcast()
        .map_err(|actual_type| SupplyError::DowncastFailed {
            name: name.to_string(),
            required_type: type_name::<T>(),
            actual_type,
        })
}
