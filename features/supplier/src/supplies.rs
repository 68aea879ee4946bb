use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use indexmap::IndexMap;

use crate::{
    errors::SupplyError,
    memo::Memo,
    supplier::{ProductSupplier, ResourceSupplier},
    supply::{Outcome, Product, Supply, SupplyMap},
    types::{Injectable, Named},
};

/// An entry of the accessor map
#[derive(Clone)]
pub(crate) enum Slot {
    /// Handed in by the caller, or reused as is by a reassembly
    Ready(Supply),
    /// Built from its supplier on first read, the cell caches the factory result
    Deferred {
        supplier: ProductSupplier,
        cell: Arc<Memo<Outcome>>,
    },
}
impl Slot {
    pub(crate) fn deferred(supplier: ProductSupplier) -> Self {
        Slot::Deferred {
            supplier,
            cell: Arc::new(Memo::new()),
        }
    }
}

/// The accessor map a factory resolves its dependencies from
///
/// Built once per `assemble` / `reassemble` call and never changed afterwards,
/// only the per node caches fill in. Every read of a name goes through the same
/// cache, so a factory runs at most once per assembly no matter how many
/// dependents read it.
#[derive(Clone)]
pub struct Supplies(Arc<IndexMap<String, Slot>>);
impl Debug for Supplies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}

impl Supplies {
    pub(crate) fn new(slots: IndexMap<String, Slot>) -> Self {
        Supplies(Arc::new(slots))
    }

    pub(crate) fn empty() -> Self {
        Supplies(Arc::new(IndexMap::new()))
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (&String, &Slot)> {
        self.0.iter()
    }

    pub(crate) fn slot(&self, name: &str) -> Option<&Slot> {
        self.0.get(name)
    }

    /// Returns the resource or product supplied under the name
    pub fn get(&self, named: impl Named) -> Result<Supply, SupplyError> {
        let name = named.name();
        match self.0.get(name) {
            Some(Slot::Ready(supply)) => Ok(supply.clone()),
            Some(Slot::Deferred { supplier, cell }) => {
                tracing::trace!("Binding '{name}' to its assembly");
                Ok(Supply::Product(Product::bound(
                    supplier.clone(),
                    self.clone(),
                    cell.clone(),
                )))
            }
            None => Err(SupplyError::Unsatisfied(name.to_string())),
        }
    }

    /// Returns the value supplied under the name, running its factory if needed
    pub fn unpack<T: Injectable>(&self, named: impl Named) -> Result<Arc<T>, SupplyError> {
        self.get(named)?.unpack()
    }

    /// Typed shorthand for reading a resource
    pub fn resource<T: Injectable>(
        &self,
        supplier: &ResourceSupplier<T>,
    ) -> Result<Arc<T>, SupplyError> {
        self.unpack(supplier)
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

    /// Every entry as a supply map, to pass on when assembling a just in time supplier
    ///
    /// Products keep sharing their caches with this map.
    pub fn to_map(&self) -> SupplyMap {
        self.0
            .keys()
            .filter_map(|name| Some((name.clone(), self.get(name.as_str()).ok()?)))
            .collect()
    }

    /// Whether the entry under `name` transitively depends on one of `overridden`
    ///
    /// Walks the resolved tree: ready products answer from their own supplies,
    /// deferred entries from their declared dependencies within this map.
    pub(crate) fn depends_on(
        &self,
        name: &str,
        overridden: &HashSet<String>,
        memo: &mut HashMap<String, bool>,
    ) -> bool {
        if let Some(known) = memo.get(name) {
            return *known;
        }

        let depends = match self.0.get(name) {
            None | Some(Slot::Ready(Supply::Resource(_))) => false,
            Some(Slot::Ready(Supply::Product(product))) => product.depends_on_one_of(overridden),
            Some(Slot::Deferred { supplier, .. }) => supplier.dependency_names().any(|dependency| {
                overridden.contains(dependency) || self.depends_on(dependency, overridden, memo)
            }),
        };

        memo.insert(name.to_string(), depends);
        depends
    }
}
