use std::{
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::{future, FutureExt};
use futures_channel::oneshot;
use indexmap::IndexMap;

use crate::{
    dependency_graph,
    errors::SupplyError,
    market::{Market, Prerun},
    supplier::ProductSupplier,
    supplies::{Slot, Supplies},
    supply::{settled_now, Outcome, Product, Settled, Supply, SupplyMap},
    types::{DynError, Named},
};

impl ProductSupplier {
    /// Assembles this supplier's dependency graph into a product
    ///
    /// `to_supply` must hold every resource the graph needs, products are
    /// built from their suppliers unless supplied too. Non lazy dependencies
    /// are pre-run as configured on the [Market], their failures only surface
    /// once they are read.
    pub fn assemble(&self, to_supply: SupplyMap) -> Result<Product, SupplyError> {
        assemble(self, to_supply)
    }
}

fn assemble(root: &ProductSupplier, mut to_supply: SupplyMap) -> Result<Product, SupplyError> {
    let graph = dependency_graph::transitive(root);

    tracing::debug!(
        "Assembling '{}' with {} supplies and {} dependencies",
        root.name(),
        to_supply.len(),
        graph.len()
    );

    let mut slots = IndexMap::with_capacity(graph.len() + to_supply.len());
    for (name, supplier) in graph {
        if let Some(supply) = to_supply.remove(&name) {
            slots.insert(name, Slot::Ready(supply));
            continue;
        }

        // Resources and undefined deferred suppliers have to be supplied
        let Some(product) = supplier.product() else {
            return Err(SupplyError::Unsatisfied(name));
        };
        slots.insert(name, Slot::deferred(product));
    }

    // Undeclared supplies stay readable by name
    slots.extend(
        to_supply
            .into_iter()
            .map(|(name, supply)| (name, Slot::Ready(supply))),
    );

    let supplies = Supplies::new(slots);
    dependency_graph::check_supplies(root, &supplies)?;

    let settled = prerun(&supplies, root.market());
    Ok(Product::assembled(root.clone(), supplies, settled))
}

/// Runs a product's factory and init hook against its supplies
pub(crate) fn evaluate(supplier: &ProductSupplier, supplies: &Supplies) -> Outcome {
    let failed = |error: DynError| SupplyError::FactoryFailed {
        product: supplier.name().to_string(),
        error: Arc::new(error),
    };

    tracing::trace!("Running factory of '{}'", supplier.name());
    let instance = supplier
        .factory()
        .construct(supplies, supplier.just_in_time())
        .map_err(failed)?;

    if let Some(init) = supplier.init_hook() {
        init.run(&instance, supplies).map_err(failed)?;
    }

    Ok(instance)
}

/// Starts every non lazy entry which is not resolved yet
///
/// Failures are dropped here, the cached error is returned on the first read.
fn prerun(supplies: &Supplies, market: &Market) -> Settled {
    let pending: Vec<Product> = supplies
        .slots()
        .filter_map(|(name, slot)| match slot {
            Slot::Deferred { supplier, cell } if !supplier.is_lazy() && !cell.is_done() => {
                tracing::trace!("Queueing pre-run of '{name}'");
                Some(Product::bound(supplier.clone(), supplies.clone(), cell.clone()))
            }
            _ => None,
        })
        .collect();

    if pending.is_empty() {
        return settled_now();
    }

    let pool = match market.config().prerun {
        Prerun::Disabled => return settled_now(),
        Prerun::Inline => None,
        Prerun::Background => market.pool(),
    };

    let Some(pool) = pool else {
        for product in &pending {
            prerun_one(product);
        }
        return settled_now();
    };

    tracing::trace!("Pre-running {} products in the background", pending.len());
    let mut done = Vec::with_capacity(pending.len());
    for product in pending {
        let (tx, rx) = oneshot::channel();
        pool.spawn_ok(async move {
            prerun_one(&product);
            let _ = tx.send(());
        });
        done.push(rx);
    }

    // A dropped sender counts as settled as well
    future::join_all(done).map(|_| ()).boxed().shared()
}

/// Pre-runs one product, swallowing errors and panics alike
///
/// A panic must not unwind into a pool worker, the pool is never replaced.
/// The memo cell stays empty after a panic, so the first read runs the factory again.
fn prerun_one(product: &Product) {
    match panic::catch_unwind(AssertUnwindSafe(|| product.instance())) {
        Ok(Ok(_)) => {}
        Ok(Err(error)) => tracing::debug!(
            "Pre-run of '{}' failed, deferring the error to its first read: {error}",
            product.name()
        ),
        Err(_) => tracing::debug!(
            "Pre-run of '{}' panicked, the factory runs again on its first read",
            product.name()
        ),
    }
}

/// Builds a new product from `product` with some supplies replaced
///
/// Entries which do not depend on an overridden name are carried over with their
/// caches, everything else is rebuilt against the new accessor map.
pub(crate) fn reassemble(product: &Product, mut overrides: SupplyMap) -> Product {
    if product.is_packed() {
        return product.clone();
    }

    let overridden: HashSet<String> = overrides.keys().cloned().collect();
    let handed_down = overrides.clone();
    let previous = product.supplies();

    let mut memo = Default::default();
    let mut slots = IndexMap::with_capacity(previous.len() + overrides.len());
    let (mut reused, mut rebuilt) = (0, 0);

    for (name, slot) in previous.slots() {
        if let Some(supply) = overrides.remove(name) {
            slots.insert(name.clone(), Slot::Ready(supply));
            continue;
        }

        if !previous.depends_on(name, &overridden, &mut memo) {
            reused += 1;
            slots.insert(name.clone(), slot.clone());
            continue;
        }

        rebuilt += 1;
        let slot = match slot {
            Slot::Deferred { supplier, .. } => Slot::deferred(supplier.clone()),
            // Supplied products answer from their own supplies
            Slot::Ready(Supply::Product(supplied)) => {
                Slot::Ready(Supply::Product(supplied.reassemble(handed_down.clone())))
            }
            Slot::Ready(resource) => Slot::Ready(resource.clone()),
        };
        slots.insert(name.clone(), slot);
    }

    let added = overrides.len();
    slots.extend(
        overrides
            .into_iter()
            .map(|(name, supply)| (name, Slot::Ready(supply))),
    );

    tracing::debug!(
        "Reassembling '{}': {reused} reused, {rebuilt} rebuilt, {} overridden ({added} new)",
        product.name(),
        overridden.len()
    );

    let supplies = Supplies::new(slots);
    let settled = prerun(&supplies, product.supplier().market());
    Product::assembled(product.supplier().clone(), supplies, settled)
}
