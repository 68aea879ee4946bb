use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    supplier::{ProductSupplier, Supplier},
    supplies::{Slot, Supplies},
    types::Named,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("A Circular Dependency exists for '{product}' through {}", .chain.join(" -> "))]
pub struct CircularDependencyError {
    /// The node the cycle was found from
    pub product: String,
    /// The path from `product` up to and including the revisited node
    pub chain: Vec<String>,
}

/// Rejects a declaration which depends on itself
///
/// Walks the declared dependencies depth first while tracking the current path
/// by name. Resources and undefined deferred suppliers end a branch, a deferred
/// supplier is checked once it gets defined. Just in time suppliers are not
/// followed, they are only assembled on demand.
pub(crate) fn check_declaration(root: &ProductSupplier) -> Result<(), CircularDependencyError> {
    let mut checked = HashSet::new();
    let mut chain = vec![root.name().to_string()];
    return check_recurse(root, &mut checked, &mut chain);

    fn check_recurse(
        product: &ProductSupplier,
        checked: &mut HashSet<usize>,
        chain: &mut Vec<String>,
    ) -> Result<(), CircularDependencyError> {
        for dependency in product.suppliers() {
            // Circular Dependency Check
            if chain.iter().any(|name| name == dependency.name()) {
                let mut chain = chain.clone();
                chain.push(dependency.name().to_string()); // Add current so chain is complete

                return Err(CircularDependencyError {
                    product: chain[0].clone(),
                    chain,
                });
            }

            let Some(next) = dependency.product() else {
                continue;
            };

            // Skip if already walked
            if !checked.insert(next.id()) {
                continue;
            }

            chain.push(next.name().to_string());
            check_recurse(&next, checked, chain)?;
            chain.pop();
        }

        Ok(())
    }
}

/// Every supplier a root needs, breadth first and unique by name
///
/// The shallowest declaration of a name wins, so a supplier swapped in at the
/// root shadows deeper declarations of the same name.
pub(crate) fn transitive(root: &ProductSupplier) -> IndexMap<String, Supplier> {
    let mut found = IndexMap::new();
    let mut queue: VecDeque<Supplier> = root.suppliers().iter().cloned().collect();

    while let Some(supplier) = queue.pop_front() {
        if found.contains_key(supplier.name()) {
            continue;
        }

        if let Some(product) = supplier.product() {
            queue.extend(product.suppliers().iter().cloned());
        }
        found.insert(supplier.name().to_string(), supplier);
    }

    found
}

/// Rejects an accessor map whose entries read each other in a circle
///
/// Declarations are acyclic on their own, but shadowing can wire differently
/// declared nodes of the same names into a loop.
pub(crate) fn check_supplies(
    root: &ProductSupplier,
    supplies: &Supplies,
) -> Result<(), CircularDependencyError> {
    let mut checked = HashSet::new();
    let mut chain = vec![root.name().to_string()];
    return check_recurse(root, supplies, &mut checked, &mut chain);

    fn check_recurse(
        product: &ProductSupplier,
        supplies: &Supplies,
        checked: &mut HashSet<String>,
        chain: &mut Vec<String>,
    ) -> Result<(), CircularDependencyError> {
        for name in product.dependency_names() {
            if chain.iter().any(|on_chain| on_chain == name) {
                let mut chain = chain.clone();
                chain.push(name.to_string());

                return Err(CircularDependencyError {
                    product: chain[0].clone(),
                    chain,
                });
            }

            // Only deferred entries read from this map
            let Some(Slot::Deferred { supplier, .. }) = supplies.slot(name) else {
                continue;
            };

            if !checked.insert(name.to_string()) {
                continue;
            }

            chain.push(name.to_string());
            check_recurse(supplier, supplies, checked, chain)?;
            chain.pop();
        }

        Ok(())
    }
}
