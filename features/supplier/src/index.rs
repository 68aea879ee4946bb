use crate::{
    errors::SupplyError,
    supply::{Supply, SupplyMap},
    types::Named,
};

/// Bundles resources and products by name, ready to pass to `assemble`
///
/// Fails on the first name supplied twice, the same way registering a name
/// twice fails on a market.
pub fn index<S: Into<Supply>>(supplies: impl IntoIterator<Item = S>) -> Result<SupplyMap, SupplyError> {
    let mut indexed = SupplyMap::new();

    for supply in supplies {
        let supply = supply.into();
        let name = supply.name().to_string();

        if indexed.contains_key(&name) {
            return Err(SupplyError::DuplicateSupply(name));
        }
        indexed.insert(name, supply);
    }

    Ok(indexed)
}
