use std::{error::Error, sync::Arc};

use supplier::{index, Market, ProductConfig, SupplyError};

fn main() -> Result<(), Box<dyn Error>> {
    let market = Market::new();
    let config = market.register("config")?.as_resource::<String>();

    let doubler = market.register("doubler")?.as_product(
        ProductConfig::new().supplier(&config).factory({
            let config = config.clone();
            move |supplies, _| {
                let config = supplies.resource(&config)?;
                Ok(format!("{config}{config}"))
            }
        }),
    )?;

    let shout = market.register("shout")?.as_product(
        ProductConfig::new().supplier(&doubler).factory({
            let doubler = doubler.clone();
            move |supplies, _| {
                let doubled: Arc<String> = supplies.unpack(&doubler)?;
                Ok(format!("{doubled}!"))
            }
        }),
    )?;

    let product = shout.assemble(index([config.pack("A".to_string())])?)?;
    futures::executor::block_on(product.settled());

    println!("{:?}", product);
    println!("{}", product.unpack::<String>()?);

    let switched = product.reassemble(index([config.pack("B".to_string())])?);
    println!("{}", switched.unpack::<String>()?);
    println!("{}", product.unpack::<String>()?);

    let missing = shout.assemble(Default::default());
    if let Err(SupplyError::Unsatisfied(name)) = missing {
        println!("Assembling without '{name}' fails");
    }

    Ok(())
}
