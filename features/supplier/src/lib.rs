//! Supplier assembles a graph of named suppliers into lazily built, memoized products.
//!
//! Supplier is split into three major parts:
//! 1. Market: hands out unique names, every supplier is declared through it
//! 2. Suppliers: immutable declarations of resources (leaf inputs) and products
//!    (values built by a factory from declared dependencies)
//! 3. Products: the result of assembling a supplier with the resources it needs,
//!    which can be reassembled with some supplies swapped
//!
//! # Examples
//!
//! ```rust
//! use supplier::{index, Market, ProductConfig};
//!
//! let market = Market::new();
//! let config = market.register("config").unwrap().as_resource::<String>();
//!
//! let doubler = market
//!     .register("doubler")
//!     .unwrap()
//!     .as_product(ProductConfig::new().supplier(&config).factory({
//!         let config = config.clone();
//!         move |supplies, _| {
//!             let config = supplies.resource(&config)?;
//!             Ok(format!("{config}{config}"))
//!         }
//!     }))
//!     .unwrap();
//!
//! let product = doubler.assemble(index([config.pack("A".to_string())]).unwrap()).unwrap();
//! assert_eq!(*product.unpack::<String>().unwrap(), "AA");
//!
//! let switched = product.reassemble(index([config.pack("B".to_string())]).unwrap());
//! assert_eq!(*switched.unpack::<String>().unwrap(), "BB");
//! assert_eq!(*product.unpack::<String>().unwrap(), "AA");
//! ```
//!
//! Supplier consists of the following components:
//!
//! 1. Memo - run once memoization of factory results
//! 2. Index - bundling supplies by name
//! 3. Market - the name registry and pre-run settings
//! 4. Supplier / Supply - the declared and the instantiated graph
//! 5. Assembler - assembling, pre-running and reassembling products
//! 6. Dependency Graph - cycle detection and dependency walks
//! 7. Errors - for registration, declaration and supply errors

mod assembler;
pub mod dependency_graph;
pub mod errors;
pub mod factories;
pub mod index;
pub mod market;
pub mod memo;
pub mod supplier;
pub mod supplies;
pub mod supply;
pub mod types;

pub use dependency_graph::CircularDependencyError;
pub use errors::{ConfigError, RegisterError, SupplyError};
pub use factories::ProductFactory;
pub use index::index;
pub use market::{Market, MarketConfig, Offer, Prerun};
pub use supplier::{
    AnyResourceSupplier, DeferredSupplier, JustInTime, ProductConfig, ProductSupplier,
    ResourceSupplier, Supplier,
};
pub use supplies::Supplies;
pub use supply::{Product, Resource, Settled, Supply, SupplyMap};
pub use types::{DynError, Injectable, Instance, Named, TypeInfo};
