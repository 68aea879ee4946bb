use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use futures::executor::block_on;
use supplier::{
    index, DynError, Market, MarketConfig, Named, Prerun, ProductConfig, ProductSupplier,
    ResourceSupplier, Supply, SupplyError, SupplyMap,
};

fn market(prerun: Prerun) -> Market {
    Market::with_config(MarketConfig::default().prerun(prerun))
}

fn calls(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// A product appending `suffix` to the string it depends on
fn append(
    market: &Market,
    name: &str,
    dependency: Option<&ProductSupplier>,
    resource: Option<&ResourceSupplier<String>>,
    suffix: &'static str,
) -> ProductSupplier {
    let mut config = ProductConfig::new();
    let mut read = None;
    if let Some(dependency) = dependency {
        config = config.supplier(dependency);
        read = Some(dependency.name().to_string());
    }
    if let Some(resource) = resource {
        config = config.supplier(resource);
        read = Some(resource.name().to_string());
    }

    market
        .register(name)
        .unwrap()
        .as_product(config.factory(move |supplies, _| {
            let base = match &read {
                Some(read) => supplies.unpack::<String>(read.as_str())?.to_string(),
                None => String::new(),
            };
            Ok(format!("{base}{suffix}"))
        }))
        .unwrap()
}

#[test]
fn doubler_reassembles_without_touching_the_original() {
    let market = Market::new();
    let config = market.register("config").unwrap().as_resource::<String>();
    let doubler = market
        .register("doubler")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&config).factory({
            let config = config.clone();
            move |supplies, _| {
                let config = supplies.resource(&config)?;
                Ok(format!("{config}{config}"))
            }
        }))
        .unwrap();

    let product = doubler
        .assemble(index([config.pack("A".to_string())]).unwrap())
        .unwrap();
    assert_eq!(*product.unpack::<String>().unwrap(), "AA");

    let switched = product.reassemble(index([config.pack("B".to_string())]).unwrap());
    assert_eq!(*switched.unpack::<String>().unwrap(), "BB");
    assert_eq!(*product.unpack::<String>().unwrap(), "AA");
}

#[test]
fn unpack_runs_the_factory_once() {
    let market = market(Prerun::Inline);
    let runs = Arc::new(AtomicUsize::new(0));
    let product = market
        .register("list")
        .unwrap()
        .as_product(ProductConfig::new().factory({
            let runs = runs.clone();
            move |_, _| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1_u8, 2, 3])
            }
        }))
        .unwrap()
        .assemble(SupplyMap::new())
        .unwrap();

    let first = product.unpack::<Vec<u8>>().unwrap();
    let second = product.unpack::<Vec<u8>>().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls(&runs), 1);
    assert!(product.clone().unpack::<Vec<u8>>().is_ok());
    assert_eq!(calls(&runs), 1);
}

#[test]
fn shared_dependencies_are_built_once() {
    let market = market(Prerun::Background);
    let runs = Arc::new(AtomicUsize::new(0));

    let d = market
        .register("d")
        .unwrap()
        .as_product(ProductConfig::new().factory({
            let runs = runs.clone();
            move |_, _| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(1_u64)
            }
        }))
        .unwrap();

    let read_d = |name: &str| {
        let d_name = d.name().to_string();
        market
            .register(name)
            .unwrap()
            .as_product(ProductConfig::new().supplier(&d).factory(move |supplies, _| {
                Ok(*supplies.unpack::<u64>(d_name.as_str())? + 1)
            }))
            .unwrap()
    };
    let a = read_d("a");
    let b = read_d("b");

    let c = market
        .register("c")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&a).supplier(&b).factory(
            |supplies, _| Ok(*supplies.unpack::<u64>("a")? + *supplies.unpack::<u64>("b")?),
        ))
        .unwrap();

    let product = c.assemble(SupplyMap::new()).unwrap();
    block_on(product.settled());

    assert_eq!(*product.unpack::<u64>().unwrap(), 4);
    assert_eq!(calls(&runs), 1);
}

#[test]
fn missing_resources_are_reported_in_declaration_order() {
    let market = market(Prerun::Inline);
    let w = market.register("w").unwrap().as_resource::<String>();
    let y = market.register("y").unwrap().as_resource::<String>();
    let z = market.register("z").unwrap().as_resource::<String>();
    let x = append(&market, "x", None, Some(&w), "x");

    let root = market
        .register("root")
        .unwrap()
        .as_product(
            ProductConfig::new()
                .supplier(&x)
                .supplier(&y)
                .supplier(&z)
                .factory(|_, _| Ok(())),
        )
        .unwrap();

    let error = root
        .assemble(index([y.pack("y".to_string())]).unwrap())
        .unwrap_err();
    assert!(matches!(error, SupplyError::Unsatisfied(ref name) if name == "z"));

    let error = root
        .assemble(index([y.pack("y".to_string()), z.pack("z".to_string())]).unwrap())
        .unwrap_err();
    assert!(matches!(error, SupplyError::Unsatisfied(ref name) if name == "w"));
}

#[test]
fn reading_an_unknown_name_fails() {
    let market = market(Prerun::Inline);
    let product = market
        .register("lonely")
        .unwrap()
        .as_product(ProductConfig::new().factory(|supplies, _| {
            supplies.unpack::<String>("nobody")?;
            Ok(())
        }))
        .unwrap()
        .assemble(SupplyMap::new())
        .unwrap();

    let error = product.unpack::<()>().unwrap_err();
    let SupplyError::FactoryFailed { product, error } = error else {
        panic!("expected the factory to fail");
    };
    assert_eq!(product, "lonely");
    assert_eq!(
        error.to_string(),
        SupplyError::Unsatisfied("nobody".to_string()).to_string()
    );
}

#[test]
fn reassembly_only_rebuilds_dependents() {
    let market = market(Prerun::Inline);
    let a = market.register("a").unwrap().as_resource::<String>();
    let b = append(&market, "b", None, Some(&a), "b");
    let c = append(&market, "c", Some(&b), None, "c");
    let d = append(&market, "d", Some(&c), None, "d");

    let sibling_runs = Arc::new(AtomicUsize::new(0));
    let e = market
        .register("e")
        .unwrap()
        .as_product(ProductConfig::new().factory({
            let sibling_runs = sibling_runs.clone();
            move |_, _| {
                sibling_runs.fetch_add(1, Ordering::SeqCst);
                Ok("e".to_string())
            }
        }))
        .unwrap();

    let app = market
        .register("app")
        .unwrap()
        .as_product(
            ProductConfig::new()
                .supplier(&d)
                .supplier(&e)
                .factory(|supplies, _| {
                    Ok(format!(
                        "{}+{}",
                        supplies.unpack::<String>("d")?,
                        supplies.unpack::<String>("e")?
                    ))
                }),
        )
        .unwrap();

    let before = app.assemble(index([a.pack("a".to_string())]).unwrap()).unwrap();
    let after = before.reassemble(index([a.pack("z".to_string())]).unwrap());

    assert_eq!(*before.unpack::<String>().unwrap(), "abcd+e");
    assert_eq!(*after.unpack::<String>().unwrap(), "zbcd+e");

    for name in ["a", "b", "c", "d"] {
        let old = before.supplies().unpack::<String>(name).unwrap();
        let new = after.supplies().unpack::<String>(name).unwrap();
        assert_ne!(old, new, "'{name}' should have been rebuilt");
    }

    let old_e = before.supplies().get(&e).unwrap();
    let new_e = after.supplies().get(&e).unwrap();
    assert!(old_e
        .as_product()
        .unwrap()
        .ptr_eq(new_e.as_product().unwrap()));
    assert!(Arc::ptr_eq(
        &old_e.unpack::<String>().unwrap(),
        &new_e.unpack::<String>().unwrap()
    ));
    assert_eq!(calls(&sibling_runs), 1);
}

#[test]
fn dependency_checks_follow_the_resolved_tree() {
    let market = market(Prerun::Inline);
    let a = market.register("a").unwrap().as_resource::<String>();
    let b = append(&market, "b", None, Some(&a), "b");
    let c = append(&market, "c", Some(&b), None, "c");

    let product = c.assemble(index([a.pack("a".to_string())]).unwrap()).unwrap();
    let overridden = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<HashSet<_>>();

    assert!(product.depends_on_one_of(&overridden(&["a"])));
    assert!(product.depends_on_one_of(&overridden(&["b"])));
    assert!(!product.depends_on_one_of(&overridden(&["unrelated"])));

    // A packed b cuts c off from a
    let packed = product.reassemble(index([b.pack("forced".to_string())]).unwrap());
    assert_eq!(*packed.unpack::<String>().unwrap(), "forcedc");
    assert!(!packed.depends_on_one_of(&overridden(&["a"])));
    assert!(packed.depends_on_one_of(&overridden(&["b"])));
}

fn lazy_products_wait_for_their_first_read(prerun: Prerun) {
    let market = market(prerun);
    let lazy_runs = Arc::new(AtomicUsize::new(0));
    let eager_runs = Arc::new(AtomicUsize::new(0));

    let lazy = market
        .register("lazy")
        .unwrap()
        .as_product(
            ProductConfig::new()
                .lazy(true)
                .factory({
                    let lazy_runs = lazy_runs.clone();
                    move |_, _| {
                        lazy_runs.fetch_add(1, Ordering::SeqCst);
                        Ok("lazy".to_string())
                    }
                }),
        )
        .unwrap();

    let eager = market
        .register("eager")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&lazy).factory({
            let eager_runs = eager_runs.clone();
            move |_, _| {
                eager_runs.fetch_add(1, Ordering::SeqCst);
                Ok("eager".to_string())
            }
        }))
        .unwrap();

    let root = market
        .register("root")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&eager).factory(|_, _| Ok(())))
        .unwrap();

    let product = root.assemble(SupplyMap::new()).unwrap();
    block_on(product.settled());
    assert_eq!(calls(&eager_runs), 1);
    assert_eq!(calls(&lazy_runs), 0);

    assert_eq!(*product.supplies().unpack::<String>(&lazy).unwrap(), "lazy");
    assert_eq!(*product.supplies().unpack::<String>(&lazy).unwrap(), "lazy");
    assert_eq!(calls(&lazy_runs), 1);
}

#[test]
fn lazy_products_wait_for_their_first_read_inline() {
    lazy_products_wait_for_their_first_read(Prerun::Inline);
}

#[test]
fn lazy_products_wait_for_their_first_read_in_the_background() {
    lazy_products_wait_for_their_first_read(Prerun::Background);
}

#[test]
fn prerun_failures_surface_on_read() {
    let market = market(Prerun::Background);
    let runs = Arc::new(AtomicUsize::new(0));

    let failing = market
        .register("failing")
        .unwrap()
        .as_product(ProductConfig::new().factory({
            let runs = runs.clone();
            move |_, _| -> Result<(), DynError> {
                runs.fetch_add(1, Ordering::SeqCst);
                Err("boom".into())
            }
        }))
        .unwrap();

    let root = market
        .register("root")
        .unwrap()
        .as_product(
            ProductConfig::new()
                .supplier(&failing)
                .factory(|_, _| Ok("fine".to_string())),
        )
        .unwrap();

    let product = root.assemble(SupplyMap::new()).unwrap();
    block_on(product.settled());

    assert_eq!(*product.unpack::<String>().unwrap(), "fine");

    let first = product.supplies().unpack::<()>(&failing).unwrap_err();
    let second = product.supplies().unpack::<()>(&failing).unwrap_err();
    assert_eq!(first.factory_error().unwrap().to_string(), "boom");
    assert!(Arc::ptr_eq(
        first.factory_error().unwrap(),
        second.factory_error().unwrap()
    ));
    assert_eq!(calls(&runs), 1);
}

#[test]
fn panicking_prerun_leaves_the_pool_usable() {
    let market = Market::with_config(
        MarketConfig::default()
            .prerun(Prerun::Background)
            .pool_size(1),
    );

    let panicking = market
        .register("panicking")
        .unwrap()
        .as_product(ProductConfig::new().factory(|_, _| -> Result<(), DynError> {
            panic!("factory panicked")
        }))
        .unwrap();
    let first = market
        .register("first")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&panicking).factory(|_, _| Ok(())))
        .unwrap()
        .assemble(SupplyMap::new())
        .unwrap();

    let healthy = market
        .register("healthy")
        .unwrap()
        .as_product(ProductConfig::new().factory(|_, _| Ok(1_u8)))
        .unwrap();
    let second = market
        .register("second")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&healthy).factory(|_, _| Ok(())))
        .unwrap();

    // Settling runs on a side thread so a stuck pool fails instead of hanging
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        block_on(first.settled());
        let second = second.assemble(SupplyMap::new()).unwrap();
        block_on(second.settled());
        let resolved = second
            .supplies()
            .get(&healthy)
            .unwrap()
            .as_product()
            .unwrap()
            .is_resolved();
        let _ = tx.send(resolved);
    });

    let resolved = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("pre-run pool stopped after a panicking factory");
    assert!(resolved);
}

#[test]
fn disabled_prerun_builds_on_read() {
    let market = market(Prerun::Disabled);
    let runs = Arc::new(AtomicUsize::new(0));
    let dependency = market
        .register("dependency")
        .unwrap()
        .as_product(ProductConfig::new().factory({
            let runs = runs.clone();
            move |_, _| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(1_i32)
            }
        }))
        .unwrap();
    let root = market
        .register("root")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&dependency).factory({
            let dependency = dependency.clone();
            move |supplies, _| Ok(*supplies.unpack::<i32>(&dependency)? * 10)
        }))
        .unwrap();

    let product = root.assemble(SupplyMap::new()).unwrap();
    assert_eq!(calls(&runs), 0);
    assert!(!product.supplies().get(&dependency).unwrap().as_product().unwrap().is_resolved());

    assert_eq!(*product.unpack::<i32>().unwrap(), 10);
    assert_eq!(calls(&runs), 1);
}

#[test]
fn background_prerun_settles() {
    let market = market(Prerun::Background);
    let dependency = market
        .register("dependency")
        .unwrap()
        .as_product(ProductConfig::new().factory(|_, _| Ok(7_u8)))
        .unwrap();
    let root = market
        .register("root")
        .unwrap()
        .as_product(ProductConfig::new().supplier(&dependency).factory(|_, _| Ok(())))
        .unwrap();

    let product = root.assemble(SupplyMap::new()).unwrap();
    block_on(product.settled());

    let dependency = product.supplies().get(&dependency).unwrap();
    assert!(dependency.as_product().unwrap().is_resolved());
    assert!(!product.is_resolved());
}

#[test]
fn packed_products_skip_the_factory() {
    let market = market(Prerun::Inline);
    let supplier = market
        .register("answer")
        .unwrap()
        .as_product(ProductConfig::new().factory(|_, _| -> Result<u32, DynError> {
            Err("never built".into())
        }))
        .unwrap();

    let packed = supplier.pack(42_u32);
    assert!(packed.is_packed());
    assert_eq!(*packed.unpack::<u32>().unwrap(), 42);

    let reassembled = packed.reassemble(SupplyMap::new());
    assert!(reassembled.ptr_eq(&packed));

    let repacked = packed.pack(43_u32);
    assert_eq!(*repacked.unpack::<u32>().unwrap(), 43);
    assert_eq!(*packed.unpack::<u32>().unwrap(), 42);
}

#[test]
fn resources_repack_with_their_type() {
    let market = market(Prerun::Inline);
    let port = market.register("port").unwrap().as_resource::<u16>();

    let first = port.pack(80);
    let second = first.pack(8080_u16).unwrap();
    assert_eq!(*first.unpack::<u16>().unwrap(), 80);
    assert_eq!(*second.unpack::<u16>().unwrap(), 8080);
    assert_eq!(second.name(), "port");

    let error = first.pack("eighty".to_string()).unwrap_err();
    assert!(matches!(error, SupplyError::DowncastFailed { required_type: "u16", .. }));
}

#[test]
fn wrong_types_fail_to_unpack() {
    let market = market(Prerun::Inline);
    let port = market.register("port").unwrap().as_resource::<u16>();
    let supplies = index([port.pack(80)]).unwrap();

    let error = supplies["port"].unpack::<String>().unwrap_err();
    assert!(matches!(
        error,
        SupplyError::DowncastFailed { ref name, actual_type: "u16", .. } if name == "port"
    ));
}

#[test]
fn supplied_products_follow_their_own_overrides() {
    let market = market(Prerun::Inline);
    let config = market.register("config").unwrap().as_resource::<String>();
    let service = append(&market, "service", None, Some(&config), ":service");
    let app = append(&market, "app", Some(&service), None, ":app");

    let built_service = service
        .assemble(index([config.pack("a".to_string())]).unwrap())
        .unwrap();
    let product = app
        .assemble(
            index([
                Supply::from(built_service),
                config.pack("unused".to_string()).into(),
            ])
            .unwrap(),
        )
        .unwrap();
    assert_eq!(*product.unpack::<String>().unwrap(), "a:service:app");

    let switched = product.reassemble(index([config.pack("b".to_string())]).unwrap());
    assert_eq!(*switched.unpack::<String>().unwrap(), "b:service:app");
    assert_eq!(*product.unpack::<String>().unwrap(), "a:service:app");
}
