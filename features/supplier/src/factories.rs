use std::{any::type_name, marker::PhantomData, sync::Arc};

use crate::{
    errors::SupplyError,
    supplier::JustInTime,
    supplies::Supplies,
    types::{DynError, Injectable, Instance, TypeInfo},
};

/// A Factory providing the value of a product
///
/// Closures are accepted directly by [ProductConfig::factory](crate::ProductConfig::factory),
/// implement this trait for factories which carry their own state.
pub trait ProductFactory: Send + Sync + 'static {
    type Provides: Injectable;

    /// Returns the typeinfo about the factory's provided type
    fn provides() -> TypeInfo
    where
        Self: Sized,
    {
        TypeInfo::of::<Self::Provides>()
    }

    /// Constructs the product's value
    ///
    /// `supplies` resolves the declared dependencies, `just_in_time` holds the
    /// unassembled suppliers the factory may assemble on its own.
    fn construct(
        &self,
        supplies: &Supplies,
        just_in_time: &JustInTime,
    ) -> Result<Self::Provides, DynError>;
}

/// Wrapper Trait for factories, providing type erased instances
pub(crate) trait DynFactory: Send + Sync {
    fn provides(&self) -> TypeInfo;

    fn construct(&self, supplies: &Supplies, just_in_time: &JustInTime)
        -> Result<Instance, DynError>;
}
// Impl DynFactory for any ProductFactory
impl<T: Injectable, SpecificFactory: ProductFactory<Provides = T>> DynFactory for SpecificFactory {
    fn provides(&self) -> TypeInfo {
        SpecificFactory::provides()
    }

    fn construct(
        &self,
        supplies: &Supplies,
        just_in_time: &JustInTime,
    ) -> Result<Instance, DynError> {
        // Forward the call to the specific implementation
        ProductFactory::construct(self, supplies, just_in_time).map(Instance::new)
    }
}

/// Adapts a closure into a [ProductFactory]
pub(crate) struct FnFactory<F, T> {
    factory: F,
    _marker: PhantomData<fn() -> T>,
}
impl<F, T> FnFactory<F, T> {
    pub(crate) fn new(factory: F) -> Self {
        FnFactory {
            factory,
            _marker: PhantomData,
        }
    }
}
impl<F, T> ProductFactory for FnFactory<F, T>
where
    T: Injectable,
    F: Fn(&Supplies, &JustInTime) -> Result<T, DynError> + Send + Sync + 'static,
{
    type Provides = T;

    fn construct(&self, supplies: &Supplies, just_in_time: &JustInTime) -> Result<T, DynError> {
        (self.factory)(supplies, just_in_time)
    }
}

type DynInit = dyn Fn(&Instance, &Supplies) -> Result<(), DynError> + Send + Sync;

/// Side effect run once on a freshly built product value
#[derive(Clone)]
pub(crate) struct InitHook {
    accepts: TypeInfo,
    run: Arc<DynInit>,
}
impl InitHook {
    pub(crate) fn new<T, F>(init: F) -> Self
    where
        T: Injectable,
        F: Fn(&T, &Supplies) -> Result<(), DynError> + Send + Sync + 'static,
    {
        let run = move |instance: &Instance, supplies: &Supplies| -> Result<(), DynError> {
            let value = instance
                .downcast::<T>()
                .map_err(|actual_type| SupplyError::DowncastFailed {
                    name: "init".to_string(),
                    required_type: type_name::<T>(),
                    actual_type,
                })?;
            init(&value, supplies)
        };

        InitHook {
            accepts: TypeInfo::of::<T>(),
            run: Arc::new(run),
        }
    }

    pub(crate) fn accepts(&self) -> TypeInfo {
        self.accepts
    }

    pub(crate) fn run(&self, instance: &Instance, supplies: &Supplies) -> Result<(), DynError> {
        (self.run)(instance, supplies)
    }
}
