use std::{
    fmt::Debug,
    sync::{Mutex, OnceLock, PoisonError},
};

/// A cell whose value is computed at most once
///
/// The first caller of [Memo::get_or_run] computes the value, every later caller
/// (on any thread) receives the same value. Failures are values too: memoize a
/// `Result` to cache an error and hand it out again on each read.
pub struct Memo<T> {
    once: OnceLock<T>,
}
impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}
impl<T: Debug> Debug for Memo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.once.get() {
            Some(value) => f.debug_tuple("Memo").field(value).finish(),
            None => f.debug_tuple("Memo").field(&"<pending>").finish(),
        }
    }
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Memo {
            once: OnceLock::new(),
        }
    }

    /// A memo that is already settled
    pub fn resolved(value: T) -> Self {
        Memo {
            once: OnceLock::from(value),
        }
    }

    /// Returns the memoized value, running `compute` if nobody did yet
    ///
    /// Concurrent callers block until the running computation completes.
    pub fn get_or_run(&self, compute: impl FnOnce() -> T) -> &T {
        self.once.get_or_init(compute)
    }

    /// Returns the value without computing it
    pub fn peek(&self) -> Option<&T> {
        self.once.get()
    }

    pub fn is_done(&self) -> bool {
        self.once.get().is_some()
    }
}

/// A zero argument computation that runs at most once
///
/// Owns its computation, unlike [Memo] which takes it on each call. A panicking
/// computation is consumed all the same, later calls panic as well.
pub struct RunOnce<T, F = Box<dyn FnOnce() -> T + Send>> {
    memo: Memo<T>,
    compute: Mutex<Option<F>>,
}

impl<T, F: FnOnce() -> T> RunOnce<T, F> {
    pub fn new(compute: F) -> Self {
        RunOnce {
            memo: Memo::new(),
            compute: Mutex::new(Some(compute)),
        }
    }

    pub fn get(&self) -> &T {
        self.memo.get_or_run(|| {
            let compute = self
                .compute
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            match compute {
                Some(compute) => compute(),
                // Only reached again after the computation panicked
                None => panic!("RunOnce computation panicked on an earlier call"),
            }
        })
    }

    pub fn is_done(&self) -> bool {
        self.memo.is_done()
    }
}
