//! Call recorders for stand-in functions installed through overrides.

#![allow(missing_docs)]

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

/// Records the arguments each call of a stand-in received.
///
/// Clones share one log, so the copy moved into a replacement closure and the
/// copy kept by the test observe the same calls.
#[derive(Debug)]
pub struct CallRecorder<T> {
    calls: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for CallRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T> Default for CallRecorder<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Debug> CallRecorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: T) {
        self.calls.lock().push(call);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<T> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<T> {
        self.calls.lock().last().cloned()
    }

    #[track_caller]
    pub fn assert_not_called(&self) {
        let calls = self.calls.lock();
        assert!(
            calls.is_empty(),
            "expected no calls, got {}: {:?}",
            calls.len(),
            *calls
        );
    }

    #[track_caller]
    pub fn assert_called_once(&self) -> T {
        let calls = self.calls.lock();
        assert_eq!(calls.len(), 1, "expected exactly one call, got {:?}", *calls);
        calls[0].clone()
    }

    /// Assert the most recent call satisfies `check`.
    #[track_caller]
    pub fn assert_called_with<F>(&self, check: F)
    where
        F: FnOnce(&T) -> bool,
    {
        let calls = self.calls.lock();
        let Some(last) = calls.last() else {
            panic!("expected a call, but the stand-in was never called");
        };
        assert!(check(last), "last call did not match: {last:?}");
    }
}
