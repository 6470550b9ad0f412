//! Override registry: scoped, reversible attribute substitution.
//!
//! Every override is a record on one installation-ordered stack. Releasing a
//! record restores its original only when it is the innermost live record for
//! its `(target, attribute)` key; an outer record released early is marked and
//! restored later, when the records above it unwind. The visible value of an
//! attribute therefore always belongs to the innermost unreleased override.

#![allow(missing_docs)]

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::errors::{AlhError, Result};
use crate::logger::{HarnessEvent, LoggerHandle};
use crate::patch::target::{PatchTarget, PatchValue, patch_value};

/// Identity of an overridden attribute: target object address plus name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordKey {
    target: usize,
    attribute: String,
}

impl RecordKey {
    fn of(target: &Arc<dyn PatchTarget>, attribute: &str) -> Self {
        Self {
            target: Arc::as_ptr(target).cast::<()>() as usize,
            attribute: attribute.to_string(),
        }
    }
}

/// One installed override.
pub struct MonkeypatchRecord {
    id: u64,
    key: RecordKey,
    target: Arc<dyn PatchTarget>,
    pub attribute: String,
    pub original: PatchValue,
    pub replacement: PatchValue,
    released: bool,
}

impl MonkeypatchRecord {
    pub fn target_name(&self) -> &str {
        self.target.target_name()
    }
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    records: Vec<MonkeypatchRecord>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    logger: LoggerHandle,
}

/// Shared registry of live overrides. Cheap to clone.
#[derive(Clone)]
pub struct PatchRegistry {
    inner: Arc<RegistryInner>,
}

/// Summary of an outstanding override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideInfo {
    pub target: String,
    pub attribute: String,
    /// Released but waiting for an inner override to unwind.
    pub deferred: bool,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::with_logger(LoggerHandle::disabled())
    }

    pub fn with_logger(logger: LoggerHandle) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState::default()),
                logger,
            }),
        }
    }

    /// Install `replacement` as `target.attribute` until the guard is released.
    pub fn with_override<P, V>(
        &self,
        target: &Arc<P>,
        attribute: &str,
        replacement: V,
    ) -> Result<OverrideGuard>
    where
        P: PatchTarget + 'static,
        V: Any + Send + Sync,
    {
        let target: Arc<dyn PatchTarget> = Arc::clone(target) as Arc<dyn PatchTarget>;
        self.install(target, attribute, patch_value(replacement))
    }

    /// Type-erased form of [`Self::with_override`].
    pub fn install(
        &self,
        target: Arc<dyn PatchTarget>,
        attribute: &str,
        replacement: PatchValue,
    ) -> Result<OverrideGuard> {
        let key = RecordKey::of(&target, attribute);
        let target_name = target.target_name().to_string();

        let (id, depth) = {
            let mut state = self.inner.state.lock();
            let original = target.write_attr(attribute, Arc::clone(&replacement))?;
            let id = state.next_id;
            state.next_id += 1;
            state.records.push(MonkeypatchRecord {
                id,
                key: key.clone(),
                target,
                attribute: attribute.to_string(),
                original,
                replacement,
                released: false,
            });
            let depth = state.records.iter().filter(|r| r.key == key).count();
            (id, depth)
        };

        self.inner.logger.send(HarnessEvent::OverrideInstalled {
            target: target_name.clone(),
            attribute: attribute.to_string(),
            depth,
        });
        self.inner.logger.note(
            "ALH-PATCH",
            format!("override {target_name}.{attribute} installed (depth {depth})"),
        );

        Ok(OverrideGuard {
            inner: Arc::clone(&self.inner),
            id,
            target: target_name,
            attribute: attribute.to_string(),
            armed: true,
        })
    }

    /// Overrides not yet restored, in installation order.
    pub fn outstanding(&self) -> Vec<OverrideInfo> {
        self.inner
            .state
            .lock()
            .records
            .iter()
            .map(|r| OverrideInfo {
                target: r.target_name().to_string(),
                attribute: r.attribute.clone(),
                deferred: r.released,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().records.is_empty()
    }

    /// Restore every outstanding override in reverse installation order.
    ///
    /// Failures do not stop the unwinding; all of them are returned.
    pub fn restore_all(&self) -> Vec<AlhError> {
        let outcomes: Vec<(MonkeypatchRecord, Option<String>)> = {
            let mut state = self.inner.state.lock();
            let mut records: Vec<_> = state.records.drain(..).collect();
            records.reverse();
            records
                .into_iter()
                .map(|record| {
                    let error = restore_record(&record).err().map(|e| e.to_string());
                    (record, error)
                })
                .collect()
        };

        let mut failures = Vec::new();
        for (record, error) in outcomes {
            if let Some(details) = &error {
                failures.push(AlhError::Restoration {
                    target: record.target_name().to_string(),
                    attribute: record.attribute.clone(),
                    details: details.clone(),
                });
            }
            self.inner.report_restore(&record, error);
        }
        failures
    }
}

impl Default for PatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryInner {
    fn release(&self, id: u64) -> Result<()> {
        let mut restored = Vec::new();
        let mut first_error = None;
        {
            let mut state = self.state.lock();
            let Some(pos) = state.records.iter().position(|r| r.id == id) else {
                // Already unwound by restore_all.
                return Ok(());
            };
            state.records[pos].released = true;
            let key = state.records[pos].key.clone();

            while let Some(top) = state.records.iter().rposition(|r| r.key == key) {
                if !state.records[top].released {
                    break;
                }
                let record = state.records.remove(top);
                let outcome = restore_record(&record);
                if let Err(e) = &outcome
                    && first_error.is_none()
                {
                    first_error = Some(AlhError::Restoration {
                        target: record.target_name().to_string(),
                        attribute: record.attribute.clone(),
                        details: e.to_string(),
                    });
                }
                restored.push((record, outcome.err()));
            }
        }

        for (record, error) in &restored {
            self.report_restore(record, error.as_ref().map(ToString::to_string));
        }

        first_error.map_or(Ok(()), Err)
    }

    fn is_installed(&self, id: u64) -> bool {
        self.state
            .lock()
            .records
            .iter()
            .any(|r| r.id == id && !r.released)
    }

    fn report_restore(&self, record: &MonkeypatchRecord, error: Option<String>) {
        let target = record.target_name().to_string();
        if let Some(err) = &error {
            eprintln!(
                "[ALH-PATCH] restoring {target}.{} failed: {err}",
                record.attribute
            );
        } else {
            self.logger.note(
                "ALH-PATCH",
                format!("override {target}.{} restored", record.attribute),
            );
        }
        self.logger.send(HarnessEvent::OverrideRestored {
            target,
            attribute: record.attribute.clone(),
            error,
        });
    }
}

fn restore_record(record: &MonkeypatchRecord) -> Result<()> {
    record
        .target
        .write_attr(&record.attribute, Arc::clone(&record.original))
        .map(|_| ())
}

// ──────────────────── guard ────────────────────

/// Scope handle for one override. Dropping it restores the original.
#[must_use = "dropping the guard restores the original value immediately"]
pub struct OverrideGuard {
    inner: Arc<RegistryInner>,
    id: u64,
    target: String,
    attribute: String,
    armed: bool,
}

impl OverrideGuard {
    pub fn target_name(&self) -> &str {
        &self.target
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Whether this override is still live (not released, not unwound).
    pub fn is_installed(&self) -> bool {
        self.armed && self.inner.is_installed(self.id)
    }

    /// Release explicitly, surfacing any restoration failure.
    pub fn restore(mut self) -> Result<()> {
        self.armed = false;
        self.inner.release(self.id)
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if self.armed {
            // Failures were already reported by `release`.
            let _ = self.inner.release(self.id);
        }
    }
}

impl std::fmt::Debug for OverrideGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideGuard")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("attribute", &self.attribute)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::target::AttributeTable;

    fn table() -> Arc<AttributeTable> {
        let t = AttributeTable::new("dialogs");
        t.insert("question", "real".to_string());
        t.insert("open_file_names", "real-chooser".to_string());
        Arc::new(t)
    }

    fn current(t: &AttributeTable, attr: &str) -> String {
        t.get::<String>(attr).unwrap()
    }

    #[test]
    fn guard_drop_restores_original() {
        let registry = PatchRegistry::new();
        let t = table();
        {
            let _guard = registry
                .with_override(&t, "question", "fake".to_string())
                .unwrap();
            assert_eq!(current(&t, "question"), "fake");
        }
        assert_eq!(current(&t, "question"), "real");
        assert!(registry.is_empty());
    }

    #[test]
    fn restore_on_panic_unwind() {
        let registry = PatchRegistry::new();
        let t = table();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry
                .with_override(&t, "question", "fake".to_string())
                .unwrap();
            panic!("test body failed");
        }));
        assert!(result.is_err());
        assert_eq!(current(&t, "question"), "real");
    }

    #[test]
    fn nested_overrides_restore_in_reverse() {
        let registry = PatchRegistry::new();
        let t = table();
        let outer = registry
            .with_override(&t, "question", "outer".to_string())
            .unwrap();
        let inner = registry
            .with_override(&t, "question", "inner".to_string())
            .unwrap();
        assert_eq!(current(&t, "question"), "inner");
        inner.restore().unwrap();
        assert_eq!(current(&t, "question"), "outer");
        outer.restore().unwrap();
        assert_eq!(current(&t, "question"), "real");
    }

    #[test]
    fn out_of_order_release_is_deferred() {
        let registry = PatchRegistry::new();
        let t = table();
        let outer = registry
            .with_override(&t, "question", "outer".to_string())
            .unwrap();
        let inner = registry
            .with_override(&t, "question", "inner".to_string())
            .unwrap();

        drop(outer);
        // The inner scope is still live; its value must stay visible.
        assert_eq!(current(&t, "question"), "inner");
        assert_eq!(registry.outstanding().len(), 2);
        assert!(registry.outstanding()[0].deferred);
        assert!(inner.is_installed());

        drop(inner);
        assert_eq!(current(&t, "question"), "real");
        assert!(registry.is_empty());
    }

    #[test]
    fn attributes_are_independent() {
        let registry = PatchRegistry::new();
        let t = table();
        let a = registry
            .with_override(&t, "question", "q".to_string())
            .unwrap();
        let b = registry
            .with_override(&t, "open_file_names", "f".to_string())
            .unwrap();
        drop(a);
        assert_eq!(current(&t, "question"), "real");
        assert_eq!(current(&t, "open_file_names"), "f");
        drop(b);
        assert_eq!(current(&t, "open_file_names"), "real-chooser");
    }

    #[test]
    fn restore_all_unwinds_everything() {
        let registry = PatchRegistry::new();
        let t = table();
        let g1 = registry
            .with_override(&t, "question", "one".to_string())
            .unwrap();
        let g2 = registry
            .with_override(&t, "question", "two".to_string())
            .unwrap();
        let g3 = registry
            .with_override(&t, "open_file_names", "three".to_string())
            .unwrap();

        assert!(registry.restore_all().is_empty());
        assert_eq!(current(&t, "question"), "real");
        assert_eq!(current(&t, "open_file_names"), "real-chooser");
        assert!(!g2.is_installed());

        // Late guard drops are no-ops.
        drop(g1);
        drop(g2);
        drop(g3);
        assert_eq!(current(&t, "question"), "real");
    }

    #[test]
    fn missing_attribute_fails_install() {
        let registry = PatchRegistry::new();
        let t = table();
        let err = registry
            .with_override(&t, "no_such_dialog", 1_u8)
            .unwrap_err();
        assert_eq!(err.code(), "ALH-2201");
        assert!(registry.is_empty());
    }

    /// A target whose writes start failing on demand.
    struct BrittleTarget {
        table: AttributeTable,
        broken: std::sync::atomic::AtomicBool,
    }

    impl PatchTarget for BrittleTarget {
        fn target_name(&self) -> &str {
            "brittle"
        }

        fn read_attr(&self, attribute: &str) -> Result<PatchValue> {
            self.table.read_attr(attribute)
        }

        fn write_attr(&self, attribute: &str, value: PatchValue) -> Result<PatchValue> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AlhError::Runtime {
                    details: "target is read-only now".to_string(),
                });
            }
            self.table.write_attr(attribute, value)
        }
    }

    #[test]
    fn restoration_failure_is_reported_and_unwinding_continues() {
        let registry = PatchRegistry::new();
        let brittle = Arc::new(BrittleTarget {
            table: AttributeTable::new("brittle"),
            broken: std::sync::atomic::AtomicBool::new(false),
        });
        brittle.table.insert("x", 1_u32);
        let t = table();

        let healthy = registry
            .with_override(&t, "question", "fake".to_string())
            .unwrap();
        let fragile = registry.with_override(&brittle, "x", 2_u32).unwrap();
        brittle
            .broken
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = fragile.restore().unwrap_err();
        assert_eq!(err.code(), "ALH-2203");
        assert!(err.to_string().contains("brittle.x"));

        // The enclosing record still unwinds normally.
        healthy.restore().unwrap();
        assert_eq!(current(&t, "question"), "real");
        assert!(registry.is_empty());
    }
}
