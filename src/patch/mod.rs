//! Monkeypatch guards: scoped, LIFO-nested attribute overrides.

pub mod recorder;
pub mod registry;
pub mod target;

#[cfg(test)]
mod test_properties;

pub use recorder::CallRecorder;
pub use registry::{MonkeypatchRecord, OverrideGuard, OverrideInfo, PatchRegistry};
pub use target::{AttributeTable, PatchTarget, PatchValue, patch_value};
