//! Checkpoint interface for saving and restoring pool geometry.
//!
//! The wire format belongs to the host: pools only open and close named
//! sections and read or write named scalar fields through the traits below.
//! [`MemCheckpoint`] is a simple in-memory implementation keyed by the
//! dotted section path.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{error, warn};

use crate::{AllocError, AllocResult};

/// Named, nestable sections shared by both checkpoint directions.
pub trait CheckpointSection {
    /// Open a subsection of the current section.
    fn enter_section(&mut self, name: &str);

    /// Close the innermost open section.
    fn leave_section(&mut self);
}

/// Write side of a checkpoint.
pub trait CheckpointOut: CheckpointSection {
    /// Store a scalar under `name` in the current section.
    fn param_out(&mut self, name: &str, value: u64);
}

/// Read side of a checkpoint.
pub trait CheckpointIn: CheckpointSection {
    /// Look up the scalar stored under `name` in the current section.
    fn param_in(&self, name: &str) -> Option<u64>;
}

/// Run `f` inside the section `name`, closing it afterwards.
pub fn with_section<C, R>(cp: &mut C, name: &str, f: impl FnOnce(&mut C) -> R) -> R
where
    C: CheckpointSection + ?Sized,
{
    cp.enter_section(name);
    let result = f(cp);
    cp.leave_section();
    result
}

/// Write a `usize` field.
pub(crate) fn param_out_usize<C: CheckpointOut + ?Sized>(cp: &mut C, name: &str, value: usize) {
    cp.param_out(name, value as u64);
}

/// Read a mandatory `usize` field.
pub(crate) fn param_in_usize<C: CheckpointIn + ?Sized>(cp: &C, name: &str) -> AllocResult<usize> {
    let value = cp.param_in(name).ok_or_else(|| {
        error!("checkpoint: missing field {}", name);
        AllocError::BadCheckpoint
    })?;
    usize::try_from(value).map_err(|_| {
        error!("checkpoint: field {} = {} does not fit usize", name, value);
        AllocError::BadCheckpoint
    })
}

/// In-memory checkpoint keyed by dotted paths such as `mempools.pool0.total_pages`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemCheckpoint {
    fields: BTreeMap<String, u64>,
    path: Vec<String>,
}

impl MemCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, name: &str) -> String {
        let mut key = String::new();
        for section in &self.path {
            key.push_str(section);
            key.push('.');
        }
        key.push_str(name);
        key
    }

    /// Look up a field by its full dotted path.
    pub fn get(&self, key: &str) -> Option<u64> {
        self.fields.get(key).copied()
    }

    /// Store a field under its full dotted path.
    pub fn insert(&mut self, key: &str, value: u64) -> Option<u64> {
        self.fields.insert(String::from(key), value)
    }

    /// Remove a field by its full dotted path.
    pub fn remove(&mut self, key: &str) -> Option<u64> {
        self.fields.remove(key)
    }

    /// Number of stored fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.fields.iter().map(|(key, value)| (key.as_str(), *value))
    }

    /// Depth of the currently open section stack
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

impl CheckpointSection for MemCheckpoint {
    fn enter_section(&mut self, name: &str) {
        self.path.push(String::from(name));
    }

    fn leave_section(&mut self) {
        if self.path.pop().is_none() {
            warn!("checkpoint: leave_section with no open section");
        }
    }
}

impl CheckpointOut for MemCheckpoint {
    fn param_out(&mut self, name: &str, value: u64) {
        let key = self.key(name);
        self.fields.insert(key, value);
    }
}

impl CheckpointIn for MemCheckpoint {
    fn param_in(&self, name: &str) -> Option<u64> {
        self.fields.get(&self.key(name)).copied()
    }
}
