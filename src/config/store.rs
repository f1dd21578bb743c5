//! Configuration variable storage.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::cell::Cell;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Access to a table of configuration variables, by index.
///
/// Indices run from 0 to `count() - 1`.  Callers check the index before
/// calling any of the per-variable methods, which may panic on an invalid
/// one.
///
/// Only [`Self::count()`], [`Self::value()`], [`Self::store()`] and the
/// range and text accessors need implementing.  [`Self::sample()`] and
/// [`Self::write()`] build on [`Self::on_read()`] and [`Self::on_write()`],
/// which default to doing nothing.
pub trait VarStore {
    /// Number of variables
    fn count(&self) -> usize;

    /// Current value, without triggering a read callback
    fn value(&self, index: usize) -> i32;

    /// Store a value as is, without range checks or callbacks
    fn store(&self, index: usize, value: i32);

    fn min(&self, index: usize) -> i32;

    fn max(&self, index: usize) -> i32;

    fn name(&self, index: usize) -> &str;

    fn description(&self, index: usize) -> &str;

    /// Called before a value is sampled
    fn on_read(&self, _index: usize) {}

    /// Called after a value has been written
    fn on_write(&self, _index: usize) {}

    /// Read a value for the OS side: read callback first, then the value.
    fn sample(&self, index: usize) -> i32 {
        self.on_read(index);
        self.value(index)
    }

    /// Write a value from the OS side: limit to the variable's range, store,
    /// then run the write callback.
    ///
    /// Returns the value stored.
    fn write(&self, index: usize, value: i32) -> i32 {
        let value = limit(value, self.min(index), self.max(index));
        self.store(index, value);
        self.on_write(index);
        value
    }
}

impl<T: VarStore + ?Sized> VarStore for &T {
    fn count(&self) -> usize {
        (**self).count()
    }

    fn value(&self, index: usize) -> i32 {
        (**self).value(index)
    }

    fn store(&self, index: usize, value: i32) {
        (**self).store(index, value)
    }

    fn min(&self, index: usize) -> i32 {
        (**self).min(index)
    }

    fn max(&self, index: usize) -> i32 {
        (**self).max(index)
    }

    fn name(&self, index: usize) -> &str {
        (**self).name(index)
    }

    fn description(&self, index: usize) -> &str {
        (**self).description(index)
    }

    fn on_read(&self, index: usize) {
        (**self).on_read(index)
    }

    fn on_write(&self, index: usize) {
        (**self).on_write(index)
    }
}

// Not i32::clamp(), which panics if min > max.
fn limit(value: i32, min: i32, max: i32) -> i32 {
    let value = if value > max { max } else { value };
    if value < min { min } else { value }
}

/// What triggered a [`VarCallback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarEvent {
    /// The OS side is about to read the value
    Read,
    /// The value has just been written
    Write,
}

/// Variable callback, called with the context given at registration.  A
/// read callback may update the value before it is sampled using
/// [`ConfigVar::set()`].
pub type VarCallback = fn(&ConfigVar, VarEvent, usize);

/// One configuration variable.
///
/// Values live in `Cell`s, so a table is not `Sync` and cannot be a
/// `static`.  Build it where the polling loop runs:
///
/// ```rust,ignore
/// let vars = [
///     ConfigVar::new(0, "pwm_freq", "PWM frequency in Hz", 20_000, 1_000, 100_000),
///     ConfigVar::new(1, "led", "Status LED on/off", 0, 0, 1),
/// ];
/// let mut server = ConfigServer::new(VarTable::new(&vars));
/// ```
pub struct ConfigVar {
    id: i32,
    name: &'static str,
    description: &'static str,
    value: Cell<i32>,
    min: i32,
    max: i32,
    on_read: Cell<Option<(VarCallback, usize)>>,
    on_write: Cell<Option<(VarCallback, usize)>>,
}

impl ConfigVar {
    pub const fn new(
        id: i32,
        name: &'static str,
        description: &'static str,
        value: i32,
        min: i32,
        max: i32,
    ) -> Self {
        Self {
            id,
            name,
            description,
            value: Cell::new(value),
            min,
            max,
            on_read: Cell::new(None),
            on_write: Cell::new(None),
        }
    }

    /// Application defined identifier, independent of the table index
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn value(&self) -> i32 {
        self.value.get()
    }

    /// Set the value without range checks or callbacks
    pub fn set(&self, value: i32) {
        self.value.set(value);
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    /// Set the value limited to the variable's range, optionally running the
    /// write callback.  Returns the value stored.
    pub fn set_limited(&self, value: i32, trigger: bool) -> i32 {
        let value = limit(value, self.min, self.max);
        self.value.set(value);
        if trigger {
            self.fire(VarEvent::Write);
        }
        value
    }

    fn fire(&self, event: VarEvent) {
        let callback = match event {
            VarEvent::Read => self.on_read.get(),
            VarEvent::Write => self.on_write.get(),
        };
        if let Some((callback, context)) = callback {
            callback(self, event, context);
        }
    }
}

/// A fixed table of [`ConfigVar`]s.
///
/// Variables are addressed by table index on the wire, and by id or name
/// locally.
pub struct VarTable<'a> {
    vars: &'a [ConfigVar],
}

impl<'a> VarTable<'a> {
    pub const fn new(vars: &'a [ConfigVar]) -> Self {
        Self { vars }
    }

    pub fn vars(&self) -> &'a [ConfigVar] {
        self.vars
    }

    /// Look up a variable by id
    pub fn get(&self, id: i32) -> Option<&'a ConfigVar> {
        self.vars.iter().find(|v| v.id == id)
    }

    /// Look up a variable by name
    pub fn find(&self, name: &str) -> Option<&'a ConfigVar> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn value_by_id(&self, id: i32) -> Result<i32> {
        self.get(id).map(ConfigVar::value).ok_or(Error::UnknownVariable)
    }

    pub fn value_by_name(&self, name: &str) -> Result<i32> {
        self.find(name)
            .map(ConfigVar::value)
            .ok_or(Error::UnknownVariable)
    }

    /// Set a variable by id, limited to its range.  Runs the write callback
    /// if `trigger` is set.
    pub fn set_by_id(&self, id: i32, value: i32, trigger: bool) -> Result<i32> {
        let var = self.get(id).ok_or(Error::UnknownVariable)?;
        Ok(var.set_limited(value, trigger))
    }

    /// Register, or with `None` remove, a variable's read or write callback.
    /// `context` is passed to every call, for example an index into the
    /// application's own state.
    pub fn set_callback(
        &self,
        id: i32,
        event: VarEvent,
        callback: Option<VarCallback>,
        context: usize,
    ) -> Result<()> {
        let var = self.get(id).ok_or(Error::UnknownVariable)?;
        let callback = callback.map(|cb| (cb, context));
        match event {
            VarEvent::Read => var.on_read.set(callback),
            VarEvent::Write => var.on_write.set(callback),
        }
        Ok(())
    }
}

impl VarStore for VarTable<'_> {
    fn count(&self) -> usize {
        self.vars.len()
    }

    fn value(&self, index: usize) -> i32 {
        self.vars[index].value()
    }

    fn store(&self, index: usize, value: i32) {
        self.vars[index].set(value);
    }

    fn min(&self, index: usize) -> i32 {
        self.vars[index].min
    }

    fn max(&self, index: usize) -> i32 {
        self.vars[index].max
    }

    fn name(&self, index: usize) -> &str {
        self.vars[index].name
    }

    fn description(&self, index: usize) -> &str {
        self.vars[index].description
    }

    fn on_read(&self, index: usize) {
        self.vars[index].fire(VarEvent::Read);
    }

    fn on_write(&self, index: usize) {
        self.vars[index].fire(VarEvent::Write);
    }
}
