//! Configuration variables addressed by name.
//!
//! This is the surface file system and command line front ends are built
//! on: for each variable a read/write value, a read-only minimum, maximum
//! and description, all looked up by the variable's name.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use heapless::{String, Vec};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::{Access, ConfigClient, Link, Reply, Waiter};
use crate::{Error, Result};

/// Default maximum number of variables a directory holds
pub const MAX_VARS: usize = 64;

/// Longest variable name kept, in bytes
pub const MAX_NAME_LEN: usize = 64;

/// Index-based access to the firmware's variables.
pub trait VarAccess {
    fn count(&self) -> Result<usize>;

    fn read(&self, index: usize, access: Access) -> Result<Reply>;

    fn write(&self, index: usize, value: i32) -> Result<()>;

    fn write_text(&self, index: usize, text: &str) -> Result<()>;
}

impl<L: Link, W: Waiter, const N: usize> VarAccess for ConfigClient<L, W, N> {
    fn count(&self) -> Result<usize> {
        ConfigClient::count(self)
    }

    fn read(&self, index: usize, access: Access) -> Result<Reply> {
        ConfigClient::read(self, index, access)
    }

    fn write(&self, index: usize, value: i32) -> Result<()> {
        ConfigClient::write(self, index, value)
    }

    fn write_text(&self, index: usize, text: &str) -> Result<()> {
        ConfigClient::write_text(self, index, text)
    }
}

/// The firmware's variables, by name.
///
/// ```rust,ignore
/// let dir = VarDirectory::<_>::discover(&client)?;
/// for name in dir.names() {
///     info!("{name} = {}", dir.value(name)?);
/// }
/// dir.set_value_text("led", "1\n")?;
/// ```
pub struct VarDirectory<'c, C: VarAccess, const V: usize = MAX_VARS> {
    client: &'c C,
    names: Vec<String<MAX_NAME_LEN>, V>,
}

impl<'c, C: VarAccess, const V: usize> VarDirectory<'c, C, V> {
    /// Ask the firmware how many variables it has and what they are called.
    ///
    /// Returns [`Error::NoData`] if there are none, and
    /// [`Error::ResourceExhausted`] if there are more than `V`.
    pub fn discover(client: &'c C) -> Result<Self> {
        let count = client.count()?;
        if count == 0 {
            warn!("Firmware has no configuration variables");
            return Err(Error::NoData);
        }
        if count > V {
            warn!("Firmware has {count} configuration variables, only room for {V}");
            return Err(Error::ResourceExhausted);
        }

        let mut names = Vec::new();
        for index in 0..count {
            let reply = client.read(index, Access::Name)?;
            let name = short_name(reply.as_str());
            if name.len() < reply.text.len() {
                warn!("Variable {index} name shortened to {name}");
            }
            debug!("Variable {index}: {name}");
            names.push(name).map_err(|_| Error::ResourceExhausted)?;
        }

        Ok(Self { client, names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Variable names, in firmware index order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Firmware index of variable `name`
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n.as_str() == name)
            .ok_or(Error::UnknownVariable)
    }

    /// Current value, as a number and as text
    pub fn read_value(&self, name: &str) -> Result<Reply> {
        self.client.read(self.index_of(name)?, Access::Value)
    }

    pub fn value(&self, name: &str) -> Result<i32> {
        self.read_value(name).map(|reply| reply.value)
    }

    pub fn set_value(&self, name: &str, value: i32) -> Result<()> {
        self.client.write(self.index_of(name)?, value)
    }

    /// Set the value from text, as written to a file
    pub fn set_value_text(&self, name: &str, text: &str) -> Result<()> {
        self.client.write_text(self.index_of(name)?, text)
    }

    pub fn min(&self, name: &str) -> Result<Reply> {
        self.client.read(self.index_of(name)?, Access::Min)
    }

    pub fn max(&self, name: &str) -> Result<Reply> {
        self.client.read(self.index_of(name)?, Access::Max)
    }

    pub fn description(&self, name: &str) -> Result<Reply> {
        self.client.read(self.index_of(name)?, Access::Description)
    }
}

fn short_name(name: &str) -> String<MAX_NAME_LEN> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
