//! Instruments: property descriptors bound to a command channel.
//!
//! An [`Instrument`] owns a channel and a table of
//! [`PropertyDescriptor`]s. `get` and `set` marshal values through the
//! descriptors' validation modes, so driver code is declarative: list the
//! properties, hand over a channel, done. The last value seen for each
//! property (written or read back) is cached and recorded in run metadata.
//!
//! Replies can additionally be screened with device error patterns
//! (`ERROR ...`-style responses many instruments emit instead of data).

mod property;
pub mod selftest;

pub use property::{Access, PropertyDescriptor, PropertyValue, ReturnKind, Validation};

use crate::channel::CommandChannel;
use crate::error::{ScanError, ScanResult};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// One instrument: a channel plus its installed property descriptors.
pub struct Instrument {
    name: Option<String>,
    channel: Box<dyn CommandChannel>,
    properties: IndexMap<String, PropertyDescriptor>,
    cache: HashMap<String, PropertyValue>,
    error_patterns: Vec<Regex>,
}

impl Instrument {
    /// Bind an empty instrument to a channel.
    pub fn new(channel: impl CommandChannel + 'static) -> Self {
        Self {
            name: None,
            channel: Box::new(channel),
            properties: IndexMap::new(),
            cache: HashMap::new(),
            error_patterns: Vec::new(),
        }
    }

    /// Screen every reply against `pattern`; a match raises
    /// [`ScanError::DeviceFault`] instead of decoding.
    pub fn with_error_pattern(mut self, pattern: &str) -> ScanResult<Self> {
        self.error_patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Install a descriptor, validating it first. Reinstalling a name
    /// replaces the descriptor but keeps its position in the table.
    pub fn add_property(&mut self, descriptor: PropertyDescriptor) -> ScanResult<()> {
        descriptor.validate()?;
        self.properties
            .insert(descriptor.name().to_string(), descriptor);
        Ok(())
    }

    /// Registry name if registered, otherwise the channel resource.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.channel.resource())
    }

    /// Channel resource identifier (recorded in metadata).
    pub fn resource(&self) -> &str {
        self.channel.resource()
    }

    /// Installed descriptors in installation order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    /// Descriptor by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    /// Last value seen for a property (set or read back), if any.
    pub fn cached(&self, name: &str) -> Option<&PropertyValue> {
        self.cache.get(name)
    }

    /// All cached values, for metadata snapshots.
    pub fn cached_values(&self) -> &HashMap<String, PropertyValue> {
        &self.cache
    }

    /// Query the device for a property's current value.
    ///
    /// The reply is trimmed, screened against error patterns, decoded under
    /// the descriptor's validation mode (coercing exactly once), cached and
    /// returned.
    pub fn get(&mut self, name: &str) -> ScanResult<PropertyValue> {
        let descriptor = self
            .properties
            .get(name)
            .ok_or_else(|| ScanError::UnknownProperty(name.to_string()))?;
        if !descriptor.is_readable() {
            return Err(ScanError::WriteOnly(name.to_string()));
        }
        let command = descriptor.query_command().ok_or_else(|| ScanError::Descriptor {
            property: name.to_string(),
            reason: "readable property needs a query command".to_string(),
        })?;

        let raw = self.channel.query(command)?;
        let trimmed = raw.trim_end_matches(['\r', '\n']).trim();
        check_fault(
            &self.error_patterns,
            self.name.as_deref(),
            self.channel.resource(),
            trimmed,
        )?;

        let value = descriptor
            .mode()?
            .decode(name, descriptor.return_kind(), trimmed)?;
        debug!(property = name, value = %value, "get");
        self.cache.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Validate a value against the descriptor and write it to the device.
    ///
    /// Validation happens before any channel traffic; a rejected value never
    /// reaches the instrument. On success the user-facing value is cached.
    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> ScanResult<()> {
        let value = value.into();
        let descriptor = self
            .properties
            .get(name)
            .ok_or_else(|| ScanError::UnknownProperty(name.to_string()))?;
        if !descriptor.is_writable() {
            return Err(ScanError::ReadOnly(name.to_string()));
        }

        let (wire, cached) = descriptor.mode()?.marshal(name, &value)?;
        let command = descriptor.format_write(&wire)?;
        debug!(property = name, value = %cached, command = %command, "set");
        self.channel.write(&command)?;
        self.cache.insert(name.to_string(), cached);
        Ok(())
    }

    /// Poll every readable property, refreshing the cache. Write-only
    /// properties are skipped.
    pub fn update_properties(&mut self) -> ScanResult<()> {
        let readable: Vec<String> = self
            .properties
            .values()
            .filter(|d| d.is_readable())
            .map(|d| d.name().to_string())
            .collect();
        for name in readable {
            self.get(&name)?;
        }
        Ok(())
    }

    /// Send a raw command outside the property table (`*RST` and friends).
    pub fn command(&mut self, command: &str) -> ScanResult<()> {
        self.channel.write(command)
    }

    /// Raw query outside the property table; the reply is trimmed and
    /// screened against error patterns but not decoded.
    pub fn query(&mut self, command: &str) -> ScanResult<String> {
        let raw = self.channel.query(command)?;
        let trimmed = raw.trim_end_matches(['\r', '\n']).trim().to_string();
        check_fault(
            &self.error_patterns,
            self.name.as_deref(),
            self.channel.resource(),
            &trimmed,
        )?;
        Ok(trimmed)
    }

    pub(crate) fn set_registry_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }
}

fn check_fault(
    patterns: &[Regex],
    name: Option<&str>,
    resource: &str,
    reply: &str,
) -> ScanResult<()> {
    for pattern in patterns {
        if pattern.is_match(reply) {
            return Err(ScanError::DeviceFault {
                device: name.unwrap_or(resource).to_string(),
                reply: reply.to_string(),
            });
        }
    }
    Ok(())
}

/// Named instruments available to an experiment, in insertion order.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: IndexMap<String, Instrument>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument under a name.
    pub fn add(&mut self, name: &str, mut instrument: Instrument) {
        instrument.set_registry_name(name);
        self.devices.insert(name.to_string(), instrument);
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Shared access to a device.
    pub fn get(&self, name: &str) -> ScanResult<&Instrument> {
        self.devices
            .get(name)
            .ok_or_else(|| ScanError::UnknownDevice(name.to_string()))
    }

    /// Exclusive access to a device.
    pub fn get_mut(&mut self, name: &str) -> ScanResult<&mut Instrument> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| ScanError::UnknownDevice(name.to_string()))
    }

    /// Iterate devices in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Instrument)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Set a property on a named device.
    pub fn set_property(
        &mut self,
        device: &str,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> ScanResult<()> {
        self.get_mut(device)?.set(property, value)
    }

    /// Read a property from a named device.
    pub fn get_property(&mut self, device: &str, property: &str) -> ScanResult<PropertyValue> {
        self.get_mut(device)?.get(property)
    }
}
