//! The property registry.
//!
//! [`PropertyStore`] owns one [`KeyValue`] per entry of
//! [`PROPERTY_TABLE`](super::keys::PROPERTY_TABLE), reachable by numeric key
//! or by name.  It is a plain owned value: callers that share it between
//! tasks wrap it in a lock and hold the lock only for short, synchronous
//! sections.
//!
//! Two access paths exist:
//!
//! - **Local** typed getters and setters (`get_long`, `set_double`, ...),
//!   used by the engine itself.  They ignore the READONLY attribute.
//! - **Wire** access through [`get_payload`](PropertyStore::get_payload) and
//!   [`set_payload`](PropertyStore::set_payload), used to answer server
//!   GET/SET_PROPERTY packets.  These honor READONLY and WRITEONLY and route
//!   COMMAND properties to a registered [`CommandHandler`].

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::keys::{attr, PropDescriptor, PROPERTY_TABLE};
use super::value::{PropType, PropValue, ValueShape};
use crate::domain::geo::GeoPoint;
use crate::protocol::messages::client_error;
use crate::protocol::payload::PayloadWriter;

/// Errors raised by property access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropError {
    #[error("unknown property 0x{0:04X}")]
    InvalidId(u16),
    #[error("unknown property name {0:?}")]
    InvalidName(String),
    #[error("property 0x{0:04X} is read-only")]
    ReadOnly(u16),
    #[error("property 0x{0:04X} is write-only")]
    WriteOnly(u16),
    #[error("invalid value for property 0x{key:04X}: {reason}")]
    InvalidValue { key: u16, reason: String },
    #[error("no command handler for property 0x{0:04X}")]
    CommandInvalid(u16),
    #[error("command 0x{key:04X} failed with code 0x{code:04X}")]
    CommandError { key: u16, code: u16 },
}

impl PropError {
    /// The client error code reported to the server.
    pub fn code(&self) -> u16 {
        match self {
            PropError::InvalidId(_) | PropError::InvalidName(_) => client_error::PROPERTY_INVALID_ID,
            PropError::ReadOnly(_) => client_error::PROPERTY_READ_ONLY,
            PropError::WriteOnly(_) => client_error::PROPERTY_WRITE_ONLY,
            PropError::InvalidValue { .. } => client_error::PROPERTY_INVALID_VALUE,
            PropError::CommandInvalid(_) => client_error::COMMAND_INVALID,
            PropError::CommandError { .. } => client_error::COMMAND_ERROR,
        }
    }
}

/// Handler invoked when the server sets a COMMAND property.
///
/// Returns the handler's own error code on failure; the store wraps it in
/// [`PropError::CommandError`].
#[cfg_attr(test, mockall::automock)]
pub trait CommandHandler: Send + Sync {
    fn execute(&self, key: u16, args: &[u8]) -> Result<(), u16>;
}

/// Errors from the auxiliary property store.
#[derive(Debug, Error)]
pub enum AuxStoreError {
    #[error("auxiliary store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("auxiliary store rejected the write")]
    Rejected,
}

/// Persistent `name=value` line storage for savable properties.
#[cfg_attr(test, mockall::automock)]
pub trait AuxStore: Send {
    /// Replaces the stored lines.
    fn write_data(&mut self, lines: &[String]) -> Result<(), AuxStoreError>;
    /// Returns the stored lines, or `None` if nothing was ever written.
    fn read_data(&mut self) -> Result<Option<Vec<String>>, AuxStoreError>;
}

// ── KeyValue ──────────────────────────────────────────────────────────────────

/// One property: its descriptor, current value and change flag.
#[derive(Debug, Clone)]
pub struct KeyValue {
    desc: &'static PropDescriptor,
    value: PropValue,
    default: PropValue,
    changed: bool,
}

impl KeyValue {
    fn new(desc: &'static PropDescriptor) -> Self {
        let shape = Self::shape_of(desc);
        let default = match shape.parse_text(desc.default) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = desc.key, name = desc.name, error = %e, "bad property default");
                empty_value(&shape)
            }
        };
        Self {
            desc,
            value: default.clone(),
            default,
            changed: false,
        }
    }

    fn shape_of(desc: &PropDescriptor) -> ValueShape {
        ValueShape {
            prop_type: desc.prop_type,
            arity: desc.arity,
            decimals: desc.decimals,
            length: desc.length,
        }
    }

    fn shape(&self) -> ValueShape {
        Self::shape_of(self.desc)
    }

    pub fn key(&self) -> u16 {
        self.desc.key
    }

    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    pub fn prop_type(&self) -> PropType {
        self.desc.prop_type
    }

    pub fn arity(&self) -> usize {
        self.desc.arity
    }

    pub fn has_attr(&self, bit: u8) -> bool {
        self.desc.attrs & bit != 0
    }

    pub fn value(&self) -> &PropValue {
        &self.value
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_default(&self) -> bool {
        self.value == self.default
    }

    /// Current value in text form.
    pub fn to_text(&self) -> String {
        self.shape().format_text(&self.value)
    }

    fn store(&mut self, value: PropValue) {
        self.value = self.shape().normalize(value);
        self.changed = true;
    }

    fn mismatch(&self) -> PropError {
        PropError::InvalidValue {
            key: self.key(),
            reason: format!("wrong accessor for {:?}", self.prop_type()),
        }
    }

    pub fn get_long(&self, index: usize, default: i64) -> i64 {
        match &self.value {
            PropValue::Integers(v) => v.get(index).copied().unwrap_or(default),
            PropValue::Decimals(v) => v.get(index).map(|x| *x as i64).unwrap_or(default),
            PropValue::Flags(v) => v.get(index).map(|b| i64::from(*b)).unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_double(&self, index: usize, default: f64) -> f64 {
        match &self.value {
            PropValue::Decimals(v) => v.get(index).copied().unwrap_or(default),
            PropValue::Integers(v) => v.get(index).map(|x| *x as f64).unwrap_or(default),
            PropValue::Flags(v) => v.get(index).map(|b| f64::from(u8::from(*b))).unwrap_or(default),
            _ => default,
        }
    }

    pub fn set_long(&mut self, index: usize, value: i64) -> Result<(), PropError> {
        self.set_numeric(index, value as f64, value)
    }

    pub fn set_double(&mut self, index: usize, value: f64) -> Result<(), PropError> {
        self.set_numeric(index, value, value.round() as i64)
    }

    fn set_numeric(&mut self, index: usize, as_f64: f64, as_i64: i64) -> Result<(), PropError> {
        if index >= self.arity() {
            return Err(PropError::InvalidValue {
                key: self.key(),
                reason: format!("index {index} out of range"),
            });
        }
        let mut v = self.value.clone();
        match &mut v {
            PropValue::Integers(items) => items[index] = as_i64,
            PropValue::Decimals(items) => items[index] = as_f64,
            PropValue::Flags(items) => items[index] = as_i64 != 0,
            _ => return Err(self.mismatch()),
        }
        self.store(v);
        Ok(())
    }
}

fn empty_value(shape: &ValueShape) -> PropValue {
    match shape.prop_type {
        PropType::Command => PropValue::Command,
        PropType::Gps => PropValue::Gps(GeoPoint::invalid()),
        PropType::String => PropValue::Text(String::new()),
        PropType::Binary => PropValue::Bytes(Vec::new()),
        PropType::Boolean => PropValue::Flags(vec![false; shape.arity]),
        t if t.is_decimal() => PropValue::Decimals(vec![0.0; shape.arity]),
        _ => PropValue::Integers(vec![0; shape.arity]),
    }
}

// ── PropertyStore ─────────────────────────────────────────────────────────────

/// Typed key/value registry for protocol properties.
pub struct PropertyStore {
    entries: Vec<KeyValue>,
    by_key: HashMap<u16, usize>,
    by_name: HashMap<&'static str, usize>,
    handlers: HashMap<u16, Arc<dyn CommandHandler>>,
}

impl PropertyStore {
    /// Builds a store holding every known property at its default.
    pub fn new() -> Self {
        let entries: Vec<KeyValue> = PROPERTY_TABLE.iter().map(KeyValue::new).collect();
        let by_key = entries.iter().enumerate().map(|(i, e)| (e.key(), i)).collect();
        let by_name = entries.iter().enumerate().map(|(i, e)| (e.name(), i)).collect();
        Self {
            entries,
            by_key,
            by_name,
            handlers: HashMap::new(),
        }
    }

    pub fn get(&self, key: u16) -> Option<&KeyValue> {
        self.by_key.get(&key).map(|i| &self.entries[*i])
    }

    fn get_mut(&mut self, key: u16) -> Result<&mut KeyValue, PropError> {
        match self.by_key.get(&key) {
            Some(i) => Ok(&mut self.entries[*i]),
            None => Err(PropError::InvalidId(key)),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&KeyValue> {
        self.by_name.get(name).map(|i| &self.entries[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.entries.iter()
    }

    /// Installs the handler that runs when the server sets command `key`.
    pub fn register_handler(&mut self, key: u16, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(key, handler);
    }

    // ── Local typed access ────────────────────────────────────────────────────

    pub fn get_long(&self, key: u16, default: i64) -> i64 {
        self.get_long_at(key, 0, default)
    }

    pub fn get_long_at(&self, key: u16, index: usize, default: i64) -> i64 {
        self.get(key).map(|kv| kv.get_long(index, default)).unwrap_or(default)
    }

    pub fn get_double(&self, key: u16, default: f64) -> f64 {
        self.get(key).map(|kv| kv.get_double(0, default)).unwrap_or(default)
    }

    pub fn get_bool(&self, key: u16, default: bool) -> bool {
        self.get_long(key, i64::from(default)) != 0
    }

    pub fn get_string(&self, key: u16) -> String {
        match self.get(key).map(KeyValue::value) {
            Some(PropValue::Text(s)) => s.clone(),
            Some(_) => self.get(key).map(KeyValue::to_text).unwrap_or_default(),
            None => String::new(),
        }
    }

    pub fn get_bytes(&self, key: u16) -> Vec<u8> {
        match self.get(key).map(KeyValue::value) {
            Some(PropValue::Bytes(b)) => b.clone(),
            Some(PropValue::Text(s)) => s.as_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn get_gps(&self, key: u16) -> GeoPoint {
        match self.get(key).map(KeyValue::value) {
            Some(PropValue::Gps(p)) => *p,
            _ => GeoPoint::invalid(),
        }
    }

    pub fn set_long(&mut self, key: u16, value: i64) -> Result<(), PropError> {
        self.get_mut(key)?.set_long(0, value)
    }

    pub fn set_long_at(&mut self, key: u16, index: usize, value: i64) -> Result<(), PropError> {
        self.get_mut(key)?.set_long(index, value)
    }

    pub fn set_double(&mut self, key: u16, value: f64) -> Result<(), PropError> {
        self.get_mut(key)?.set_double(0, value)
    }

    pub fn set_bool(&mut self, key: u16, value: bool) -> Result<(), PropError> {
        self.set_long(key, i64::from(value))
    }

    pub fn set_string(&mut self, key: u16, value: &str) -> Result<(), PropError> {
        let kv = self.get_mut(key)?;
        match kv.prop_type() {
            PropType::String => {
                kv.store(PropValue::Text(value.to_string()));
                Ok(())
            }
            _ => Self::apply_text(kv, value),
        }
    }

    pub fn set_bytes(&mut self, key: u16, value: &[u8]) -> Result<(), PropError> {
        let kv = self.get_mut(key)?;
        match kv.prop_type() {
            PropType::Binary => kv.store(PropValue::Bytes(value.to_vec())),
            PropType::String => kv.store(PropValue::Text(String::from_utf8_lossy(value).into_owned())),
            _ => return Err(kv.mismatch()),
        }
        Ok(())
    }

    pub fn set_gps(&mut self, key: u16, point: GeoPoint) -> Result<(), PropError> {
        let kv = self.get_mut(key)?;
        match kv.prop_type() {
            PropType::Gps => {
                kv.store(PropValue::Gps(point));
                Ok(())
            }
            _ => Err(kv.mismatch()),
        }
    }

    /// Sets a property from its text form (`"6,4,60"`, `"16.1"`, ...).
    pub fn set_text(&mut self, key: u16, text: &str) -> Result<(), PropError> {
        let kv = self.get_mut(key)?;
        Self::apply_text(kv, text)
    }

    /// Sets a property by name from its text form.
    pub fn set_text_by_name(&mut self, name: &str, text: &str) -> Result<(), PropError> {
        let key = self
            .by_name(name)
            .map(KeyValue::key)
            .ok_or_else(|| PropError::InvalidName(name.to_string()))?;
        self.set_text(key, text)
    }

    fn apply_text(kv: &mut KeyValue, text: &str) -> Result<(), PropError> {
        let value = kv.shape().parse_text(text).map_err(|e| PropError::InvalidValue {
            key: kv.key(),
            reason: e.0,
        })?;
        kv.store(value);
        Ok(())
    }

    /// Adds `delta` to element 0 of a numeric property, clamped to its range.
    pub fn add_long(&mut self, key: u16, delta: i64) -> Result<i64, PropError> {
        let current = self.get_long(key, 0);
        self.set_long(key, current.saturating_add(delta))?;
        Ok(self.get_long(key, 0))
    }

    // ── Wire access ───────────────────────────────────────────────────────────

    /// Serializes the value of `key` for a PROPERTY_VALUE response.
    ///
    /// # Errors
    ///
    /// [`PropError::InvalidId`] for unknown keys, [`PropError::WriteOnly`]
    /// for write-only properties.
    pub fn get_payload(&self, key: u16) -> Result<Vec<u8>, PropError> {
        let kv = self.get(key).ok_or(PropError::InvalidId(key))?;
        if kv.has_attr(attr::WRITEONLY) {
            return Err(PropError::WriteOnly(key));
        }
        let mut w = PayloadWriter::new();
        kv.shape().encode(&kv.value, &mut w);
        Ok(w.to_vec())
    }

    /// Applies a SET_PROPERTY value, or runs the command handler for
    /// COMMAND properties.
    ///
    /// # Errors
    ///
    /// [`PropError::InvalidId`], [`PropError::ReadOnly`],
    /// [`PropError::InvalidValue`], [`PropError::CommandInvalid`] when no
    /// handler is registered, and [`PropError::CommandError`] wrapping the
    /// handler's own code.
    pub fn set_payload(&mut self, key: u16, bytes: &[u8]) -> Result<(), PropError> {
        let handler = self.handlers.get(&key).cloned();
        let kv = self.get_mut(key)?;
        if kv.has_attr(attr::READONLY) {
            return Err(PropError::ReadOnly(key));
        }
        if kv.prop_type() == PropType::Command {
            let handler = handler.ok_or(PropError::CommandInvalid(key))?;
            debug!(key = format_args!("0x{key:04X}"), "running property command");
            return handler
                .execute(key, bytes)
                .map_err(|code| PropError::CommandError { key, code });
        }
        let value = kv
            .shape()
            .decode(bytes, &kv.value)
            .map_err(|e| PropError::InvalidValue { key, reason: e.0 })?;
        kv.store(value);
        debug!(key = format_args!("0x{key:04X}"), value = %kv.to_text(), "property set by server");
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// `name=value` lines for every changed, savable, non-default property.
    pub fn savable_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|kv| kv.has_attr(attr::SAVE) && kv.is_changed() && !kv.is_default())
            .map(|kv| format!("{}={}", kv.name(), kv.to_text()))
            .collect()
    }

    /// Writes the savable lines to `store`.  Returns the number of lines.
    ///
    /// Values loaded from the store count as changed, so a save always
    /// carries every non-default value forward.
    pub fn save_to_store(&self, store: &mut dyn AuxStore) -> Result<usize, AuxStoreError> {
        let lines = self.savable_lines();
        store.write_data(&lines)?;
        debug!(count = lines.len(), "saved properties");
        Ok(lines.len())
    }

    /// Applies `name=value` lines from `store`.  Unknown names and bad values
    /// are skipped.  Returns the number of properties applied.
    pub fn load_from_store(&mut self, store: &mut dyn AuxStore) -> Result<usize, AuxStoreError> {
        let Some(lines) = store.read_data()? else {
            return Ok(0);
        };
        let mut applied = 0;
        for line in &lines {
            let Some((name, value)) = line.split_once('=') else {
                warn!(line = %line, "ignoring malformed property line");
                continue;
            };
            match self.set_text_by_name(name.trim(), value) {
                Ok(()) => applied += 1,
                Err(e) => warn!(error = %e, "ignoring stored property"),
            }
        }
        debug!(applied, "loaded properties");
        Ok(applied)
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("entries", &self.entries.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
