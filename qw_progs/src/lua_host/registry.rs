use std::collections::BTreeMap;
use std::fmt;

use mlua::{Lua, RegistryKey, Value};
use serde::Serialize;

use crate::error::{ProgsError, Result};

/// Integer key for a value pinned in the Lua registry. Zero means absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Handle(i32);

impl Handle {
    pub const NONE: Handle = Handle(0);

    pub fn from_raw(raw: i32) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pins Lua values behind integer handles.
///
/// Every pinned value keeps a [`RegistryKey`] alive until it is released.
/// Released numbers are handed out again, newest first.
#[derive(Debug)]
pub struct HandleRegistry {
    slots: BTreeMap<i32, RegistryKey>,
    recycled: Vec<i32>,
    next: i32,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        HandleRegistry {
            slots: BTreeMap::new(),
            recycled: Vec::new(),
            next: 1,
        }
    }

    /// Pins `value`. Nil pins nothing and yields [`Handle::NONE`].
    pub fn pin<'lua>(&mut self, lua: &'lua Lua, value: Value<'lua>) -> Result<Handle> {
        if matches!(value, Value::Nil) {
            return Ok(Handle::NONE);
        }
        let key = lua.create_registry_value(value)?;
        let raw = match self.recycled.pop() {
            Some(raw) => raw,
            None => {
                let raw = self.next;
                self.next += 1;
                raw
            }
        };
        self.slots.insert(raw, key);
        Ok(Handle(raw))
    }

    pub fn pin_str(&mut self, lua: &Lua, text: &str) -> Result<Handle> {
        let value = lua.create_string(text)?;
        self.pin(lua, Value::String(value))
    }

    /// Unknown and zero handles read as nil, like an unset registry slot.
    pub fn fetch<'lua>(&self, lua: &'lua Lua, handle: Handle) -> Result<Value<'lua>> {
        match self.slots.get(&handle.0) {
            Some(key) => Ok(lua.registry_value(key)?),
            None => Ok(Value::Nil),
        }
    }

    /// Text of a string handle; zero reads as the empty string.
    pub fn string(&self, lua: &Lua, handle: Handle) -> Result<String> {
        match self.fetch(lua, handle)? {
            Value::Nil => Ok(String::new()),
            Value::String(text) => Ok(text.to_str()?.to_string()),
            Value::Integer(number) => Ok(number.to_string()),
            Value::Number(number) => Ok(number.to_string()),
            other => Err(ProgsError::NotAString {
                handle: handle.0,
                found: other.type_name(),
            }),
        }
    }

    pub fn release(&mut self, lua: &Lua, handle: Handle) -> Result<()> {
        if let Some(key) = self.slots.remove(&handle.0) {
            lua.remove_registry_value(key)?;
            self.recycled.push(handle.0);
        }
        Ok(())
    }

    /// Releases whatever `slot` holds, then pins `value` into it.
    ///
    /// The slot reads as absent if pinning fails, so it never keeps a
    /// released number.
    pub fn replace<'lua>(
        &mut self,
        lua: &'lua Lua,
        slot: &mut Handle,
        value: Value<'lua>,
    ) -> Result<()> {
        let previous = std::mem::take(slot);
        self.release(lua, previous)?;
        *slot = self.pin(lua, value)?;
        Ok(())
    }

    pub fn is_pinned(&self, handle: Handle) -> bool {
        self.slots.contains_key(&handle.0)
    }

    /// Number of values currently pinned.
    pub fn live(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_pins_nothing() {
        let lua = Lua::new();
        let mut registry = HandleRegistry::new();
        let handle = registry.pin(&lua, Value::Nil).unwrap();
        assert!(handle.is_none());
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn replace_releases_previous_value() {
        let lua = Lua::new();
        let mut registry = HandleRegistry::new();
        let mut slot = registry.pin_str(&lua, "first").unwrap();
        assert_eq!(registry.live(), 1);

        let second = Value::String(lua.create_string("second").unwrap());
        registry.replace(&lua, &mut slot, second).unwrap();
        assert_eq!(registry.live(), 1);
        assert_eq!(registry.string(&lua, slot).unwrap(), "second");

        registry.replace(&lua, &mut slot, Value::Nil).unwrap();
        assert!(slot.is_none());
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn released_numbers_are_reused() {
        let lua = Lua::new();
        let mut registry = HandleRegistry::new();
        let first = registry.pin_str(&lua, "a").unwrap();
        let second = registry.pin_str(&lua, "b").unwrap();
        registry.release(&lua, first).unwrap();
        assert!(!registry.is_pinned(first));
        assert!(matches!(registry.fetch(&lua, first).unwrap(), Value::Nil));

        let third = registry.pin_str(&lua, "c").unwrap();
        assert_eq!(third, first);
        assert_ne!(third, second);
        assert_eq!(registry.string(&lua, third).unwrap(), "c");
    }

    #[test]
    fn zero_handle_reads_as_empty_string() {
        let lua = Lua::new();
        let registry = HandleRegistry::new();
        assert_eq!(registry.string(&lua, Handle::NONE).unwrap(), "");
    }
}
