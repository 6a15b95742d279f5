use std::collections::HashMap;
use std::sync::OnceLock;

use mlua::{Lua, Value};

use super::edict::{EdictRef, FieldDescriptor, FieldSlot, FIELDS};
use super::registry::Handle;
use super::state::ServerState;
use super::types::{push_vec3, value_to_f32, value_to_vec3, vec3_from_value};
use crate::error::{ProgsError, Result};

pub(crate) fn lookup(name: &str) -> Option<&'static FieldDescriptor> {
    static INDEX: OnceLock<HashMap<&'static str, &'static FieldDescriptor>> = OnceLock::new();
    INDEX
        .get_or_init(|| FIELDS.iter().map(|field| (field.name, field)).collect())
        .get(name)
        .copied()
}

pub(crate) fn read_field<'lua>(
    state: &mut ServerState,
    lua: &'lua Lua,
    num: usize,
    name: &str,
) -> Result<Value<'lua>> {
    let Some(field) = lookup(name) else {
        return read_dynamic(state, lua, num, name);
    };
    let v = &state.edict(num)?.v;
    match field.slot {
        FieldSlot::Float { get, .. } => Ok(Value::Number(f64::from(get(v)))),
        FieldSlot::Vector { get, .. } => Ok(push_vec3(lua, get(v))?),
        FieldSlot::Bool { get, .. } => Ok(Value::Boolean(get(v))),
        FieldSlot::Str { get, .. } | FieldSlot::Func { get, .. } | FieldSlot::Edict { get, .. } => {
            state.registry.fetch(lua, get(v))
        }
    }
}

pub(crate) fn write_field<'lua>(
    state: &mut ServerState,
    lua: &'lua Lua,
    num: usize,
    name: &str,
    value: Value<'lua>,
) -> Result<()> {
    let Some(field) = lookup(name) else {
        return write_dynamic(state, lua, num, name, value);
    };
    let mismatch = |value: &Value| ProgsError::FieldType {
        field: name.to_string(),
        expected: field.slot.kind(),
        found: value.type_name(),
    };

    match field.slot {
        FieldSlot::Float { set, .. } => {
            let number = value_to_f32(&value).ok_or_else(|| mismatch(&value))?;
            set(&mut state.edict_mut(num)?.v, number);
        }
        FieldSlot::Vector { set, .. } => {
            let vector = value_to_vec3(&value).ok_or_else(|| mismatch(&value))?;
            set(&mut state.edict_mut(num)?.v, vector);
        }
        FieldSlot::Bool { set, .. } => {
            let Value::Boolean(flag) = value else {
                return Err(mismatch(&value));
            };
            set(&mut state.edict_mut(num)?.v, flag);
        }
        FieldSlot::Str { get, set } | FieldSlot::Func { get, set } => {
            let mut slot = get(&state.edict(num)?.v);
            // the slot is written back even when pinning fails so it never
            // keeps a released number
            let pinned = state.registry.replace(lua, &mut slot, value);
            set(&mut state.edict_mut(num)?.v, slot);
            pinned?;
        }
        FieldSlot::Edict { set, .. } => {
            let target = match &value {
                Value::Nil => Handle::NONE,
                Value::UserData(data) => {
                    let target = data.borrow::<EdictRef>().map_err(|_| mismatch(&value))?.num;
                    state.ensure_identity(lua, target)?
                }
                other => return Err(mismatch(other)),
            };
            set(&mut state.edict_mut(num)?.v, target);
        }
    }
    Ok(())
}

fn dynamic_table<'lua>(
    state: &mut ServerState,
    lua: &'lua Lua,
    num: usize,
) -> Result<mlua::Table<'lua>> {
    let handle = state.ensure_dynamic(lua, num)?;
    match state.registry.fetch(lua, handle)? {
        Value::Table(table) => Ok(table),
        other => Err(ProgsError::FieldType {
            field: "<dynamic>".to_string(),
            expected: "table",
            found: other.type_name(),
        }),
    }
}

fn read_dynamic<'lua>(
    state: &mut ServerState,
    lua: &'lua Lua,
    num: usize,
    name: &str,
) -> Result<Value<'lua>> {
    Ok(dynamic_table(state, lua, num)?.raw_get(name)?)
}

/// Stores an untyped field. Vectors are copied so the caller's value stays
/// independent of the stored one.
pub(crate) fn write_dynamic<'lua>(
    state: &mut ServerState,
    lua: &'lua Lua,
    num: usize,
    name: &str,
    value: Value<'lua>,
) -> Result<()> {
    let value = match vec3_from_value(&value) {
        Some(vector) => push_vec3(lua, vector)?,
        None => value,
    };
    dynamic_table(state, lua, num)?.raw_set(name, value)?;
    Ok(())
}
