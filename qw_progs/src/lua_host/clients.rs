use log::info;
use mlua::{Lua, Value};

use super::call::{invoke, invoke_as, CallKind};
use super::fields::write_field;
use super::globals::NUM_PARMS;
use super::state::{borrow_mut, SharedState};
use crate::error::Result;

/// Clears the client's edict and points `self` at it. Returns the edict.
fn prepare(lua: &Lua, state: &SharedState, slot: usize, clear: bool) -> Result<usize> {
    let mut s = borrow_mut(state)?;
    let num = s.client_edict(slot)?;
    if clear {
        s.clear(lua, num)?;
    }
    let world = s.ensure_identity(lua, 0)?;
    s.globals.self_ = s.ensure_identity(lua, num)?;
    s.globals.other = world;
    Ok(num)
}

/// Brings a client into the game: fresh spawn parms from `SetNewParms`, then
/// `ClientConnect` and `PutClientInServer`, or `SpectatorConnect`.
pub fn connect_client(
    lua: &Lua,
    state: &SharedState,
    slot: usize,
    name: &str,
    spectator: bool,
) -> Result<usize> {
    let num = prepare(lua, state, slot, true)?;
    {
        let mut s = borrow_mut(state)?;
        let netname = Value::String(lua.create_string(name)?);
        write_field(&mut s, lua, num, "netname", netname)?;
        let client = &mut s.clients[slot];
        client.connected = true;
        client.spectator = spectator;
        client.name = name.to_string();
    }

    let entry = borrow_mut(state)?.entry;
    invoke_as(lua, state, entry.set_new_parms, CallKind::ParmSync)?;
    {
        let mut s = borrow_mut(state)?;
        let parms = s.globals.parms;
        s.clients[slot].parms = parms;
    }

    if spectator {
        prepare(lua, state, slot, false)?;
        invoke(lua, state, entry.spectator_connect)?;
    } else {
        prepare(lua, state, slot, false)?;
        invoke(lua, state, entry.client_connect)?;
        prepare(lua, state, slot, false)?;
        invoke_as(lua, state, entry.put_client_in_server, CallKind::PutClientInServer)?;
    }
    info!("{name} entered the game as edict {num}");
    Ok(num)
}

pub fn disconnect_client(lua: &Lua, state: &SharedState, slot: usize) -> Result<()> {
    let num = prepare(lua, state, slot, false)?;
    let (connected, spectator, entry) = {
        let s = borrow_mut(state)?;
        let client = &s.clients[slot];
        (client.connected, client.spectator, s.entry)
    };
    if !connected {
        return Ok(());
    }
    let callback = if spectator {
        entry.spectator_disconnect
    } else {
        entry.client_disconnect
    };
    invoke(lua, state, callback)?;

    let mut s = borrow_mut(state)?;
    s.clear(lua, num)?;
    s.clients[slot] = Default::default();
    Ok(())
}

/// Runs `SetChangeParms` for the client and keeps the result for its next
/// spawn.
pub fn save_client_parms(lua: &Lua, state: &SharedState, slot: usize) -> Result<[f32; NUM_PARMS]> {
    prepare(lua, state, slot, false)?;
    let set_change = borrow_mut(state)?.entry.set_change_parms;
    invoke_as(lua, state, set_change, CallKind::ParmSync)?;
    let mut s = borrow_mut(state)?;
    let parms = s.globals.parms;
    s.clients[slot].parms = parms;
    Ok(parms)
}
