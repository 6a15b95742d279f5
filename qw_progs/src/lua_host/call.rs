use log::debug;
use mlua::{Function, Lua, Table, Value};

use super::globals::{parm_name, EntryPoints, GlobalVars, NUM_PARMS};
use super::registry::{Handle, HandleRegistry};
use super::state::{borrow, borrow_mut, ServerPhase, SharedState};
use super::types::value_to_f32;
use crate::error::{ProgsError, Result};

/// Decides which globals travel with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Spawn function for the given entity; `self` is set to it.
    Spawn(usize),
    StartFrame,
    /// Pushes the nine spawn parms.
    PutClientInServer,
    /// Pulls the nine spawn parms back after the call.
    ParmSync,
    Generic,
}

impl CallKind {
    /// Kind implied by comparing `handle` with the registered entry points.
    pub fn for_callable(handle: Handle, entry: &EntryPoints) -> CallKind {
        if handle.is_none() {
            CallKind::Generic
        } else if handle == entry.start_frame {
            CallKind::StartFrame
        } else if handle == entry.put_client_in_server {
            CallKind::PutClientInServer
        } else if handle == entry.set_new_parms || handle == entry.set_change_parms {
            CallKind::ParmSync
        } else {
            CallKind::Generic
        }
    }
}

/// Level metadata pushed once before the first call of a map load.
struct Bootstrap {
    world: Handle,
    mapname: Handle,
    serverflags: f32,
    counters: [(&'static str, f32); 4],
}

/// Values written into the Lua globals right before a call.
struct CallScope {
    bootstrap: Option<Bootstrap>,
    self_: Handle,
    other: Handle,
    force_retouch: f32,
    time: f64,
    parms: Option<[f32; NUM_PARMS]>,
}

impl CallScope {
    fn new(globals: &GlobalVars, kind: CallKind, bootstrap: Option<Bootstrap>) -> Self {
        CallScope {
            bootstrap,
            self_: globals.self_,
            other: globals.other,
            force_retouch: globals.force_retouch,
            time: globals.time,
            parms: (kind == CallKind::PutClientInServer).then_some(globals.parms),
        }
    }

    fn push(&self, lua: &Lua, registry: &HandleRegistry) -> Result<()> {
        let g = lua.globals();
        if let Some(boot) = &self.bootstrap {
            g.raw_set("world", registry.fetch(lua, boot.world)?)?;
            g.raw_set("mapname", registry.fetch(lua, boot.mapname)?)?;
            g.raw_set("serverflags", boot.serverflags)?;
            for (name, value) in boot.counters {
                g.raw_set(name, value)?;
            }
        }
        g.raw_set("self", registry.fetch(lua, self.self_)?)?;
        g.raw_set("other", registry.fetch(lua, self.other)?)?;
        g.raw_set("force_retouch", self.force_retouch)?;
        g.raw_set("time", self.time)?;
        if let Some(parms) = &self.parms {
            for (index, parm) in parms.iter().enumerate() {
                g.raw_set(parm_name(index), *parm)?;
            }
        }
        Ok(())
    }
}

pub(super) fn global_f32(globals: &Table, name: &str) -> Result<f32> {
    Ok(value_to_f32(&globals.raw_get::<_, Value>(name)?).unwrap_or(0.0))
}

/// Runs the callable behind `handle`, choosing the call kind from the
/// registered entry points.
pub fn invoke(lua: &Lua, state: &SharedState, handle: Handle) -> Result<()> {
    let kind = CallKind::for_callable(handle, &borrow(state)?.entry);
    invoke_as(lua, state, handle, kind)
}

/// Runs the callable behind `handle` synchronously with no arguments.
///
/// Zero is a no-op so optional callbacks can stay unset. Any failure is
/// returned to the caller and is meant to abort the running server step.
pub fn invoke_as(lua: &Lua, state: &SharedState, handle: Handle, kind: CallKind) -> Result<()> {
    if handle.is_none() {
        return Ok(());
    }
    if handle.raw() < 0 {
        return Err(ProgsError::InvalidHandle(handle.raw()));
    }

    let function = {
        let mut s = borrow_mut(state)?;
        let function = match s.registry.fetch(lua, handle)? {
            Value::Function(function) => function,
            other => {
                return Err(ProgsError::NotCallable {
                    handle: handle.raw(),
                    found: other.type_name(),
                })
            }
        };

        let mut bootstrap = None;
        if s.phase == ServerPhase::Loading && s.edict(0)?.identity.is_none() {
            s.ensure_fields(lua, 0)?;
            let world = s.edict(0)?.identity;
            s.globals.self_ = world;
            s.globals.other = world;
            s.globals.world = world;
            let g = &s.globals;
            bootstrap = Some(Bootstrap {
                world,
                mapname: g.mapname,
                serverflags: g.serverflags,
                counters: [
                    ("total_secrets", g.total_secrets),
                    ("total_monsters", g.total_monsters),
                    ("found_secrets", g.found_secrets),
                    ("killed_monsters", g.killed_monsters),
                ],
            });
        }

        match kind {
            CallKind::StartFrame => {
                s.globals.force_retouch = global_f32(&lua.globals(), "force_retouch")?;
            }
            CallKind::Spawn(num) => {
                s.globals.self_ = s.ensure_identity(lua, num)?;
            }
            _ => {}
        }

        if s.globals.self_.is_none() {
            return Err(ProgsError::ZeroSelf);
        }

        CallScope::new(&s.globals, kind, bootstrap).push(lua, &s.registry)?;
        function
    };

    debug!("invoke({handle}) as {kind:?}");
    call_unborrowed(function)?;

    if kind == CallKind::ParmSync {
        let g = lua.globals();
        let mut parms = [0.0; NUM_PARMS];
        for (index, parm) in parms.iter_mut().enumerate() {
            *parm = global_f32(&g, &parm_name(index))?;
        }
        borrow_mut(state)?.globals.parms = parms;
    }
    Ok(())
}

fn call_unborrowed(function: Function) -> Result<()> {
    function.call::<_, ()>(()).map_err(ProgsError::Script)
}
