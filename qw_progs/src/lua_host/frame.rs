use log::trace;
use mlua::Lua;
use serde::Serialize;

use super::call::{global_f32, invoke, invoke_as, CallKind};
use super::registry::Handle;
use super::state::{borrow, borrow_mut, SharedState};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameReport {
    /// Server time the frame ran at.
    pub time: f64,
    pub thinks: usize,
}

/// Points `self` at `num` and `other` at the world.
fn set_actors(lua: &Lua, state: &SharedState, num: usize) -> Result<()> {
    let mut s = borrow_mut(state)?;
    let world = s.ensure_identity(lua, 0)?;
    s.globals.self_ = s.ensure_identity(lua, num)?;
    s.globals.other = world;
    Ok(())
}

/// Runs one server frame: `StartFrame`, client think callbacks, due entity
/// thinks, then advances the clock by `frame_time`.
pub fn run_frame(lua: &Lua, state: &SharedState, frame_time: f64) -> Result<FrameReport> {
    let (time, start_frame) = {
        let mut s = borrow_mut(state)?;
        s.globals.force_retouch = global_f32(&lua.globals(), "force_retouch")?;
        (s.globals.time, s.entry.start_frame)
    };
    let mut report = FrameReport { time, thinks: 0 };

    set_actors(lua, state, 0)?;
    invoke_as(lua, state, start_frame, CallKind::StartFrame)?;

    let max_clients = borrow(state)?.max_clients;
    for slot in 0..max_clients {
        let (client, callbacks) = {
            let s = borrow(state)?;
            let client = &s.clients[slot];
            if !client.connected {
                continue;
            }
            let callbacks = if client.spectator {
                [s.entry.spectator_think, Handle::NONE]
            } else {
                [s.entry.player_pre_think, s.entry.player_post_think]
            };
            (slot + 1, callbacks)
        };
        for callback in callbacks {
            set_actors(lua, state, client)?;
            invoke(lua, state, callback)?;
        }
    }

    let mut num = 0;
    loop {
        let think = {
            let mut s = borrow_mut(state)?;
            if num >= s.num_edicts {
                break;
            }
            let is_client = (1..=s.max_clients).contains(&num);
            let edict = s.edict_mut(num)?;
            let due = edict.v.nextthink;
            if edict.free || is_client || due <= 0.0 || f64::from(due) > time + frame_time {
                None
            } else {
                edict.v.nextthink = 0.0;
                s.globals.time = f64::from(due).max(time);
                Some(s.edict(num)?.v.think)
            }
        };
        if let Some(think) = think {
            trace!("edict {num} thinks");
            set_actors(lua, state, num)?;
            invoke(lua, state, think)?;
            borrow_mut(state)?.globals.time = time;
            report.thinks += 1;
        }
        num += 1;
    }

    let mut s = borrow_mut(state)?;
    if s.globals.force_retouch != 0.0 {
        s.globals.force_retouch -= 1.0;
        // StartFrame pulls the counter back from the script global
        lua.globals()
            .raw_set("force_retouch", s.globals.force_retouch)?;
    }
    s.globals.time = time + frame_time;
    Ok(report)
}
