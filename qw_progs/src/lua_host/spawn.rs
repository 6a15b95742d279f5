use log::{debug, info, warn};
use mlua::{Lua, Value};
use qw_formats::{
    parse_block_body, parse_number, parse_vector, EntityBlock, EntityTextError, Tokenizer,
};
use serde::Serialize;

use super::call::{invoke_as, CallKind};
use super::edict::FieldSlot;
use super::fields::{lookup, write_dynamic};
use super::state::{borrow, borrow_mut, ServerState, SharedState};
use super::types::push_vec3;
use crate::error::{ProgsError, Result};

pub const SPAWNFLAG_NOT_EASY: u32 = 256;
pub const SPAWNFLAG_NOT_MEDIUM: u32 = 512;
pub const SPAWNFLAG_NOT_HARD: u32 = 1024;
pub const SPAWNFLAG_NOT_DEATHMATCH: u32 = 2048;

/// Difficulty and game mode used to drop map entities at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnFilter {
    pub deathmatch: bool,
    pub skill: i32,
}

impl SpawnFilter {
    pub fn inhibits(&self, spawnflags: f32) -> bool {
        let flags = spawnflags as u32;
        if self.deathmatch {
            return flags & SPAWNFLAG_NOT_DEATHMATCH != 0;
        }
        let mask = match self.skill {
            i32::MIN..=0 => SPAWNFLAG_NOT_EASY,
            1 => SPAWNFLAG_NOT_MEDIUM,
            _ => SPAWNFLAG_NOT_HARD,
        };
        flags & mask != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingSpawn {
    pub edict: usize,
    pub classname: String,
}

/// Outcome of loading one map's entity text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub blocks: usize,
    pub spawned: usize,
    pub inhibited: usize,
    pub empty: usize,
    pub missing_classname: Vec<usize>,
    pub missing_spawn: Vec<MissingSpawn>,
    /// Blocks freed or replaced by an earlier spawn function before their
    /// own spawn function ran.
    pub removed: usize,
}

/// Applies one parsed block to slot `num`, which is cleared first.
pub(crate) fn apply_block(
    state: &mut ServerState,
    lua: &Lua,
    num: usize,
    block: &EntityBlock,
) -> Result<()> {
    if num == 0 {
        state.reset_fields(lua, num)?;
    } else {
        state.clear(lua, num)?;
    }
    for pair in &block.pairs {
        set_field_from_text(state, lua, num, &pair.key, &pair.value)?;
    }
    if block.is_empty() && num != 0 {
        state.edict_mut(num)?.free = true;
    }
    Ok(())
}

/// Parses the pairs after an opening brace into slot `num` and returns the
/// text after the closing brace.
pub fn parse_entity<'t>(
    state: &mut ServerState,
    lua: &Lua,
    cursor: &'t str,
    num: usize,
) -> Result<&'t str> {
    let (block, rest) = parse_block_body(cursor)?;
    apply_block(state, lua, num, &block)?;
    Ok(rest)
}

fn set_field_from_text(
    state: &mut ServerState,
    lua: &Lua,
    num: usize,
    key: &str,
    text: &str,
) -> Result<()> {
    let Some(field) = lookup(key) else {
        let value = if let Some(vector) = parse_vector(text) {
            push_vec3(lua, vector.into())?
        } else if let Some(number) = parse_number(text) {
            Value::Number(number)
        } else {
            Value::String(lua.create_string(text)?)
        };
        return write_dynamic(state, lua, num, key, value);
    };

    match field.slot {
        FieldSlot::Float { set, .. } => match parse_number(text) {
            Some(number) => set(&mut state.edict_mut(num)?.v, number as f32),
            None => warn!("edict {num}: '{key}' is not a number: '{text}'"),
        },
        FieldSlot::Vector { set, .. } => match parse_vector(text) {
            Some(vector) => set(&mut state.edict_mut(num)?.v, vector.into()),
            None => warn!("edict {num}: '{key}' is not a vector: '{text}'"),
        },
        FieldSlot::Str { get, set } => {
            let mut slot = get(&state.edict(num)?.v);
            let value = Value::String(lua.create_string(text)?);
            let pinned = state.registry.replace(lua, &mut slot, value);
            set(&mut state.edict_mut(num)?.v, slot);
            pinned?;
        }
        FieldSlot::Bool { .. } | FieldSlot::Func { .. } | FieldSlot::Edict { .. } => {
            warn!("edict {num}: '{key}' can't be set from entity text");
        }
    }
    Ok(())
}

/// Loads every block of `text`. The first block fills the world, the rest
/// take consecutive slots after the clients. Spawn functions run once all
/// blocks are parsed.
pub fn load_entities(
    lua: &Lua,
    state: &SharedState,
    text: &str,
    filter: SpawnFilter,
) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let mut placed = Vec::new();
    {
        let mut s = borrow_mut(state)?;
        for client in 1..=s.max_clients {
            s.ensure_fields(lua, client)?;
        }

        let mut cursor = text;
        loop {
            let mut tokens = Tokenizer::new(cursor);
            match tokens.next_token() {
                None => break,
                Some("{") => {}
                Some(found) => {
                    return Err(EntityTextError::ExpectedOpenBrace {
                        found: found.to_string(),
                    }
                    .into())
                }
            }
            let num = if placed.is_empty() {
                0
            } else {
                let num = s.num_edicts;
                if num >= s.max_edicts() {
                    return Err(ProgsError::EdictOverflow(s.max_edicts()));
                }
                s.num_edicts += 1;
                num
            };
            let (block, rest) = parse_block_body(tokens.remaining())?;
            apply_block(&mut s, lua, num, &block)?;
            let generation = s.edict(num)?.generation;
            placed.push((num, block.is_empty(), generation));
            cursor = rest;
        }
    }
    report.blocks = placed.len();

    for (num, empty, generation) in placed {
        if empty {
            report.empty += 1;
            continue;
        }
        if !still_placed(state, num, generation)? {
            debug!("edict {num} was removed before it spawned");
            report.removed += 1;
            continue;
        }
        if spawn_one(lua, state, num, filter, &mut report)? {
            report.spawned += 1;
        }
    }

    info!("{} entities inhibited", report.inhibited);
    Ok(report)
}

/// Whether slot `num` still holds the block placed at `generation`.
fn still_placed(state: &SharedState, num: usize, generation: u32) -> Result<bool> {
    let s = borrow(state)?;
    let edict = s.edict(num)?;
    Ok(!edict.free && edict.generation == generation)
}

fn spawn_one(
    lua: &Lua,
    state: &SharedState,
    num: usize,
    filter: SpawnFilter,
    report: &mut LoadReport,
) -> Result<bool> {
    let spawn_fn = {
        let mut s = borrow_mut(state)?;
        let v = s.edict(num)?.v;
        if num != 0 && filter.inhibits(v.spawnflags) {
            s.free(lua, num)?;
            report.inhibited += 1;
            return Ok(false);
        }

        if v.classname.is_none() {
            warn!("no classname for edict {num}");
            report.missing_classname.push(num);
            if num != 0 {
                s.free(lua, num)?;
            }
            return Ok(false);
        }

        let classname = s.registry.string(lua, v.classname)?;
        match lua.globals().raw_get::<_, Value>(classname.as_str())? {
            function @ Value::Function(_) => s.registry.pin(lua, function)?,
            _ => {
                warn!("no spawn function for '{classname}'");
                report.missing_spawn.push(MissingSpawn {
                    edict: num,
                    classname,
                });
                if num != 0 {
                    s.free(lua, num)?;
                }
                return Ok(false);
            }
        }
    };

    debug!("spawning edict {num}");
    let outcome = invoke_as(lua, state, spawn_fn, CallKind::Spawn(num));
    borrow_mut(state)?.registry.release(lua, spawn_fn)?;
    outcome?;
    Ok(true)
}
