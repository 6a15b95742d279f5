use log::info;
use mlua::{Lua, Value};
use serde::Serialize;

use super::registry::{Handle, HandleRegistry};
use crate::error::Result;

pub const NUM_PARMS: usize = 9;

/// Simulation globals mirrored into the Lua global table around each call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalVars {
    #[serde(rename = "self")]
    pub self_: Handle,
    pub other: Handle,
    pub world: Handle,
    pub time: f64,
    pub force_retouch: f32,
    pub mapname: Handle,
    pub serverflags: f32,
    pub total_secrets: f32,
    pub total_monsters: f32,
    pub found_secrets: f32,
    pub killed_monsters: f32,
    pub parms: [f32; NUM_PARMS],
}

/// Well-known script callbacks, pinned once after the progs ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryPoints {
    pub main: Handle,
    pub start_frame: Handle,
    pub player_pre_think: Handle,
    pub player_post_think: Handle,
    pub client_kill: Handle,
    pub client_connect: Handle,
    pub put_client_in_server: Handle,
    pub client_disconnect: Handle,
    pub set_new_parms: Handle,
    pub set_change_parms: Handle,
    pub spectator_connect: Handle,
    pub spectator_think: Handle,
    pub spectator_disconnect: Handle,
}

impl EntryPoints {
    pub fn resolve(lua: &Lua, registry: &mut HandleRegistry) -> Result<Self> {
        let mut find = |name: &str| -> Result<Handle> {
            match lua.globals().raw_get::<_, Value>(name)? {
                function @ Value::Function(_) => registry.pin(lua, function),
                _ => {
                    info!("did not find function '{name}'");
                    Ok(Handle::NONE)
                }
            }
        };
        Ok(EntryPoints {
            main: find("main")?,
            start_frame: find("StartFrame")?,
            player_pre_think: find("PlayerPreThink")?,
            player_post_think: find("PlayerPostThink")?,
            client_kill: find("ClientKill")?,
            client_connect: find("ClientConnect")?,
            put_client_in_server: find("PutClientInServer")?,
            client_disconnect: find("ClientDisconnect")?,
            set_new_parms: find("SetNewParms")?,
            set_change_parms: find("SetChangeParms")?,
            spectator_connect: find("SpectatorConnect")?,
            spectator_think: find("SpectatorThink")?,
            spectator_disconnect: find("SpectatorDisconnect")?,
        })
    }
}

pub(crate) fn parm_name(index: usize) -> String {
    format!("parm{}", index + 1)
}
