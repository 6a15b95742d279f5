mod builtins;
mod call;
mod clients;
mod edict;
mod fields;
mod frame;
mod globals;
mod lifecycle;
mod registry;
mod spawn;
mod state;
mod types;

pub use call::CallKind;
pub use edict::{Edict, EdictRef, EntVars};
pub use frame::FrameReport;
pub use globals::{EntryPoints, GlobalVars, NUM_PARMS};
pub use registry::{Handle, HandleRegistry};
pub use spawn::{
    LoadReport, MissingSpawn, SpawnFilter, SPAWNFLAG_NOT_DEATHMATCH, SPAWNFLAG_NOT_EASY,
    SPAWNFLAG_NOT_HARD, SPAWNFLAG_NOT_MEDIUM,
};
pub use state::{ClientSlot, DetachedWorld, ServerPhase, WorldLinks};
pub use types::Vec3;

use std::fs;
use std::path::Path;

use log::info;
use mlua::{Lua, LuaOptions, StdLib, Table, Value};

use crate::config::ServerConfig;
use crate::error::{ProgsError, Result};
use state::{borrow, borrow_mut, ServerState, SharedState};

/// A Lua progs runtime bound to one server's entity array.
pub struct ProgsHost {
    lua: Lua,
    state: SharedState,
    filter: SpawnFilter,
    frame_time: f64,
}

fn install_package_path(lua: &Lua, game_dir: &Path) -> Result<()> {
    let package: Table = lua.globals().get("package")?;
    let current_path: String = package.get("path")?;
    let new_path = format!("{current_path};{}/?.lua", game_dir.display());
    package.set("path", new_path)?;
    Ok(())
}

impl ProgsHost {
    /// Reads `<game_dir>/<progs>` and runs it.
    pub fn load(config: &ServerConfig) -> Result<Self> {
        let path = config.progs_path();
        let source = fs::read_to_string(&path).map_err(|source| ProgsError::ProgsIo {
            path: path.clone(),
            source,
        })?;
        Self::from_source(config, &path.display().to_string(), &source)
    }

    pub fn from_source(config: &ServerConfig, chunk_name: &str, source: &str) -> Result<Self> {
        config.validate()?;
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        install_package_path(&lua, &config.game_dir)?;

        let state = ServerState::new_shared(config.max_clients, config.max_edicts);
        builtins::install_builtins(&lua, &state)?;
        lua.load(source)
            .set_name(chunk_name)
            .exec()
            .map_err(ProgsError::Script)?;

        {
            let mut s = borrow_mut(&state)?;
            let entry = EntryPoints::resolve(&lua, &mut s.registry)?;
            s.entry = entry;
        }

        Ok(ProgsHost {
            lua,
            state,
            filter: config.spawn_filter(),
            frame_time: config.frame_time,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn set_world_links(&self, links: Box<dyn WorldLinks>) -> Result<()> {
        borrow_mut(&self.state)?.world = links;
        Ok(())
    }

    /// Loads a map: runs `main`, parses and spawns the entity text, then
    /// switches the server to the active phase.
    pub fn spawn_server(&self, mapname: &str, entities: &str) -> Result<LoadReport> {
        let main = {
            let mut s = borrow_mut(&self.state)?;
            if s.phase != ServerPhase::Dead {
                return Err(ProgsError::AlreadySpawned);
            }
            s.phase = ServerPhase::Loading;
            s.globals.time = 1.0;
            s.globals.mapname = s.registry.pin_str(&self.lua, mapname)?;
            for client in 1..=s.max_clients {
                s.ensure_fields(&self.lua, client)?;
            }
            s.entry.main
        };
        self.invoke(main)?;

        let report = spawn::load_entities(&self.lua, &self.state, entities, self.filter)?;
        borrow_mut(&self.state)?.phase = ServerPhase::Active;
        info!(
            "{mapname}: {} blocks, {} spawned, {} inhibited",
            report.blocks, report.spawned, report.inhibited
        );
        Ok(report)
    }

    /// Loads entity text into the current array without running `main`.
    pub fn load_entities(&self, entities: &str) -> Result<LoadReport> {
        spawn::load_entities(&self.lua, &self.state, entities, self.filter)
    }

    /// Parses the pairs of one block (cursor just past `{`) into slot `num`
    /// and returns the remaining text.
    pub fn parse_entity<'t>(&self, cursor: &'t str, num: usize) -> Result<&'t str> {
        let mut s = borrow_mut(&self.state)?;
        spawn::parse_entity(&mut s, &self.lua, cursor, num)
    }

    pub fn invoke(&self, handle: Handle) -> Result<()> {
        call::invoke(&self.lua, &self.state, handle)
    }

    pub fn invoke_as(&self, handle: Handle, kind: CallKind) -> Result<()> {
        call::invoke_as(&self.lua, &self.state, handle, kind)
    }

    /// Pins the global function `name`, or returns zero when there is none.
    pub fn find_function(&self, name: &str) -> Result<Handle> {
        match self.lua.globals().raw_get::<_, Value>(name)? {
            function @ Value::Function(_) => {
                borrow_mut(&self.state)?.registry.pin(&self.lua, function)
            }
            _ => {
                info!("did not find function '{name}'");
                Ok(Handle::NONE)
            }
        }
    }

    pub fn alloc(&self) -> Result<usize> {
        borrow_mut(&self.state)?.alloc(&self.lua)
    }

    pub fn clear(&self, num: usize) -> Result<()> {
        borrow_mut(&self.state)?.clear(&self.lua, num)
    }

    pub fn free(&self, num: usize) -> Result<()> {
        borrow_mut(&self.state)?.free(&self.lua, num)
    }

    /// Snapshot of slot `num`.
    pub fn edict(&self, num: usize) -> Result<Edict> {
        borrow(&self.state)?.edict(num).cloned()
    }

    pub fn field(&self, num: usize, name: &str) -> Result<Value<'_>> {
        let mut s = borrow_mut(&self.state)?;
        fields::read_field(&mut s, &self.lua, num, name)
    }

    pub fn set_field<'lua>(&'lua self, num: usize, name: &str, value: Value<'lua>) -> Result<()> {
        let mut s = borrow_mut(&self.state)?;
        fields::write_field(&mut s, &self.lua, num, name, value)
    }

    /// Script wrapper of slot `num`, created on demand.
    pub fn identity(&self, num: usize) -> Result<Value<'_>> {
        let mut s = borrow_mut(&self.state)?;
        let handle = s.ensure_identity(&self.lua, num)?;
        s.registry.fetch(&self.lua, handle)
    }

    /// Slot behind an identity handle. Zero maps to `None`.
    pub fn num_for_handle(&self, handle: Handle) -> Result<Option<usize>> {
        if handle.is_none() {
            return Ok(None);
        }
        let value = borrow(&self.state)?.registry.fetch(&self.lua, handle)?;
        let num = match &value {
            Value::UserData(data) => data.borrow::<EdictRef>().map(|edict| edict.num).ok(),
            _ => None,
        };
        num.map(Some).ok_or(ProgsError::NotAnEdict(handle.raw()))
    }

    pub fn get_string(&self, handle: Handle) -> Result<String> {
        borrow(&self.state)?.registry.string(&self.lua, handle)
    }

    pub fn set_string(&self, text: &str) -> Result<Handle> {
        borrow_mut(&self.state)?.registry.pin_str(&self.lua, text)
    }

    pub fn release(&self, handle: Handle) -> Result<()> {
        borrow_mut(&self.state)?.registry.release(&self.lua, handle)
    }

    /// Points `self` at slot `num` for the next generic call.
    pub fn set_self(&self, num: usize) -> Result<()> {
        let mut s = borrow_mut(&self.state)?;
        s.globals.self_ = s.ensure_identity(&self.lua, num)?;
        Ok(())
    }

    pub fn run_frame(&self) -> Result<FrameReport> {
        frame::run_frame(&self.lua, &self.state, self.frame_time)
    }

    pub fn connect_client(&self, slot: usize, name: &str, spectator: bool) -> Result<usize> {
        clients::connect_client(&self.lua, &self.state, slot, name, spectator)
    }

    pub fn disconnect_client(&self, slot: usize) -> Result<()> {
        clients::disconnect_client(&self.lua, &self.state, slot)
    }

    pub fn save_client_parms(&self, slot: usize) -> Result<[f32; NUM_PARMS]> {
        clients::save_client_parms(&self.lua, &self.state, slot)
    }

    pub fn globals(&self) -> Result<GlobalVars> {
        Ok(borrow(&self.state)?.globals.clone())
    }

    pub fn entry_points(&self) -> Result<EntryPoints> {
        Ok(borrow(&self.state)?.entry)
    }

    pub fn phase(&self) -> Result<ServerPhase> {
        Ok(borrow(&self.state)?.phase)
    }

    pub fn time(&self) -> Result<f64> {
        Ok(borrow(&self.state)?.time())
    }

    pub fn set_time(&self, time: f64) -> Result<()> {
        borrow_mut(&self.state)?.globals.time = time;
        Ok(())
    }

    pub fn num_edicts(&self) -> Result<usize> {
        Ok(borrow(&self.state)?.num_edicts())
    }

    pub fn max_edicts(&self) -> Result<usize> {
        Ok(borrow(&self.state)?.max_edicts())
    }

    /// Values currently pinned in the handle registry.
    pub fn live_handles(&self) -> Result<usize> {
        Ok(borrow(&self.state)?.registry.live())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(source: &str) -> ProgsHost {
        let config = ServerConfig {
            max_clients: 2,
            max_edicts: 32,
            ..ServerConfig::default()
        };
        ProgsHost::from_source(&config, "test.lua", source).expect("progs load")
    }

    #[test]
    fn free_leaves_no_reference_pinned() {
        let host = host("");
        let num = host.alloc().unwrap();
        let world = host.identity(0).unwrap();
        let baseline = host.live_handles().unwrap();
        for (field, text) in [("classname", "misc"), ("model", "progs/a.mdl"), ("target", "t1")] {
            let value = Value::String(host.lua().create_string(text).unwrap());
            host.set_field(num, field, value).unwrap();
        }
        let think = host.lua().create_function(|_, ()| Ok(())).unwrap();
        host.set_field(num, "think", Value::Function(think)).unwrap();
        host.set_field(num, "owner", world).unwrap();
        assert_eq!(host.live_handles().unwrap(), baseline + 4);

        host.free(num).unwrap();
        assert_eq!(host.live_handles().unwrap(), baseline);
        for field in ["classname", "model", "target", "think", "owner"] {
            assert!(matches!(host.field(num, field).unwrap(), Value::Nil), "{field}");
        }
    }

    #[test]
    fn reference_round_trips_compare_equal() {
        let host = host("");
        let a = host.alloc().unwrap();
        let b = host.alloc().unwrap();
        let target = host.identity(b).unwrap();
        host.set_field(a, "enemy", target.clone()).unwrap();
        assert_eq!(host.field(a, "enemy").unwrap(), target);

        let text = Value::String(host.lua().create_string("hello").unwrap());
        host.set_field(a, "message", text).unwrap();
        let Value::String(read) = host.field(a, "message").unwrap() else {
            panic!("message should be a string");
        };
        assert_eq!(read.to_str().unwrap(), "hello");
    }

    #[test]
    fn handles_map_back_to_slots() {
        let host = host("");
        let num = host.alloc().unwrap();
        let handle = host.edict(num).unwrap().identity;
        assert_eq!(host.num_for_handle(handle).unwrap(), Some(num));
        assert_eq!(host.num_for_handle(Handle::NONE).unwrap(), None);
        let text = host.set_string("plain").unwrap();
        assert!(matches!(
            host.num_for_handle(text),
            Err(ProgsError::NotAnEdict(_))
        ));
        assert_eq!(host.get_string(text).unwrap(), "plain");
        assert_eq!(host.get_string(Handle::NONE).unwrap(), "");
    }

    #[test]
    fn spawn_server_runs_once() {
        let host = host("function worldspawn() end");
        host.spawn_server("start", "{ \"classname\" \"worldspawn\" }")
            .unwrap();
        assert_eq!(host.phase().unwrap(), ServerPhase::Active);
        assert!(matches!(
            host.spawn_server("start", ""),
            Err(ProgsError::AlreadySpawned)
        ));
        let mapname = host.globals().unwrap().mapname;
        assert_eq!(host.get_string(mapname).unwrap(), "start");
    }

    #[test]
    fn scripts_reach_fields_through_the_wrapper() {
        let host = host(
            r#"
            function worldspawn() end
            function misc_box()
                self.health = 25
                self.origin = self.origin + vec3(0, 0, 16)
                self.pos2 = vec3(1, 1, 1)
                self.owner = world
            end
            "#,
        );
        let report = host
            .spawn_server(
                "box",
                "{ \"classname\" \"worldspawn\" }\n{ \"classname\" \"misc_box\" \"origin\" \"8 8 0\" }",
            )
            .unwrap();
        assert_eq!(report.spawned, 2);
        let edict = host.edict(3).unwrap();
        assert_eq!(edict.v.health, 25.0);
        assert_eq!(edict.v.origin, Vec3::new(8.0, 8.0, 16.0));
        assert_eq!(host.num_for_handle(edict.v.owner).unwrap(), Some(0));
        let pos2 = host.field(3, "pos2").unwrap();
        assert_eq!(types::vec3_from_value(&pos2), Some(Vec3::new(1.0, 1.0, 1.0)));
    }
}
