use log::debug;
use mlua::{Error as LuaError, Lua, Result as LuaResult, Value, Variadic};

use super::edict::EdictRef;
use super::state::{borrow_mut, SharedState};
use super::types::{describe_value, Vec3};
use crate::error::Result;

fn edict_num(value: &Value) -> LuaResult<usize> {
    match value {
        Value::UserData(data) => Ok(data.borrow::<EdictRef>()?.num),
        other => Err(LuaError::RuntimeError(format!(
            "expected an edict, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn install_builtins(lua: &Lua, state: &SharedState) -> Result<()> {
    let globals = lua.globals();

    let vec3 = lua.create_function(|lua, (x, y, z): (Option<f32>, Option<f32>, Option<f32>)| {
        lua.create_userdata(Vec3::new(
            x.unwrap_or_default(),
            y.unwrap_or_default(),
            z.unwrap_or_default(),
        ))
    })?;
    globals.set("vec3", vec3)?;

    let spawn_state = state.clone();
    let spawn = lua.create_function(move |lua, ()| {
        let mut s = borrow_mut(&spawn_state)?;
        let num = s.alloc(lua)?;
        let identity = s.ensure_identity(lua, num)?;
        Ok(s.registry.fetch(lua, identity)?)
    })?;
    globals.set("spawn", spawn)?;

    let remove_state = state.clone();
    let remove = lua.create_function(move |lua, entity: Value| {
        let num = edict_num(&entity)?;
        borrow_mut(&remove_state)?.free(lua, num)?;
        Ok(())
    })?;
    globals.set("remove", remove)?;

    let next_state = state.clone();
    let nextent = lua.create_function(move |lua, entity: Value| {
        let start = match entity {
            Value::Nil => 0,
            other => edict_num(&other)?,
        };
        let mut s = borrow_mut(&next_state)?;
        let found = (start + 1..s.num_edicts).find(|&num| !s.edicts[num].free);
        match found {
            Some(num) => {
                let identity = s.ensure_identity(lua, num)?;
                Ok(s.registry.fetch(lua, identity)?)
            }
            None => Ok(Value::Nil),
        }
    })?;
    globals.set("nextent", nextent)?;

    let dprint = lua.create_function(|_, args: Variadic<Value>| {
        let line = args.iter().map(describe_value).collect::<Vec<_>>().join("");
        debug!("{}", line.trim_end());
        Ok(())
    })?;
    globals.set("dprint", dprint)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_host::state::ServerState;

    fn setup() -> (Lua, SharedState) {
        let lua = Lua::new();
        let state = ServerState::new_shared(1, 8);
        install_builtins(&lua, &state).unwrap();
        (lua, state)
    }

    #[test]
    fn spawn_and_remove_drive_the_lifecycle() {
        let (lua, state) = setup();
        let name: String = lua
            .load("local e = spawn() e.classname = 'bolt' remove(e) return tostring(e)")
            .eval()
            .unwrap();
        assert_eq!(name, "edict 2");
        let s = state.borrow();
        assert!(s.edicts[2].free);
        assert!(s.edicts[2].v.classname.is_none());
    }

    #[test]
    fn nextent_walks_allocated_entities() {
        let (lua, _state) = setup();
        let seen: String = lua
            .load(
                r#"
                local a, b, c = spawn(), spawn(), spawn()
                remove(b)
                local out = {}
                local e = nextent(a)
                while e do
                    table.insert(out, tostring(e))
                    e = nextent(e)
                end
                return table.concat(out, ",")
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(seen, "edict 4");
    }

    #[test]
    fn vec3_constructor_defaults_missing_components() {
        let (lua, _state) = setup();
        let sum: f32 = lua
            .load("local v = vec3(2) return v.x + v.y + v.z")
            .eval()
            .unwrap();
        assert_eq!(sum, 2.0);
    }

    #[test]
    fn removing_the_world_is_an_error() {
        let (lua, state) = setup();
        let world = {
            let mut s = state.borrow_mut();
            let identity = s.ensure_identity(&lua, 0).unwrap();
            s.registry.fetch(&lua, identity).unwrap()
        };
        lua.globals().set("world", world).unwrap();
        assert!(lua.load("remove(world)").exec().is_err());
    }
}
