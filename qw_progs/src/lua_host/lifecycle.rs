use log::warn;
use mlua::{Lua, Value};

use super::edict::{EdictRef, EntVars, FieldSlot, FIELDS};
use super::registry::Handle;
use super::state::ServerState;
use super::types::Vec3;
use crate::error::{ProgsError, Result};

/// Freed slots may be reused right away while the server clock is below this.
const REUSE_GRACE: f64 = 2.0;
/// Otherwise a freed slot rests this long so clients do not lerp into it.
const REUSE_DELAY: f64 = 0.5;

impl ServerState {
    /// Pins the script wrapper for `num` the first time it is needed.
    pub fn ensure_identity(&mut self, lua: &Lua, num: usize) -> Result<Handle> {
        let current = self.edict(num)?.identity;
        if current.is_some() {
            return Ok(current);
        }
        let wrapper = lua.create_userdata(EdictRef {
            num,
            state: self.self_ref.clone(),
        })?;
        let handle = self.registry.pin(lua, Value::UserData(wrapper))?;
        self.edict_mut(num)?.identity = handle;
        Ok(handle)
    }

    pub fn ensure_dynamic(&mut self, lua: &Lua, num: usize) -> Result<Handle> {
        let current = self.edict(num)?.dynamic;
        if current.is_some() {
            return Ok(current);
        }
        let table = lua.create_table()?;
        let handle = self.registry.pin(lua, Value::Table(table))?;
        self.edict_mut(num)?.dynamic = handle;
        Ok(handle)
    }

    pub fn ensure_fields(&mut self, lua: &Lua, num: usize) -> Result<()> {
        self.ensure_identity(lua, num)?;
        self.ensure_dynamic(lua, num)?;
        Ok(())
    }

    /// Releases every pin owned by typed fields and drops entity references.
    pub(crate) fn release_refs(&mut self, lua: &Lua, num: usize) -> Result<()> {
        for field in FIELDS {
            if let Some((get, set)) = field.slot.owned_ref() {
                let handle = get(&self.edict(num)?.v);
                self.registry.release(lua, handle)?;
                set(&mut self.edict_mut(num)?.v, Handle::NONE);
            } else if let FieldSlot::Edict { set, .. } = field.slot {
                set(&mut self.edict_mut(num)?.v, Handle::NONE);
            }
        }
        Ok(())
    }

    /// Zeroes the typed fields and gives the slot a fresh dynamic table.
    pub fn clear(&mut self, lua: &Lua, num: usize) -> Result<()> {
        self.reset_fields(lua, num)?;
        self.ensure_identity(lua, num)?;
        Ok(())
    }

    /// Like [`ServerState::clear`] but leaves the identity alone, so the
    /// world can still be materialized by the first call of a map load.
    pub(crate) fn reset_fields(&mut self, lua: &Lua, num: usize) -> Result<()> {
        self.release_refs(lua, num)?;
        let dynamic = std::mem::take(&mut self.edict_mut(num)?.dynamic);
        self.registry.release(lua, dynamic)?;

        let edict = self.edict_mut(num)?;
        edict.v = EntVars::default();
        edict.free = false;
        edict.generation = edict.generation.wrapping_add(1);
        self.ensure_dynamic(lua, num)?;
        Ok(())
    }

    /// Hands out a cleared slot above the client range.
    ///
    /// Never fails for lack of room: with the array full the last slot is
    /// unlinked and reused.
    pub fn alloc(&mut self, lua: &Lua) -> Result<usize> {
        let time = self.globals.time;
        let first = self.max_clients + 1;
        let reusable = (first..self.num_edicts).find(|&num| {
            let edict = &self.edicts[num];
            edict.free && (edict.free_time < REUSE_GRACE || time - edict.free_time > REUSE_DELAY)
        });
        if let Some(num) = reusable {
            self.clear(lua, num)?;
            return Ok(num);
        }

        let max_edicts = self.max_edicts();
        if self.num_edicts < max_edicts {
            let num = self.num_edicts;
            self.num_edicts += 1;
            self.clear(lua, num)?;
            return Ok(num);
        }

        // the evicted slot may still be targeted by another entity's fields
        let num = max_edicts
            .checked_sub(1)
            .filter(|&num| num >= first)
            .ok_or(ProgsError::EdictOverflow(max_edicts))?;
        warn!("no free edicts, evicting edict {num}");
        self.world.unlink(num);
        self.clear(lua, num)?;
        Ok(num)
    }

    /// Marks a slot free. Identity and dynamic handles survive.
    pub fn free(&mut self, lua: &Lua, num: usize) -> Result<()> {
        if num == 0 {
            return Err(ProgsError::FreeWorld);
        }
        self.edict(num)?;
        self.world.unlink(num);
        self.release_refs(lua, num)?;

        let time = self.globals.time;
        let edict = self.edict_mut(num)?;
        let v = &mut edict.v;
        v.takedamage = 0.0;
        v.modelindex = 0.0;
        v.colormap = 0.0;
        v.skin = 0.0;
        v.frame = 0.0;
        v.origin = Vec3::ZERO;
        v.angles = Vec3::ZERO;
        v.nextthink = -1.0;
        v.solid = 0.0;
        edict.free = true;
        edict.free_time = time;
        edict.generation = edict.generation.wrapping_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use mlua::Value;

    use super::*;
    use crate::lua_host::state::{SharedState, WorldLinks};

    struct Recorder(Rc<RefCell<Vec<usize>>>);

    impl WorldLinks for Recorder {
        fn unlink(&mut self, num: usize) {
            self.0.borrow_mut().push(num);
        }
    }

    fn state(max_clients: usize, max_edicts: usize) -> SharedState {
        ServerState::new_shared(max_clients, max_edicts)
    }

    #[test]
    fn clear_gives_fresh_dynamic_table_and_zero_fields() {
        let lua = Lua::new();
        let shared = state(1, 8);
        let mut s = shared.borrow_mut();
        let num = s.alloc(&lua).unwrap();
        s.edicts[num].v.health = 50.0;
        let classname = s.registry.pin_str(&lua, "monster_dog").unwrap();
        s.edicts[num].v.classname = classname;
        let dynamic = s.edicts[num].dynamic;
        let Value::Table(table) = s.registry.fetch(&lua, dynamic).unwrap() else {
            panic!("dynamic fields should be a table");
        };
        table.set("lip", 8).unwrap();

        s.clear(&lua, num).unwrap();
        let edict = &s.edicts[num];
        assert!(edict.dynamic.is_some());
        assert_eq!(edict.v, EntVars::default());
        assert!(!edict.free);
        assert!(!s.registry.is_pinned(classname) || classname == edict.dynamic);
        let Value::Table(fresh) = s.registry.fetch(&lua, edict.dynamic).unwrap() else {
            panic!("dynamic fields should be a table");
        };
        assert!(matches!(fresh.get::<_, Value>("lip").unwrap(), Value::Nil));
    }

    #[test]
    fn free_releases_owned_refs_and_unlinks_once() {
        let lua = Lua::new();
        let shared = state(1, 8);
        let unlinked = Rc::new(RefCell::new(Vec::new()));
        let mut s = shared.borrow_mut();
        s.world = Box::new(Recorder(unlinked.clone()));

        let num = s.alloc(&lua).unwrap();
        let pinned_before = s.registry.live();
        let classname = s.registry.pin_str(&lua, "misc_model").unwrap();
        s.edicts[num].v.classname = classname;
        s.edicts[num].v.owner = s.edicts[num].identity;
        s.edicts[num].v.origin = Vec3::new(1.0, 2.0, 3.0);
        s.globals.time = 7.0;

        s.free(&lua, num).unwrap();
        let edict = &s.edicts[num];
        assert!(edict.free);
        assert_eq!(edict.free_time, 7.0);
        assert!(edict.v.classname.is_none());
        assert!(edict.v.owner.is_none());
        assert_eq!(edict.v.origin, Vec3::ZERO);
        assert_eq!(edict.v.nextthink, -1.0);
        assert!(!s.registry.is_pinned(classname));
        assert_eq!(s.registry.live(), pinned_before);
        assert_eq!(*unlinked.borrow(), vec![num]);
    }

    #[test]
    fn world_cannot_be_freed() {
        let lua = Lua::new();
        let shared = state(1, 8);
        let mut s = shared.borrow_mut();
        assert!(matches!(s.free(&lua, 0), Err(ProgsError::FreeWorld)));
    }

    #[test]
    fn recently_freed_slots_rest_after_grace_period() {
        let lua = Lua::new();
        let shared = state(1, 8);
        let mut s = shared.borrow_mut();
        s.globals.time = 10.0;
        let first = s.alloc(&lua).unwrap();
        assert_eq!(first, 2);
        s.free(&lua, first).unwrap();

        s.globals.time = 10.2;
        let second = s.alloc(&lua).unwrap();
        assert_ne!(second, first);

        s.globals.time = 10.6;
        let third = s.alloc(&lua).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn freed_slots_are_reused_immediately_during_grace() {
        let lua = Lua::new();
        let shared = state(1, 8);
        let mut s = shared.borrow_mut();
        s.globals.time = 1.0;
        let first = s.alloc(&lua).unwrap();
        s.free(&lua, first).unwrap();
        assert_eq!(s.alloc(&lua).unwrap(), first);
    }

    #[test]
    fn full_array_evicts_last_slot() {
        let lua = Lua::new();
        let shared = state(1, 4);
        let unlinked = Rc::new(RefCell::new(Vec::new()));
        let mut s = shared.borrow_mut();
        s.world = Box::new(Recorder(unlinked.clone()));
        s.globals.time = 5.0;

        assert_eq!(s.alloc(&lua).unwrap(), 2);
        assert_eq!(s.alloc(&lua).unwrap(), 3);
        let netname = s.registry.pin_str(&lua, "last").unwrap();
        s.edicts[3].v.netname = netname;

        assert_eq!(s.alloc(&lua).unwrap(), 3);
        assert_eq!(*unlinked.borrow(), vec![3]);
        assert!(!s.registry.is_pinned(netname));
        assert!(s.edicts[3].v.netname.is_none());
    }

    #[test]
    fn identity_is_created_once() {
        let lua = Lua::new();
        let shared = state(1, 4);
        let mut s = shared.borrow_mut();
        let num = s.alloc(&lua).unwrap();
        let identity = s.edicts[num].identity;
        s.clear(&lua, num).unwrap();
        s.free(&lua, num).unwrap();
        assert_eq!(s.ensure_identity(&lua, num).unwrap(), identity);
    }
}
