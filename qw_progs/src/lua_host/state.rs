use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use super::edict::Edict;
use super::globals::{EntryPoints, GlobalVars, NUM_PARMS};
use super::registry::HandleRegistry;
use crate::error::{ProgsError, Result};

/// Spatial index hooks the entity store calls into.
pub trait WorldLinks {
    /// Removes `num` from the spatial index before its fields are released.
    fn unlink(&mut self, num: usize);
}

/// Stand-in used when no spatial index is attached. Counts unlinks.
#[derive(Debug, Default)]
pub struct DetachedWorld {
    pub unlinks: usize,
}

impl WorldLinks for DetachedWorld {
    fn unlink(&mut self, _num: usize) {
        self.unlinks += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// No map has been spawned yet.
    Dead,
    Loading,
    Active,
}

#[derive(Debug, Clone, Default)]
pub struct ClientSlot {
    pub connected: bool,
    pub spectator: bool,
    pub name: String,
    pub parms: [f32; NUM_PARMS],
}

pub type SharedState = Rc<RefCell<ServerState>>;

pub struct ServerState {
    pub(crate) self_ref: Weak<RefCell<ServerState>>,
    pub(crate) registry: HandleRegistry,
    pub(crate) edicts: Vec<Edict>,
    pub(crate) num_edicts: usize,
    pub(crate) max_clients: usize,
    pub(crate) globals: GlobalVars,
    pub(crate) entry: EntryPoints,
    pub(crate) phase: ServerPhase,
    pub(crate) clients: Vec<ClientSlot>,
    pub(crate) world: Box<dyn WorldLinks>,
}

impl ServerState {
    /// Builds the shared state. Slot 0 and the client slots always count as
    /// in use.
    pub fn new_shared(max_clients: usize, max_edicts: usize) -> SharedState {
        Rc::new_cyclic(|self_ref| {
            RefCell::new(ServerState {
                self_ref: self_ref.clone(),
                registry: HandleRegistry::new(),
                edicts: vec![Edict::default(); max_edicts],
                num_edicts: (max_clients + 1).min(max_edicts),
                max_clients,
                globals: GlobalVars::default(),
                entry: EntryPoints::default(),
                phase: ServerPhase::Dead,
                clients: vec![ClientSlot::default(); max_clients],
                world: Box::new(DetachedWorld::default()),
            })
        })
    }

    pub fn max_edicts(&self) -> usize {
        self.edicts.len()
    }

    pub fn num_edicts(&self) -> usize {
        self.num_edicts
    }

    pub fn time(&self) -> f64 {
        self.globals.time
    }

    pub fn edict(&self, num: usize) -> Result<&Edict> {
        self.edicts.get(num).ok_or(ProgsError::BadEdictNum(num))
    }

    pub fn edict_mut(&mut self, num: usize) -> Result<&mut Edict> {
        self.edicts.get_mut(num).ok_or(ProgsError::BadEdictNum(num))
    }

    pub(crate) fn client_edict(&self, slot: usize) -> Result<usize> {
        if slot >= self.max_clients {
            return Err(ProgsError::BadClientSlot {
                slot,
                max: self.max_clients,
            });
        }
        Ok(slot + 1)
    }
}

pub(crate) fn borrow(state: &SharedState) -> Result<Ref<'_, ServerState>> {
    state.try_borrow().map_err(|_| ProgsError::StateBusy)
}

pub(crate) fn borrow_mut(state: &SharedState) -> Result<RefMut<'_, ServerState>> {
    state.try_borrow_mut().map_err(|_| ProgsError::StateBusy)
}

/// Runs `f` against the state behind a weak reference held by Lua objects.
pub(crate) fn with_state<T>(
    state: &Weak<RefCell<ServerState>>,
    f: impl FnOnce(&mut ServerState) -> Result<T>,
) -> Result<T> {
    let state = state.upgrade().ok_or(ProgsError::StateGone)?;
    let mut guard = borrow_mut(&state)?;
    f(&mut guard)
}
