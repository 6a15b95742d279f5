use std::cell::RefCell;
use std::rc::Weak;

use mlua::{MetaMethod, UserData, UserDataMethods, Value};

use super::fields;
use super::registry::Handle;
use super::state::{with_state, ServerState};
use super::types::Vec3;

macro_rules! entvars {
    ($($field:ident $(= $name:literal)? : $kind:ident),* $(,)?) => {
        /// Typed entity fields with a fixed layout.
        #[derive(Debug, Clone, Copy, Default, PartialEq)]
        pub struct EntVars {
            $(pub $field: entvars!(@ty $kind),)*
        }

        pub(crate) static FIELDS: &[FieldDescriptor] = &[
            $(FieldDescriptor {
                name: entvars!(@name $field $($name)?),
                slot: entvars!(@slot $kind $field),
            },)*
        ];
    };
    (@ty Float) => { f32 };
    (@ty Vector) => { Vec3 };
    (@ty Bool) => { bool };
    (@ty Str) => { Handle };
    (@ty Func) => { Handle };
    (@ty Edict) => { Handle };
    (@name $field:ident) => { stringify!($field) };
    (@name $field:ident $name:literal) => { $name };
    (@slot Float $field:ident) => {
        FieldSlot::Float { get: |v| v.$field, set: |v, x| v.$field = x }
    };
    (@slot Vector $field:ident) => {
        FieldSlot::Vector { get: |v| v.$field, set: |v, x| v.$field = x }
    };
    (@slot Bool $field:ident) => {
        FieldSlot::Bool { get: |v| v.$field, set: |v, x| v.$field = x }
    };
    (@slot Str $field:ident) => {
        FieldSlot::Str { get: |v| v.$field, set: |v, x| v.$field = x }
    };
    (@slot Func $field:ident) => {
        FieldSlot::Func { get: |v| v.$field, set: |v, x| v.$field = x }
    };
    (@slot Edict $field:ident) => {
        FieldSlot::Edict { get: |v| v.$field, set: |v, x| v.$field = x }
    };
}

/// Accessors for one typed field. `Str` and `Func` own a registry pin,
/// `Edict` stores the identity handle of another record and owns nothing.
#[derive(Clone, Copy)]
pub(crate) enum FieldSlot {
    Float {
        get: fn(&EntVars) -> f32,
        set: fn(&mut EntVars, f32),
    },
    Vector {
        get: fn(&EntVars) -> Vec3,
        set: fn(&mut EntVars, Vec3),
    },
    Bool {
        get: fn(&EntVars) -> bool,
        set: fn(&mut EntVars, bool),
    },
    Str {
        get: fn(&EntVars) -> Handle,
        set: fn(&mut EntVars, Handle),
    },
    Func {
        get: fn(&EntVars) -> Handle,
        set: fn(&mut EntVars, Handle),
    },
    Edict {
        get: fn(&EntVars) -> Handle,
        set: fn(&mut EntVars, Handle),
    },
}

impl FieldSlot {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            FieldSlot::Float { .. } => "number",
            FieldSlot::Vector { .. } => "vec3",
            FieldSlot::Bool { .. } => "boolean",
            FieldSlot::Str { .. } => "string",
            FieldSlot::Func { .. } => "function",
            FieldSlot::Edict { .. } => "edict",
        }
    }

    /// Handle accessors for the slots that keep a registry pin alive.
    pub(crate) fn owned_ref(&self) -> Option<(fn(&EntVars) -> Handle, fn(&mut EntVars, Handle))> {
        match *self {
            FieldSlot::Str { get, set } | FieldSlot::Func { get, set } => Some((get, set)),
            _ => None,
        }
    }
}

pub(crate) struct FieldDescriptor {
    pub(crate) name: &'static str,
    pub(crate) slot: FieldSlot,
}

entvars! {
    modelindex: Float,
    absmin: Vector,
    absmax: Vector,
    ltime: Float,
    lastruntime: Float,
    movetype: Float,
    solid: Float,
    origin: Vector,
    oldorigin: Vector,
    velocity: Vector,
    angles: Vector,
    avelocity: Vector,
    classname: Str,
    model: Str,
    frame: Float,
    skin: Float,
    effects: Float,
    mins: Vector,
    maxs: Vector,
    size: Vector,
    touch: Func,
    use_ = "use": Func,
    think: Func,
    blocked: Func,
    nextthink: Float,
    groundentity: Edict,
    health: Float,
    frags: Float,
    weapon: Float,
    weaponmodel: Str,
    weaponframe: Float,
    currentammo: Float,
    ammo_shells: Float,
    ammo_nails: Float,
    ammo_rockets: Float,
    ammo_cells: Float,
    items: Float,
    takedamage: Float,
    chain: Edict,
    deadflag: Float,
    view_ofs: Vector,
    button0: Float,
    button1: Float,
    button2: Float,
    impulse: Float,
    fixangle: Bool,
    v_angle: Vector,
    netname: Str,
    enemy: Edict,
    flags: Float,
    colormap: Float,
    team: Float,
    max_health: Float,
    teleport_time: Float,
    armortype: Float,
    armorvalue: Float,
    waterlevel: Float,
    watertype: Float,
    ideal_yaw: Float,
    yaw_speed: Float,
    aiment: Edict,
    goalentity: Edict,
    spawnflags: Float,
    target: Str,
    targetname: Str,
    dmg_take: Float,
    dmg_save: Float,
    dmg_inflictor: Edict,
    owner: Edict,
    movedir: Vector,
    message: Str,
    sounds: Float,
    noise: Str,
    noise1: Str,
    noise2: Str,
    noise3: Str,
}

/// One slot of the entity array.
#[derive(Debug, Clone, Default)]
pub struct Edict {
    pub free: bool,
    pub free_time: f64,
    /// Bumped whenever the slot is cleared or freed.
    pub generation: u32,
    /// Pinned [`EdictRef`] for this slot, created on first use.
    pub identity: Handle,
    /// Pinned table holding fields scripts add on their own.
    pub dynamic: Handle,
    pub v: EntVars,
}

/// Script-side wrapper of an entity slot. Field access goes through the
/// typed table first and the dynamic table second.
pub struct EdictRef {
    pub(crate) num: usize,
    pub(crate) state: Weak<RefCell<ServerState>>,
}

impl EdictRef {
    pub fn num(&self) -> usize {
        self.num
    }
}

impl UserData for EdictRef {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: String| {
            let value = with_state(&this.state, |state| {
                fields::read_field(state, lua, this.num, &key)
            })?;
            Ok(value)
        });
        methods.add_meta_method(
            MetaMethod::NewIndex,
            |lua, this, (key, value): (String, Value)| {
                with_state(&this.state, |state| {
                    fields::write_field(state, lua, this.num, &key, value)
                })?;
                Ok(())
            },
        );
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("edict {}", this.num))
        });
    }
}
