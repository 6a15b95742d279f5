pub mod config;
pub mod error;
pub mod lua_host;

pub use config::ServerConfig;
pub use error::{ProgsError, Result};
pub use lua_host::{
    CallKind, Edict, EntVars, EntryPoints, FrameReport, GlobalVars, Handle, LoadReport, ProgsHost, ServerPhase,
    SpawnFilter, Vec3, WorldLinks,
};
