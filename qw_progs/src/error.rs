use std::path::PathBuf;

use qw_formats::EntityTextError;
use thiserror::Error;

/// Conditions that abort the current server operation (map load or frame).
#[derive(Debug, Error)]
pub enum ProgsError {
    #[error("entity text: {0}")]
    EntityText(#[from] EntityTextError),
    #[error("EDICT_NUM: bad number {0}")]
    BadEdictNum(usize),
    #[error("no free edicts while loading entities (limit {0})")]
    EdictOverflow(usize),
    #[error("the world entity cannot be freed")]
    FreeWorld,
    #[error("invoke({0}) got an invalid handle, this is a bug")]
    InvalidHandle(i32),
    #[error("invoke({handle}) did not get a function, got '{found}' instead")]
    NotCallable { handle: i32, found: &'static str },
    #[error("executing a function with zero self, this is a bug")]
    ZeroSelf,
    #[error("script error: {0}")]
    Script(#[source] mlua::Error),
    #[error("field '{field}' expects {expected}, got {found}")]
    FieldType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("handle {handle} is not a string (got {found})")]
    NotAString { handle: i32, found: &'static str },
    #[error("handle {0} does not refer to an edict")]
    NotAnEdict(i32),
    #[error("client slot {slot} is out of range (max {max})")]
    BadClientSlot { slot: usize, max: usize },
    #[error("server was already spawned")]
    AlreadySpawned,
    #[error("server state is already borrowed")]
    StateBusy,
    #[error("server state has been dropped")]
    StateGone,
    #[error("reading progs {}: {source}", path.display())]
    ProgsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(String),
    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

pub type Result<T, E = ProgsError> = std::result::Result<T, E>;

impl From<ProgsError> for mlua::Error {
    fn from(err: ProgsError) -> Self {
        match err {
            ProgsError::Lua(inner) => inner,
            other => mlua::Error::external(other),
        }
    }
}
