use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use qw_progs::ServerConfig;

#[derive(Parser, Debug)]
#[command(
    about = "Loads Lua progs, spawns a map's entities and runs server frames",
    version
)]
pub struct Args {
    /// Optional JSON server config; CLI flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Game directory holding the progs and any modules it requires
    #[arg(long)]
    pub game_dir: Option<PathBuf>,

    /// Progs source, relative to the game directory
    #[arg(long)]
    pub progs: Option<PathBuf>,

    /// Entity text file to load (omit to only load and check the progs)
    #[arg(long)]
    pub map: Option<PathBuf>,

    /// Map name pushed to the progs (default: the map file stem)
    #[arg(long)]
    pub mapname: Option<String>,

    /// Number of server frames to run after spawning (requires --map)
    #[arg(long, default_value_t = 0)]
    pub frames: u32,

    /// Seconds simulated per frame
    #[arg(long)]
    pub frame_time: Option<f64>,

    /// Spawn entities with deathmatch filtering
    #[arg(long)]
    pub deathmatch: bool,

    /// Skill level used by the spawn filter (0 easy, 1 medium, 2+ hard)
    #[arg(long)]
    pub skill: Option<i32>,

    /// Path to write the run report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Raise the log level to debug
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub enum Command {
    Run(RunArgs),
    Check(CheckArgs),
}

#[derive(Debug)]
pub struct RunArgs {
    pub verbose: bool,
    pub overrides: ConfigOverrides,
    pub map: PathBuf,
    pub mapname: Option<String>,
    pub frames: u32,
    pub report_json: Option<PathBuf>,
}

#[derive(Debug)]
pub struct CheckArgs {
    pub verbose: bool,
    pub overrides: ConfigOverrides,
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Run(args) => args.verbose,
            Command::Check(args) => args.verbose,
        }
    }
}

/// Values given on the command line that replace the config file's.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub game_dir: Option<PathBuf>,
    pub progs: Option<PathBuf>,
    pub frame_time: Option<f64>,
    pub deathmatch: bool,
    pub skill: Option<i32>,
}

impl ConfigOverrides {
    pub fn load(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::from_json_file(self.config.as_deref())?;
        if let Some(game_dir) = &self.game_dir {
            config.game_dir = game_dir.clone();
        }
        if let Some(progs) = &self.progs {
            config.progs = progs.clone();
        }
        if let Some(frame_time) = self.frame_time {
            config.frame_time = frame_time;
        }
        if self.deathmatch {
            config.deathmatch = true;
        }
        if let Some(skill) = self.skill {
            config.skill = skill;
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn parse() -> Result<Command> {
    let args = Args::parse();
    args.into_command()
}

impl Args {
    fn into_command(self) -> Result<Command> {
        if self.map.is_none() {
            if self.frames > 0 {
                bail!("--frames requires --map");
            }
            if self.mapname.is_some() {
                bail!("--mapname requires --map");
            }
            if self.report_json.is_some() {
                bail!("--report-json requires --map");
            }
        }

        let overrides = ConfigOverrides {
            config: self.config,
            game_dir: self.game_dir,
            progs: self.progs,
            frame_time: self.frame_time,
            deathmatch: self.deathmatch,
            skill: self.skill,
        };

        match self.map {
            Some(map) => Ok(Command::Run(RunArgs {
                verbose: self.verbose,
                overrides,
                map,
                mapname: self.mapname,
                frames: self.frames,
                report_json: self.report_json,
            })),
            None => Ok(Command::Check(CheckArgs {
                verbose: self.verbose,
                overrides,
            })),
        }
    }
}
