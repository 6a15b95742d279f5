use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Serialize;

use qw_progs::{EntryPoints, FrameReport, LoadReport, ProgsHost, ServerConfig};

mod cli;
use cli::{CheckArgs, Command, RunArgs};

#[derive(Serialize)]
struct RunReport<'a> {
    mapname: &'a str,
    load: &'a LoadReport,
    frames: &'a [FrameReport],
    num_edicts: usize,
    live_handles: usize,
    final_time: f64,
}

fn main() -> Result<()> {
    let command = cli::parse()?;
    init_logging(command.verbose());

    match command {
        Command::Run(args) => run(args),
        Command::Check(args) => check(args),
    }
}

fn init_logging(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn load_host(config: &ServerConfig) -> Result<ProgsHost> {
    ProgsHost::load(config)
        .with_context(|| format!("loading progs {}", config.progs_path().display()))
}

fn entry_point_names(entry: &EntryPoints) -> Vec<&'static str> {
    let table = [
        ("main", entry.main),
        ("StartFrame", entry.start_frame),
        ("PlayerPreThink", entry.player_pre_think),
        ("PlayerPostThink", entry.player_post_think),
        ("ClientKill", entry.client_kill),
        ("ClientConnect", entry.client_connect),
        ("PutClientInServer", entry.put_client_in_server),
        ("ClientDisconnect", entry.client_disconnect),
        ("SetNewParms", entry.set_new_parms),
        ("SetChangeParms", entry.set_change_parms),
        ("SpectatorConnect", entry.spectator_connect),
        ("SpectatorThink", entry.spectator_think),
        ("SpectatorDisconnect", entry.spectator_disconnect),
    ];
    table
        .into_iter()
        .filter(|(_, handle)| handle.is_some())
        .map(|(name, _)| name)
        .collect()
}

fn check(args: CheckArgs) -> Result<()> {
    let config = args.overrides.load()?;
    let host = load_host(&config)?;
    let entry = host.entry_points()?;
    let defined = entry_point_names(&entry);
    println!("Progs loaded: {}", config.progs_path().display());
    println!("Entry points defined: {}", defined.len());
    for name in defined {
        println!("  - {name}");
    }
    Ok(())
}

fn mapname_for(path: &Path, explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "start".to_string())
    })
}

fn run(args: RunArgs) -> Result<()> {
    let config = args.overrides.load()?;
    let host = load_host(&config)?;

    let entities = fs::read_to_string(&args.map)
        .with_context(|| format!("reading entity text {}", args.map.display()))?;
    let mapname = mapname_for(&args.map, args.mapname);
    let load = host
        .spawn_server(&mapname, &entities)
        .with_context(|| format!("spawning {mapname}"))?;

    println!("Map {mapname}: {} entity blocks", load.blocks);
    println!("  spawned:   {}", load.spawned);
    println!("  inhibited: {}", load.inhibited);
    println!("  empty:     {}", load.empty);
    if load.removed > 0 {
        println!("  removed before spawning: {}", load.removed);
    }
    if !load.missing_classname.is_empty() {
        println!("  without classname: {:?}", load.missing_classname);
    }
    for missing in &load.missing_spawn {
        println!(
            "  no spawn function for {} (edict {})",
            missing.classname, missing.edict
        );
    }

    let mut frames = Vec::with_capacity(args.frames as usize);
    for _ in 0..args.frames {
        frames.push(host.run_frame().context("running server frame")?);
    }
    let thinks: usize = frames.iter().map(|frame| frame.thinks).sum();
    let final_time = host.time()?;
    println!(
        "Ran {} frames ({} thinks), server time {:.2}",
        frames.len(),
        thinks,
        final_time
    );

    if let Some(path) = args.report_json.as_ref() {
        let report = RunReport {
            mapname: &mapname,
            load: &load,
            frames: &frames,
            num_edicts: host.num_edicts()?,
            live_handles: host.live_handles()?,
            final_time,
        };
        let json = serde_json::to_string_pretty(&report).context("serializing run report")?;
        fs::write(path, json)
            .with_context(|| format!("writing run report to {}", path.display()))?;
        println!("Saved run report to {}", path.display());
    }
    Ok(())
}
