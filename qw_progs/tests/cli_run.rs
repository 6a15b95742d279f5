use std::fs;
use std::process::Command;

use anyhow::{Context, Result};
use serde::Deserialize;
use tempfile::tempdir;

#[derive(Debug, Deserialize)]
struct RunReport {
    mapname: String,
    load: LoadSummary,
    frames: Vec<FrameSummary>,
    num_edicts: usize,
    live_handles: usize,
    final_time: f64,
}

#[derive(Debug, Deserialize)]
struct LoadSummary {
    blocks: usize,
    spawned: usize,
    inhibited: usize,
    missing_spawn: Vec<MissingSpawn>,
}

#[derive(Debug, Deserialize)]
struct MissingSpawn {
    edict: usize,
    classname: String,
}

#[derive(Debug, Deserialize)]
struct FrameSummary {
    thinks: usize,
}

const PROGS: &str = r#"
function worldspawn() end
function info_player_deathmatch() end
function item_health() end
function monster_dog()
    self.nextthink = time + 0.05
    self.think = function() self.nextthink = time + 0.05 end
end
"#;

const MAP: &str = r#"
{ "classname" "worldspawn" "wad" "gfx/base.wad" }
{ "classname" "info_player_deathmatch" "origin" "128 0 24" }
{ "classname" "item_health" "spawnflags" "2048" }
{ "classname" "monster_dog" "origin" "0 256 24" }
{ "classname" "misc_explobox" }
"#;

#[test]
fn run_writes_a_json_report() -> Result<()> {
    let dir = tempdir().context("creating game dir")?;
    fs::write(dir.path().join("qwprogs.lua"), PROGS).context("writing progs")?;
    let map_path = dir.path().join("dm3.ent");
    fs::write(&map_path, MAP).context("writing map")?;
    let report_path = dir.path().join("report.json");

    let output = Command::new(env!("CARGO_BIN_EXE_qw_progs"))
        .arg("--game-dir")
        .arg(dir.path())
        .arg("--map")
        .arg(&map_path)
        .args(["--frames", "4", "--deathmatch"])
        .arg("--report-json")
        .arg(&report_path)
        .output()
        .context("running qw_progs")?;
    if !output.status.success() {
        let mut transcript = String::from_utf8_lossy(&output.stdout).to_string();
        transcript.push_str(&String::from_utf8_lossy(&output.stderr));
        panic!("qw_progs exited with {:?}: {}", output.status, transcript);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Map dm3: 5 entity blocks"), "{stdout}");

    let report: RunReport = serde_json::from_str(
        &fs::read_to_string(&report_path).context("reading run report")?,
    )
    .context("parsing run report")?;
    assert_eq!(report.mapname, "dm3");
    assert_eq!(report.load.blocks, 5);
    assert_eq!(report.load.spawned, 3);
    assert_eq!(report.load.inhibited, 1);
    assert_eq!(report.load.missing_spawn.len(), 1);
    assert_eq!(report.load.missing_spawn[0].classname, "misc_explobox");
    assert_eq!(report.load.missing_spawn[0].edict, 36);
    assert_eq!(report.num_edicts, 37);
    assert!(report.live_handles > 0);
    assert_eq!(report.frames.len(), 4);
    assert!(report.frames.iter().all(|frame| frame.thinks == 1));
    assert!((report.final_time - 1.4).abs() < 1e-6);
    Ok(())
}

#[test]
fn frames_without_a_map_are_rejected() -> Result<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_qw_progs"))
        .args(["--frames", "2"])
        .output()
        .context("running qw_progs")?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--frames requires --map"), "{stderr}");
    Ok(())
}

#[test]
fn check_lists_defined_entry_points() -> Result<()> {
    let dir = tempdir().context("creating game dir")?;
    fs::write(
        dir.path().join("progs.lua"),
        "function main() end\nfunction StartFrame() end",
    )?;
    let output = Command::new(env!("CARGO_BIN_EXE_qw_progs"))
        .arg("--game-dir")
        .arg(dir.path())
        .args(["--progs", "progs.lua"])
        .output()
        .context("running qw_progs")?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Entry points defined: 2"), "{stdout}");
    assert!(stdout.contains("- StartFrame"), "{stdout}");
    Ok(())
}
