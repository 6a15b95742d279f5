use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use qw_formats::{EntityBlock, FieldValue, parse_blocks};
use serde::Serialize;

/// Parse an entity (.ent) file and print its blocks as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the entity text to inspect
    path: PathBuf,

    /// Print the raw string values instead of the inferred value types
    #[arg(long)]
    raw: bool,
}

#[derive(Serialize)]
struct TypedPair<'a> {
    key: &'a str,
    value: FieldValue,
}

#[derive(Serialize)]
struct TypedBlock<'a> {
    index: usize,
    pairs: Vec<TypedPair<'a>>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let text = fs::read_to_string(&args.path)
        .with_context(|| format!("reading entity text {}", args.path.display()))?;
    let blocks =
        parse_blocks(&text).with_context(|| format!("parsing {}", args.path.display()))?;

    let json = if args.raw {
        serde_json::to_string_pretty(&blocks)?
    } else {
        serde_json::to_string_pretty(&typed_blocks(&blocks))?
    };
    println!("{json}");
    eprintln!(
        "{} blocks, {} empty",
        blocks.len(),
        blocks.iter().filter(|block| block.is_empty()).count()
    );
    Ok(())
}

fn typed_blocks(blocks: &[EntityBlock]) -> Vec<TypedBlock<'_>> {
    blocks
        .iter()
        .enumerate()
        .map(|(index, block)| TypedBlock {
            index,
            pairs: block
                .pairs
                .iter()
                .map(|pair| TypedPair {
                    key: pair.key.as_str(),
                    value: FieldValue::infer(&pair.value),
                })
                .collect(),
        })
        .collect()
}
