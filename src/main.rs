use std::{env, path::PathBuf, process};

use anyhow::Context;
use gltf_vtree::{
    import::import_scene,
    memory::MemoryScene,
    options::{ImportOptions, load_import_options},
    source::SourceGraph,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: gltf-vtree <input.gltf|input.glb> [options.json]");
        process::exit(2);
    }

    let input = PathBuf::from(&args[1]);
    let options = match args.get(2) {
        Some(path) => load_import_options(&PathBuf::from(path))?,
        None => ImportOptions::default(),
    };

    let graph = SourceGraph::open(&input)?;
    let mut scene = MemoryScene::new();
    let report = import_scene(&graph, &mut scene, &options)
        .with_context(|| format!("failed to import {}", input.display()))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize import report")?
    );
    Ok(())
}
