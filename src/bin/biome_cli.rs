use biome::{
    assembly::Assembly,
    manifest::{Manifest, parse_sep},
    survey::Survey,
};
use biome_protocol::EssentialKind;
use serde::Serialize;
use std::{env, path::Path, rc::Rc};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct AssemblySummary {
    name: Option<String>,
    kinds: Vec<EssentialKind>,
    feature_count: Option<usize>,
    sample_count: Option<usize>,
}

#[derive(Serialize)]
struct MergeSummary {
    assemblies: usize,
    feature_count: Option<usize>,
    sample_count: Option<usize>,
    metadata: serde_json::Value,
    written: Vec<String>,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  biome_cli --version\n  \
  biome_cli summary MANIFEST.json\n  \
  biome_cli merge MANIFEST.json OUTPUT_DIR [--otu-table] [--prefix PREFIX]\n  \
  biome_cli otu-table MANIFEST.json INDEX OUTPUT.csv\n\n  \
  Set RUST_LOG=info to follow merging and exports"
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn summarize(assembly: &Assembly) -> AssemblySummary {
    AssemblySummary {
        name: assembly.name().map(str::to_string),
        kinds: assembly.controller().kinds(),
        feature_count: assembly.feature_ids().map(<[_]>::len),
        sample_count: assembly.sample_ids().map(<[_]>::len),
    }
}

fn load_assemblies(path: &str) -> Result<(Manifest, Vec<Assembly>), String> {
    let manifest = Manifest::load_from_path(path).map_err(|e| e.to_string())?;
    let assemblies = manifest.load_assemblies().map_err(|e| e.to_string())?;
    Ok((manifest, assemblies))
}

fn option_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|idx| args.get(idx + 1))
        .cloned()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let command = &args[1];
    match command.as_str() {
        "summary" => {
            if args.len() <= 2 {
                usage();
                return Err("Missing manifest path".to_string());
            }
            let (_, assemblies) = load_assemblies(&args[2])?;
            let summaries: Vec<AssemblySummary> = assemblies.iter().map(summarize).collect();
            print_json(&summaries)
        }
        "merge" => {
            if args.len() <= 3 {
                usage();
                return Err("merge requires: MANIFEST.json OUTPUT_DIR".to_string());
            }
            let output = Path::new(&args[3]);
            let as_otu_table = args.iter().any(|a| a == "--otu-table");
            let prefix = option_value(&args, "--prefix").unwrap_or_default();

            let (manifest, assemblies) = load_assemblies(&args[2])?;
            let count = assemblies.len();
            let sources = assemblies.into_iter().map(Rc::new).collect();
            let survey = Survey::new(sources, manifest.merge.clone()).map_err(|e| e.to_string())?;
            let sep = parse_sep(&manifest.sep).map_err(|e| e.to_string())?;
            let written = survey
                .to_assembly()
                .and_then(|merged| merged.export(output, &prefix, as_otu_table, sep))
                .map_err(|e| e.to_string())?;
            print_json(&MergeSummary {
                assemblies: count,
                feature_count: survey.feature_ids().map(<[_]>::len),
                sample_count: survey.sample_ids().map(<[_]>::len),
                metadata: serde_json::Value::from(serde_json::Map::from_iter(survey.metadata.clone())),
                written: written.iter().map(|p| p.display().to_string()).collect(),
            })
        }
        "otu-table" => {
            if args.len() <= 4 {
                usage();
                return Err("otu-table requires: MANIFEST.json INDEX OUTPUT.csv".to_string());
            }
            let index: usize = args[3]
                .parse()
                .map_err(|_| format!("Invalid assembly index '{}'", args[3]))?;
            let output = &args[4];
            let (manifest, assemblies) = load_assemblies(&args[2])?;
            let assembly = assemblies.get(index).ok_or_else(|| {
                format!("Assembly index {index} out of range ({} assemblies)", assemblies.len())
            })?;
            let sep = parse_sep(&manifest.sep).map_err(|e| e.to_string())?;
            assembly
                .write_otu_table(Path::new(output), sep)
                .map_err(|e| e.to_string())?;
            println!("Wrote OTU table of assembly {index} to '{output}'");
            Ok(())
        }
        _ => {
            usage();
            Err(format!("Unknown command '{command}'"))
        }
    }
}
