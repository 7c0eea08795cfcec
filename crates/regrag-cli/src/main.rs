//! regrag — department-scoped graph retrieval over regulation documents.

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use regrag_core::config::resolve_data_dir;
use regrag_core::{DataPaths, EngineConfig};
use regrag_department::{CallerMetadata, DepartmentGraphManager, QueryEngine};

mod commands;

fn print_help() {
    println!("regrag — graph-routed retrieval over department documents");
    println!();
    println!("Usage: regrag <command>");
    println!();
    println!("Commands:");
    println!("  build <chunks.jsonl> [data-dir]   Build and save one graph per department");
    println!("  query <text> [options]            Answer a query from the saved graphs");
    println!("      --department D                Caller's declared department");
    println!("      --role R                      Caller's role (admin reads everything)");
    println!("      --k N                         Number of chunks to return");
    println!("  validate [data-dir]               Check every saved graph file");
    println!("  help                              Show this help message");
    println!();
    println!("The data directory defaults to $REGRAG_DATA_DIR, then ./data.");
}

fn engine_for(data_dir: PathBuf, k: Option<usize>) -> anyhow::Result<QueryEngine> {
    info!("Data directory: {}", data_dir.display());
    let paths = DataPaths::new(&data_dir)?;
    let mut config = EngineConfig::load(&paths.config_file);
    if let Some(k) = k {
        config.retrieval.k = k;
    }
    let embedder = regrag_infer::create_embedder(&config.providers);
    let generator = regrag_infer::create_generator(&config.providers);
    Ok(QueryEngine::new(config, paths, embedder, generator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "build" => {
            if args.len() < 3 {
                eprintln!("Usage: regrag build <chunks.jsonl> [data-dir]");
                std::process::exit(1);
            }
            let chunks = commands::read_chunks(&PathBuf::from(&args[2]))?;
            let data_dir = args.get(3).map(PathBuf::from).unwrap_or_else(resolve_data_dir);
            let engine = engine_for(data_dir, None)?;

            let groups = DepartmentGraphManager::group_by_department(chunks);
            let built = engine.manager().build_all(groups).await;
            if built.is_empty() {
                eprintln!("No department graph was built.");
                std::process::exit(1);
            }
            for (department, nodes) in &built {
                println!("{:<20} {} nodes", department, nodes);
            }
        }
        "query" => {
            let query = match commands::parse_query_args(&args[2..]) {
                Ok(q) => q,
                Err(e) => {
                    eprintln!("{}", e);
                    eprintln!("Usage: regrag query <text> [--department D] [--role R] [--k N]");
                    std::process::exit(1);
                }
            };
            let engine = engine_for(resolve_data_dir(), query.k)?;
            if !engine.load() {
                eprintln!("No department graphs loaded. Run 'regrag build' first.");
                std::process::exit(1);
            }

            let caller = CallerMetadata::new(query.department.as_deref(), query.role.as_deref());
            let answer = engine.answer_with_synthesis(&query.text, &caller).await;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        "--validate" | "validate" => {
            let data_dir = args.get(2).map(PathBuf::from).unwrap_or_else(resolve_data_dir);
            let paths = DataPaths::new(&data_dir)?;
            let report = commands::validate(&paths.graphs);
            commands::print_report(&report);
            std::process::exit(if report.is_valid() { 0 } else { 1 });
        }
        "--help" | "-h" | "help" => print_help(),
        _ => {
            eprintln!("Unknown command: {}. Use 'regrag help' for usage.", command);
            std::process::exit(1);
        }
    }

    Ok(())
}
