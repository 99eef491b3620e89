//! FlowPilot CLI Entry Point
//!
//! Previews how a graph would run without touching a browser, and reports
//! on runs persisted under the configured state directory.
//!
//! # Usage
//!
//! ```bash
//! # Show execution layers and estimated cost
//! flowpilot price-alert.yaml
//!
//! # With an engine configuration file
//! flowpilot price-alert.yaml --config flowpilot.yaml
//!
//! # Status and timeline of a persisted run
//! flowpilot --status 3f2a... --config flowpilot.yaml
//! ```

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use flowpilot::engine::{
    CostTable, ExecutionTimeline, HandlerRegistry, JsonFileStore, RunStore, StepStatus,
};
use flowpilot::graph::{execution_layers, load_graph, GraphDefinition};
use flowpilot::{EngineConfig, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    graph_path: Option<String>,
    config_path: Option<String>,
    status_run: Option<String>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Automation Graph Execution Engine");
    println!();
}

fn print_usage() {
    println!("Usage: flowpilot [OPTIONS] <GRAPH_FILE>");
    println!("       flowpilot [OPTIONS] --status <RUN_ID>");
    println!();
    println!("Arguments:");
    println!("  <GRAPH_FILE>        Path to a graph definition (YAML or JSON)");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration file (YAML)");
    println!("  --status RUN_ID     Show a persisted run and its timeline");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowpilot price-alert.yaml");
    println!("  flowpilot price-alert.json --config flowpilot.yaml");
    println!("  flowpilot --status 3f2a9c1e-... --config flowpilot.yaml");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                config.config_path = Some(args[i].clone());
            }
            "--status" => {
                i += 1;
                if i >= args.len() {
                    return Err("--status requires a run ID".to_string());
                }
                config.status_run = Some(args[i].clone());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.graph_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.graph_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.graph_path.is_none() && config.status_run.is_none() {
        return Err("Missing <GRAPH_FILE> argument".to_string());
    }
    Ok(config)
}

/// Prints one line per batch and node, with per-node cost.
fn print_plan(graph: &GraphDefinition, layers: &[Vec<String>], costs: &CostTable) {
    let registry = HandlerRegistry::with_builtins();

    println!("{}", "Execution plan:".bold());
    for (index, layer) in layers.iter().enumerate() {
        println!();
        println!("  Batch {} ({} steps)", index + 1, layer.len());

        for node_id in layer {
            let Some(node) = graph.get_node(node_id) else {
                continue;
            };
            let cost = costs.cost_or_zero(&node.node_type);
            let marker = if registry.contains(&node.node_type) {
                "+".green()
            } else {
                "?".yellow()
            };
            println!(
                "    {} {:<24} {:<28} {:>3} units",
                marker, node.id, node.node_type, cost
            );

            let gates: Vec<String> = graph
                .edge_conditions_of(&node.id)
                .iter()
                .map(|(dep, label)| format!("{} = {}", dep, label))
                .collect();
            if !gates.is_empty() {
                println!("      {} {}", "only if".dimmed(), gates.join(", "));
            }
        }
    }
    println!();
}

/// Prints a persisted run: status, per-step results and a Gantt chart.
fn print_status(
    engine_config: &EngineConfig,
    run_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonFileStore::new(engine_config.runs_dir());
    info!("Reading run state from {}", store.dir().display());

    let runtime = tokio::runtime::Runtime::new()?;
    let (run, steps) = runtime.block_on(async {
        let run = store.load_run(run_id).await?;
        let steps = store.load_steps(run_id).await?;
        Ok::<_, flowpilot::engine::StoreError>((run, steps))
    })?;

    println!("{} {} ({})", "Run".bold(), run.id, run.status);
    println!("  User: {}", run.user_id);
    println!("  Credits consumed: {}", run.credits_consumed);
    println!();

    for step in &steps {
        let marker = match step.status {
            StepStatus::Completed => "+".green(),
            StepStatus::Failed => "x".red(),
            StepStatus::Waiting => "~".yellow(),
            _ => "-".dimmed(),
        };
        println!(
            "    {} {:<24} {:<28} {}",
            marker, step.node_id, step.node_type, step.status
        );
        if let Some(error) = &step.error {
            println!("      {}", error.red());
        }
        if let Some(reason) = &step.pause_reason {
            println!("      {}", reason.message.yellow());
        }
    }

    print!("{}", ExecutionTimeline::from_steps(&steps).gantt_chart());
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine_config = match &config.config_path {
        Some(path) => {
            info!("Configuration: {}", path);
            EngineConfig::load(path)?
        }
        None => EngineConfig::default(),
    };

    if let Some(run_id) = &config.status_run {
        return print_status(&engine_config, run_id);
    }

    let graph_path = config.graph_path.unwrap_or_default();
    info!("Loading graph: {}", graph_path);
    let graph = load_graph(&graph_path).map_err(|e| {
        error!("Failed to load graph: {}", e);
        format!("Could not load graph from '{}': {}", graph_path, e)
    })?;
    info!(
        "Graph loaded: {} nodes, {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );

    let layers = execution_layers(&graph).ok_or("Graph contains a dependency cycle")?;
    let costs = CostTable::default();
    print_plan(&graph, &layers, &costs);

    for node in &graph.nodes {
        if !costs.contains(&node.node_type) {
            warn!(
                "Node '{}' has unknown type '{}' and will fail at run time",
                node.id, node.node_type
            );
        }
    }

    println!(
        "{} {} units across {} batches (upper bound; skipped branches are not charged)",
        "Estimated cost:".bold(),
        costs.estimate(&graph),
        layers.len()
    );

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
