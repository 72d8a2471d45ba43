use clap::{Parser, Subcommand};
use resourcekit::cli::{self as prog_cli, OutputMode, Workspace};
use resourcekit::config::{self, AppConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "resourcekit",
    version,
    about = "Schema-aware resource access over NDJSON collections",
    long_about = None
)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). If omitted, the usual locations are searched.")]
    config: Option<PathBuf>,
    #[arg(long, help = "Schema file (TOML). Takes precedence over config/env.")]
    schema: Option<PathBuf>,
    #[arg(long, help = "Directory holding <collection>.ndjson files. Takes precedence over config/env.")]
    data_dir: Option<PathBuf>,
    #[arg(long, help = "Directory for app.log and audit.log; logging is off when unset")]
    log_dir: Option<PathBuf>,
    #[arg(long, help = "Log level: error|warn|info|debug|trace")]
    log_level: Option<String>,
    #[arg(long, help = "Pretty-print JSON output")]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Search a collection with key=value parameters (e.g. name=al __sort=-age __count)")]
    Search {
        collection: String,
        #[arg(help = "Filter and control parameters as key=value")]
        params: Vec<String>,
    },
    #[command(about = "Create a document from a JSON object")]
    Create {
        collection: String,
        json: String,
        #[arg(long, help = "Propagate references to related documents")]
        relate: bool,
        #[arg(long, conflicts_with = "relate", help = "Do not propagate references even if the config enables it")]
        no_relate: bool,
    },
    #[command(about = "Read a document by id")]
    Read {
        collection: String,
        id: String,
        #[arg(long, help = "Comma separated reference fields to populate")]
        populate: Option<String>,
    },
    #[command(about = "Merge a JSON object into the document with the given id")]
    Update { collection: String, id: String, json: String },
    #[command(about = "Delete a document by id")]
    Delete {
        collection: String,
        id: String,
        #[arg(long)]
        relate: bool,
        #[arg(long, conflicts_with = "relate")]
        no_relate: bool,
    },
    #[command(about = "List mutual relationships of a collection")]
    Relationships { collection: String },
    #[command(about = "Load an NDJSON file into a collection")]
    Import { collection: String, file: PathBuf },
    #[command(about = "Write a collection to an NDJSON file")]
    Export { collection: String, file: PathBuf },
    #[command(about = "List collections declared in the schema")]
    Collections,
    #[command(about = "Print operation counters")]
    Metrics,
}

fn relate_flag(relate: bool, no_relate: bool) -> Option<bool> {
    match (relate, no_relate) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn to_command(c: Commands) -> prog_cli::Command {
    use prog_cli::Command as C;
    match c {
        Commands::Search { collection, params } => C::Search { collection, params: prog_cli::parse_pairs(&params) },
        Commands::Create { collection, json, relate, no_relate } => {
            C::Create { collection, payload: json, relate: relate_flag(relate, no_relate) }
        }
        Commands::Read { collection, id, populate } => C::Read { collection, id, populate },
        Commands::Update { collection, id, json } => C::Update { collection, id, payload: json },
        Commands::Delete { collection, id, relate, no_relate } => {
            C::Delete { collection, id, relate: relate_flag(relate, no_relate) }
        }
        Commands::Relationships { collection } => C::Relationships { collection },
        Commands::Import { collection, file } => C::Import { collection, file },
        Commands::Export { collection, file } => C::Export { collection, file },
        Commands::Collections => C::Collections,
        Commands::Metrics => C::Metrics,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cli_cfg = AppConfig {
        schema_path: cli.schema.clone(),
        data_dir: cli.data_dir.clone(),
        log_dir: cli.log_dir.clone(),
        log_level: cli.log_level.clone(),
        ..AppConfig::default()
    };
    let cfg = match config::load(cli.config.as_deref()) {
        Ok(file_cfg) => cli_cfg.merge(file_cfg),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };
    if let Some(dir) = cfg.log_dir.as_deref()
        && let Err(e) = resourcekit::logger::configure_logging(Some(dir), cfg.log_level.as_deref(), cfg.log_retention)
    {
        eprintln!("warning: logging disabled: {e}");
    }
    let ws = match Workspace::open(&cfg, tokio::runtime::Handle::current()) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };
    let mode = if cli.pretty { OutputMode::Pretty } else { OutputMode::Json };
    match prog_cli::run(&ws, to_command(cli.command)).await {
        Ok(value) => println!("{}", prog_cli::render(&value, mode)),
        Err(e) => {
            let body = serde_json::json!({ "status": e.status(), "error": e.to_string() });
            eprintln!("{}", prog_cli::render(&body, mode));
            std::process::exit(1);
        }
    }
}
