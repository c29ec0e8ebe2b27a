mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use anystream_av::{FfprobeProber, Prober, ToolRegistry};
use anystream_core::config::Config;
use anystream_core::events::EventBus;
use anystream_core::StreamKind;
use anystream_server::importer::{ImportResult, MediaImporter};
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the verbose flag picks the defaults.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "anystream=trace,anystream_server=trace,anystream_av=debug,anystream_db=debug,tower_http=debug".to_string()
        } else {
            "anystream=debug,anystream_server=debug,anystream_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config = Config::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(anystream_server::start(config))?;
            Ok(())
        }
        Commands::Import { path } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(import_dir(config, &path))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&config, &file, json))
        }
        Commands::CheckTools => check_tools(&config),
        Commands::Validate => validate_config(cli.config.as_deref(), &config),
        Commands::Version => {
            println!("anystream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn import_dir(config: Config, root: &Path) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Import path does not exist: {}", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("Import path is not a directory: {}", root.display());
    }

    if let Some(parent) = config.server.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = anystream_db::pool::init_pool(&config.server.db_path.to_string_lossy())?;
    let tools = ToolRegistry::discover(&config.tools);
    let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::from_registry(&tools)?);
    let importer = Arc::new(MediaImporter::new(
        db,
        prober,
        config.import.clone(),
        Arc::new(EventBus::new(config.events.capacity)),
        CancellationToken::new(),
    ));

    let summary = importer.import_all(root).await;
    for result in &summary.results {
        match result {
            ImportResult::Success {
                path,
                created_content,
                ..
            } => {
                let tag = if *created_content { "new" } else { "matched" };
                println!("+ {} ({tag})", path.display());
            }
            ImportResult::Skipped { path, reason } => {
                println!("- {} ({reason})", path.display());
            }
            ImportResult::Failed { path, error } => {
                println!("! {}: {error}", path.display());
            }
        }
    }
    println!(
        "\nImported {}, skipped {}, failed {}",
        summary.imported, summary.skipped, summary.failed
    );
    Ok(())
}

async fn probe_file(config: &Config, file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let prober = FfprobeProber::from_registry(&tools)?;
    let info = prober.probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", info.container.as_deref().unwrap_or("unknown"));
    if let Some(duration) = info.duration_secs {
        let secs = duration as u64;
        println!(
            "Duration: {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
    }

    for kind in [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle] {
        println!("\n{kind} streams: {}", info.count(kind));
        for stream in info.streams.iter().filter(|s| s.kind == kind) {
            print!("  [{}] {}", stream.index, stream.codec);
            if let (Some(w), Some(h)) = (stream.width, stream.height) {
                print!(" {w}x{h}");
            }
            if let Some(channels) = stream.channels {
                print!(" {channels}ch");
            }
            if let Some(ref lang) = stream.language {
                print!(" ({lang})");
            }
            if stream.default {
                print!(" [default]");
            }
            if stream.forced {
                print!(" [forced]");
            }
            println!();
        }
    }

    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Streaming and import need both ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>, config: &Config) -> Result<()> {
    match path {
        Some(p) => {
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config {}", p.display()))?;
            Config::from_json(&contents)?;
            println!("Validating config: {:?}", p);
        }
        None => println!("No config file specified, using defaults"),
    }

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.server.db_path.display());
    println!("  Auth enabled: {}", config.auth.enabled);
    println!("  Data dir: {}", config.streaming.data_dir.display());

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in warnings {
            println!("! {warning}");
        }
    }

    Ok(())
}
