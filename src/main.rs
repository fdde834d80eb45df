use log::{error, info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use rust_manga_tracker::config::{build_fetcher, Config};
use rust_manga_tracker::db::SqliteStore;
use rust_manga_tracker::descriptor::DescriptorSet;
use rust_manga_tracker::engine::{SweepKind, UpdateEngine};
use rust_manga_tracker::error::ScanError;
use rust_manga_tracker::notify::LogNotifier;
use rust_manga_tracker::registry::ScanlatorRegistry;
use rust_manga_tracker::scheduler::{self, Schedule};
use std::sync::Arc;

const USAGE: &str = "usage: rust_manga_tracker [run | sweep [full] | track <url> | search <query> | sources]";

fn init_logging(config: &Config) {
    if let Err(e) = log4rs::init_file(&config.log_config, Default::default()) {
        let stdout = ConsoleAppender::builder().build();
        let fallback = log4rs::config::Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));
        if let Ok(fallback) = fallback {
            let _ = log4rs::init_config(fallback);
        }
        log::warn!("Could not load {}: {}, logging to stdout", config.log_config.display(), e);
    }
}

fn build_engine(config: &Config) -> Result<UpdateEngine, ScanError> {
    let descriptors = DescriptorSet::load(&config.descriptors_path)?;
    let fetcher = Arc::new(build_fetcher(config)?);
    let registry = ScanlatorRegistry::from_descriptors(&descriptors, fetcher)?;
    for name in config.disabled_sources() {
        if registry.disable(name) {
            info!("[{}] Disabled by configuration", name);
        }
    }
    let store = SqliteStore::open(&config.database_path)?;
    info!(
        "{} of {} scanlators enabled, catalog at {}",
        registry.all_enabled().len(),
        registry.len(),
        config.database_path.display()
    );
    Ok(UpdateEngine::new(
        Arc::new(registry),
        Arc::new(store),
        Arc::new(LogNotifier),
        config.engine_settings(),
    ))
}

async fn run(config: &Config, engine: UpdateEngine) -> Result<(), ScanError> {
    let engine = Arc::new(engine);
    let schedule = Schedule::from_config(&config.scheduler, &engine);
    let handles = scheduler::spawn(engine, schedule);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn dispatch(config: &Config, engine: UpdateEngine, args: &[String]) -> Result<(), ScanError> {
    match args.first().map(String::as_str) {
        None | Some("run") => run(config, engine).await,
        Some("sweep") => {
            let kind = match args.get(1).map(String::as_str) {
                Some("full") => SweepKind::Full,
                _ => SweepKind::FrontPage,
            };
            let report = engine.run_sweep(kind).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some("track") => {
            let url = args.get(1).ok_or_else(|| ScanError::configuration("cli", USAGE))?;
            let series = engine.track(url).await?;
            println!(
                "{} [{}] {} chapters, {}",
                series.title,
                series.key,
                series.chapters.len(),
                series.status
            );
            Ok(())
        }
        Some("search") => {
            let query = args[1..].join(" ");
            if query.is_empty() {
                return Err(ScanError::configuration("cli", USAGE));
            }
            for found in engine.search(&query).await {
                println!("{:<16} {}  {}", found.key.source, found.title, found.url);
            }
            Ok(())
        }
        Some("sources") => {
            let registry = engine.registry();
            for name in registry.names() {
                let state = if registry.is_enabled(&name) { "enabled" } else { "disabled" };
                println!("{:<16} {}", name, state);
            }
            Ok(())
        }
        Some(_) => Err(ScanError::configuration("cli", USAGE)),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::load();
    init_logging(&config);

    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = dispatch(&config, engine, &args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
