mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, ConvertArgs, FormatsArgs};
use tracing::info;
use uuid::Uuid;

use convertbox::config::Config;
use convertbox::formats::{FormatRegistry, resolve_extension};
use convertbox::handlers::{Dispatcher, HandlerSet};
use convertbox::observability::init_tracing;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(&config.telemetry);

    match cli.command {
        Commands::Server(args) => convertbox::api::run(config, args.address).await?,
        Commands::Convert(args) => convert(config, args).await?,
        Commands::Formats(args) => formats(args),
    }

    Ok(())
}

async fn convert(config: Config, args: ConvertArgs) -> Result<(), AnyError> {
    let dispatcher = Dispatcher::new(
        Arc::new(FormatRegistry::builtin()),
        HandlerSet::from_config(&config.tools, config.storage.scratch_dir.as_deref()),
        config.conversion.job_timeout(),
    );

    let job_id = Uuid::new_v4().to_string();
    let report = dispatcher
        .convert_file(&job_id, &args.input, &args.output)
        .await?;

    info!(
        %job_id,
        category = %report.category,
        output_bytes = report.output_bytes,
        output = %args.output.display(),
        "Converted"
    );
    println!("{} ({} bytes)", args.output.display(), report.output_bytes);

    Ok(())
}

fn formats(args: FormatsArgs) {
    let registry = FormatRegistry::builtin();
    let input = resolve_extension(&registry, &args.filename);

    let targets = registry.allowed_targets(&input);
    if targets.is_empty() {
        println!("{}: no conversions available", display_ext(&input));
        return;
    }

    println!("{} ({})", display_ext(&input), FormatRegistry::format_name(&input));
    for (extension, category) in targets {
        println!(
            "  {:<8} {:<10} {}",
            extension,
            category.as_str(),
            FormatRegistry::format_name(&extension)
        );
    }
}

fn display_ext(ext: &str) -> &str {
    if ext.is_empty() { "(no extension)" } else { ext }
}
