use anyhow::{Context, Result};
use catnapper::{Catnapper, Settings};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "catnapper",
    about = "Combine a user's RSS sources into one feed"
)]
struct Args {
    /// Settings file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", default_value = "catnapper.toml")]
    config: PathBuf,

    /// Directory of per-user JSON configurations (overrides the settings file)
    #[arg(long, value_name = "DIR")]
    feeds_dir: Option<PathBuf>,

    /// Identifier of the configuration to combine
    identifier: String,

    /// Address the combined feed is published at
    #[arg(long, value_name = "URL", default_value = "http://localhost/")]
    link: String,

    /// Replace the configuration's URLs with this JSON array instead of combining
    #[arg(long, value_name = "JSON")]
    set_urls: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the document.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("Failed to load settings from '{}'", args.config.display()))?;
    if let Some(dir) = args.feeds_dir {
        settings.feeds_dir = dir;
    }

    let app = Catnapper::start(settings).context("Failed to start")?;

    let Some(configuration) = app.lookup_configuration(&args.identifier) else {
        eprintln!(
            "Error: no configuration with identifier '{}' in {}",
            args.identifier,
            app.settings().feeds_dir.display()
        );
        app.stop();
        std::process::exit(1);
    };

    if let Some(raw) = args.set_urls {
        let update = app
            .persist_new_urls(configuration.identifier(), &raw)
            .context("Failed to save URLs")?;
        app.stop();
        if update.is_saved() {
            println!("{}", update.text());
            return Ok(());
        }
        eprintln!("Rejected, input returned unchanged:");
        println!("{}", update.text());
        std::process::exit(2);
    }

    let stdout = std::io::stdout().lock();
    let mut stdout = app
        .combine_into(stdout, &configuration, &args.link)
        .await
        .context("Failed to write combined feed")?;
    writeln!(stdout)?;

    app.stop();
    Ok(())
}
