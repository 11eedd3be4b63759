mod output;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use miette::Result;
use parking_lot::Mutex;
use skyglass_core::config::{self};
use skyglass_core::{
    DecodeMode, FirehoseConnector, GalleryConfig, LayoutMode, NsfwMode, Store,
};
use tracing::info;

use crate::output::Output;
use crate::render::{Flow, TerminalRenderer};

#[derive(Parser, Debug)]
#[command(name = "skyglass")]
#[command(about = "Live image gallery over the Bluesky firehose")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Firehose endpoint (overrides config)
    #[arg(long)]
    endpoint: Option<String>,

    /// Frame format: envelope (Jetstream JSON) or block (CAR)
    #[arg(long)]
    mode: Option<DecodeMode>,

    /// Only show posts whose text, author or alt text contain this
    #[arg(long)]
    search: Option<String>,

    /// Sensitive image handling: hidden, blurred or shown
    #[arg(long)]
    nsfw: Option<NsfwMode>,

    /// Eviction quantum for the post store
    #[arg(long)]
    columns: Option<usize>,

    /// Stop after this many posts have been shown
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Apply command line overrides on top of loaded configuration
    fn apply(&self, config: &mut GalleryConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.firehose.endpoint = endpoint.clone();
        }
        if let Some(mode) = self.mode {
            config.firehose.mode = mode;
        }
        if let Some(search) = &self.search {
            config.filter.search_text = search.clone();
        }
        if let Some(nsfw) = self.nsfw {
            config.filter.nsfw_mode = nsfw;
        }
        if let Some(columns) = self.columns {
            config.store.column_count = columns;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    use tracing_subscriber::{
        fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    };

    // RUST_LOG wins over the built-in defaults
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("skyglass_core=debug,skyglass_cli=debug,info")
        } else {
            EnvFilter::new("skyglass_core=info,skyglass_cli=info,warn")
        }
    });

    // Logs go to stderr so they don't interleave with the gallery on stdout
    let terminal_layer = if cli.debug {
        fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .pretty()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(terminal_layer.with_filter(env_filter))
        .init();

    let output = Output::new();

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading config from: {:?}", config_path);
        config::load_config(config_path).await?
    } else {
        config::load_config_from_standard_locations().await?
    };
    cli.apply(&mut config);
    config.store.validate()?;

    let store = Store::new(config.store.clone())?
        .with_filter(config.filter.clone())
        .with_layout(config.layout);
    let store = Arc::new(Mutex::new(store));

    let (subscription, mut events) = render::attach(&store);
    let connector = FirehoseConnector::spawn(config.firehose.clone(), Arc::clone(&store))?;

    output.section("Skyglass");
    output.kv("endpoint", connector.url().as_str());
    output.kv("mode", &format!("{:?}", connector.mode()).to_lowercase());
    output.kv("nsfw", &format!("{:?}", config.filter.nsfw_mode).to_lowercase());
    if !config.filter.search_text.is_empty() {
        output.kv("search", &config.filter.search_text);
    }
    if config.layout != LayoutMode::default() {
        output.kv("layout", &format!("{:?}", config.layout).to_lowercase());
    }
    output.print("");

    connector.connect();

    let mut renderer = TerminalRenderer::new(output, cli.limit);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let flow = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Flow::Continue;
                };
                match renderer.render(&event) {
                    Flow::Continue => {}
                    done => break done,
                }
            }
            _ = &mut ctrl_c => {
                output.print("");
                output.status("Interrupted, disconnecting");
                break Flow::Continue;
            }
        }
    };

    store.lock().unsubscribe(subscription);
    connector.disconnect();
    connector.shutdown().await;

    let stats = connector.stats();
    output.section("Summary");
    output.kv("frames", &stats.frames_received.to_string());
    output.kv("stored", &stats.posts_stored.to_string());
    output.kv("dropped", &stats.posts_dropped.to_string());
    output.kv("shown", &renderer.rendered().to_string());
    match flow {
        Flow::LimitReached => output.success("Post limit reached"),
        Flow::GaveUp => output.warning("Stopped after exhausting reconnect attempts"),
        Flow::Continue => output.success("Disconnected"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::parse_from([
            "skyglass",
            "--endpoint",
            "jetstream1.us-west.bsky.network",
            "--mode",
            "block",
            "--search",
            "cats",
            "--nsfw",
            "hidden",
            "--columns",
            "1",
            "-n",
            "25",
        ]);
        let mut config = GalleryConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.firehose.endpoint, "jetstream1.us-west.bsky.network");
        assert_eq!(config.firehose.mode, DecodeMode::Block);
        assert_eq!(config.filter.search_text, "cats");
        assert_eq!(config.filter.nsfw_mode, NsfwMode::Hidden);
        assert_eq!(config.store.column_count, 1);
        assert_eq!(cli.limit, Some(25));
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::parse_from(["skyglass"]);
        let mut config = GalleryConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, GalleryConfig::default());
        assert!(!cli.debug);
    }

    #[test]
    fn test_unknown_nsfw_mode_rejected() {
        assert!(Cli::try_parse_from(["skyglass", "--nsfw", "sometimes"]).is_err());
    }
}
