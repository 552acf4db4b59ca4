use std::env::var;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` selects the filter, `RUST_LOG_FORMAT=json` switches console
/// output to JSON, and `LOG_FILE` appends a plain-text copy of the log to
/// the given path.
pub fn init_tracing() {
    initialize_tracing(LevelFilter::INFO);
}

fn initialize_tracing(level: LevelFilter) {
    // EnvFilter is not Clone, so each layer builds its own.
    let env_filter = || EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let console_layer = match var("RUST_LOG_FORMAT").unwrap_or_default().as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter()).boxed(),
        _ => tracing_subscriber::fmt::layer().compact().with_filter(env_filter()).boxed(),
    };

    let file_layer = var("LOG_FILE").ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            // The subscriber is not up yet, so this cannot be a tracing event.
            .inspect_err(|error| eprintln!("failed to open LOG_FILE {path}: {error}"))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(env_filter())
                    .boxed()
            })
    });

    tracing_subscriber::registry().with(console_layer).with(file_layer).init();
}
