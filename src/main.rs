//! Tracebin demo
//!
//! Bundles a trace into a dataset and serves a few sample queries against it.
//!
//! ```text
//! tracebin [trace.json | trace.csv]
//! ```
//!
//! Without an argument (or `TRACEBIN_INPUT`) a small synthetic trace is used.

use anyhow::Context;
use std::path::PathBuf;
use tracebin::{Config, IndexReader, IndexWriter, RangeQuery};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config = match std::env::var("TRACEBIN_CONFIG") {
        Ok(path) => Config::load_with_env(&PathBuf::from(&path))
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::load_default(),
    };
    init_logging(&config);

    tracing::info!("Tracebin v{}", env!("CARGO_PKG_VERSION"));
    config.validate().context("invalid configuration")?;

    let input = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TRACEBIN_INPUT").ok())
        .map(PathBuf::from);

    let mut writer = IndexWriter::new(&config);
    match &input {
        Some(path) => {
            let stats = tracebin::import::import_file(path, &mut writer)
                .with_context(|| format!("importing {}", path.display()))?;
            if stats.failed > 0 {
                for error in &stats.errors {
                    tracing::warn!("{}", error);
                }
            }
        }
        None => demo_trace(&mut writer),
    }

    let summary = writer.build().context("building index")?;
    tracing::info!(
        dataset = %summary.dataset_dir.display(),
        intervals = summary.intervals,
        nodes = summary.nodes_written,
        "Dataset ready"
    );

    let reader = IndexReader::open(&config).context("opening index")?;
    demo_queries(&reader)?;
    reader.close();

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tracebin={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Four tracks of alternating compute and communication phases
fn demo_trace(writer: &mut IndexWriter) {
    tracing::info!("No trace given, generating demo data");

    let mut next_id = 0u64;
    for track in 0..4 {
        let name = format!("rank{}", track);
        let mut t = (track * 3) as f64;
        for step in 0..256 {
            let compute = 40.0 + ((step * 7 + track * 13) % 23) as f64;
            let comm = 5.0 + ((step * 11 + track) % 7) as f64;

            writer.insert(&name, t, t + compute, "compute", &format!("e{}", next_id));
            writer.insert(&name, t + compute, t + compute + comm, "mpi_send", &format!("e{}", next_id + 1));
            next_id += 2;
            t += compute + comm + 2.0;
        }
    }
}

fn demo_queries(reader: &IndexReader) -> anyhow::Result<()> {
    let Some(first) = reader.track_names().first().cloned() else {
        tracing::warn!("Dataset has no tracks");
        return Ok(());
    };

    // Overview, then zoom in twice around the same spot
    for (begin, end) in [(0.0, 16_000.0), (4_000.0, 6_000.0), (4_800.0, 5_000.0)] {
        let (coverage, stats) = reader.range_query_with_stats(&RangeQuery::new(begin, end, 16))?;
        let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len().max(1) as f64;
        for (track, values) in &coverage {
            tracing::info!(track = %track, begin, end, coverage = mean(values), "Window");
        }
        tracing::info!(
            visited = stats.nodes_visited,
            loaded = stats.nodes_loaded,
            "Query cost"
        );
    }

    let filtered = reader.range_query(
        &RangeQuery::new(0.0, 16_000.0, 16)
            .with_tracks([first.as_str()])
            .with_filter("primitive", "mpi_send"),
    )?;
    tracing::info!(track = %first, bins = ?filtered.get(&first), "Communication only");

    match reader.nearest_event(4_900.0, &first) {
        Some(id) => tracing::info!(track = %first, time = 4_900.0, id = %id, "Nearest event"),
        None => tracing::info!(track = %first, time = 4_900.0, "No event at cursor"),
    }

    Ok(())
}
