use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use imageprogress::config::DEFAULT_STABILIZATION_THRESHOLD;
use imageprogress::{
    phases_changed, pull_reporter, push_reporter, run_detached, Aggregator, AggregatorConfig,
    ProgressWriter, Report,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// `Pulled n/m layers, p% complete`
    Pull,
    /// `Pushed n/m layers, p% complete`
    Push,
    /// Every emitted report as-is
    Raw,
}

/// Summarize a container runtime's JSON progress stream.
#[derive(Debug, Parser)]
#[command(name = "imageprogress", version)]
struct Cli {
    /// How reports are rendered
    #[arg(long, value_enum, default_value_t = Mode::Pull)]
    mode: Mode,

    /// Consecutive stable layer counts required before reporting
    #[arg(long, env = "IMAGEPROGRESS_STABLE_THRESHOLD", default_value_t = DEFAULT_STABILIZATION_THRESHOLD)]
    stable_threshold: usize,

    /// Maximum silence between reports, e.g. `30s` or `1m`
    #[arg(long, env = "IMAGEPROGRESS_HEARTBEAT", default_value = "30s", value_parser = humantime::parse_duration)]
    heartbeat: Duration,

    /// Recorded progress stream; reads stdin when omitted
    file: Option<PathBuf>,
}

type Sink = Box<dyn FnMut(&Report) + Send>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AggregatorConfig::new()
        .stabilization_threshold(cli.stable_threshold)
        .heartbeat_interval(cli.heartbeat);

    let bar = io::stderr().is_terminal().then(spinner);
    let sink = build_sink(cli.mode, bar.clone());

    let result = match cli.file {
        Some(path) => {
            info!(path = %path.display(), "reading progress stream");
            let file = File::open(&path)?;
            run_detached(Aggregator::new(config, sink, phases_changed), file).await
        }
        None => {
            tokio::task::spawn_blocking(move || pipe_stdin(config, sink))
                .await
                .map_err(|e| format!("stdin task panicked: {}", e))?
        }
    };

    match (&result, bar) {
        (Ok(()), Some(bar)) => bar.finish(),
        (Err(_), Some(bar)) => bar.abandon(),
        _ => {}
    }
    if let Err(e) = &result {
        error!(error = %e, "progress stream failed");
    }
    Ok(result?)
}

/// Copy stdin through a [`ProgressWriter`], the way a runtime's output
/// would be piped into it.
fn pipe_stdin(config: AggregatorConfig, sink: Sink) -> imageprogress::Result<()> {
    let mut writer = ProgressWriter::spawn(config, sink, phases_changed)?;
    let copied = io::copy(&mut io::stdin().lock(), &mut writer).and_then(|_| writer.flush());
    // A broken pipe means the reader already stopped; its error is the
    // interesting one.
    let finished = writer.finish();
    match copied {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => finished.and(Err(e.into())),
        _ => finished,
    }
}

fn build_sink(mode: Mode, bar: Option<ProgressBar>) -> Sink {
    let print = move |line: String| match &bar {
        Some(bar) => bar.set_message(line),
        None => {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", line);
        }
    };
    match mode {
        Mode::Pull => Box::new(pull_reporter(print)),
        Mode::Push => Box::new(push_reporter(print)),
        Mode::Raw => {
            let mut print = print;
            Box::new(move |report: &Report| print(report.to_string()))
        }
    }
}

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
