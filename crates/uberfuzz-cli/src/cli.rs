use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uberfuzz::{ScorerChoice, Supervisor, SupervisorConfig};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ScorerKind {
    Length,
    Trace,
}

#[derive(Debug, clap::Parser)]
#[command(version, about, styles = clap::builder::Styles::styled())]
pub struct Cli {
    /// Path to the target binary, instrumented for the mutational engine.
    binary: PathBuf,

    #[clap(long, default_value = "uberfuzz-work")]
    work_dir: PathBuf,

    /// Path materialized with each scored testcase, for targets that read their input from a
    /// file rather than standard input.
    #[clap(long)]
    reads_file: Option<PathBuf>,

    /// Extra arguments passed to the target after its own invocation, comma-separated.
    #[clap(long, value_delimiter = ',')]
    extra_opts: Vec<String>,

    #[clap(long = "mutational-path", visible_alias = "aflfast-path", env = "AFLFAST_PATH")]
    mutational_path: Option<PathBuf>,

    #[clap(long, env = "UBERFUZZ_ASSISTED_PATH")]
    assisted_path: Option<PathBuf>,

    /// Seconds between pollination cycles.
    #[clap(long, default_value_t = 600)]
    pollenation_interval: u64,

    /// Seconds between status log lines. Disabled if omitted.
    #[clap(long)]
    logging_interval: Option<u64>,

    #[clap(long, value_enum, default_value_t = ScorerKind::Length)]
    scorer: ScorerKind,

    /// Path to the concolic tracer executable, required when `--scorer trace`.
    #[clap(long)]
    tracer_path: Option<PathBuf>,

    #[clap(long, default_value_t = uberfuzz::supervisor::DEFAULT_SELECTION_PRESSURE)]
    selection_pressure: f64,

    #[clap(long)]
    no_mutational: bool,

    #[clap(long)]
    no_assisted: bool,

    #[clap(long, default_value = "info")]
    default_log_level: tracing::level_filters::LevelFilter,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        setup_logger(self.default_log_level).context("setting up logger")?;

        let scorer = match self.scorer {
            ScorerKind::Length => ScorerChoice::Length,
            ScorerKind::Trace => {
                let tracer_path = self
                    .tracer_path
                    .clone()
                    .context("--tracer-path is required when --scorer trace")?;
                ScorerChoice::Trace { tracer_path }
            }
        };

        let mut config = SupervisorConfig::new(self.binary.clone(), self.work_dir.clone());
        config.use_mutational = !self.no_mutational;
        config.use_assisted = !self.no_assisted;
        config.mutational_path = self.mutational_path;
        config.assisted_path = self.assisted_path;
        config.target_opts = self.extra_opts;
        config.read_from_file = self.reads_file;
        config.scorer = scorer;
        config.pollenation_interval = Duration::from_secs(self.pollenation_interval);
        config.logging_time_interval = self.logging_interval.map(Duration::from_secs);
        config.selection_pressure = self.selection_pressure;

        let supervisor = Supervisor::new(config).context("building supervisor")?;
        supervisor.start().context("starting fuzzing engines")?;
        info!("uberfuzz running; press Ctrl-C to stop");

        let (tx, rx) = mpsc::channel();
        ctrlc::try_set_handler(move || {
            info!("Control-C received, shutting down");
            let _ = tx.send(());
        })
        .context("setting Control-C handler")?;

        rx.recv().context("waiting for shutdown signal")?;
        supervisor.kill();
        info!("uberfuzz stopped");

        Ok(())
    }
}

fn setup_logger(default_level: tracing::level_filters::LevelFilter) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_timer(fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_owned())))
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env()
                .context("constructing log filter from env")?,
        )
        .init();

    Ok(())
}
