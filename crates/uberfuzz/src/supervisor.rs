//! The Supervisor ("Uberfuzz"): owns adapters and timers, drives the pollination policy.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing::info;

use crate::adapter::Adapter;
use crate::error::{ConfigError, StartFailure};
use crate::scorer::{LengthScorer, Scorer};
use crate::testcase::{FuzzerIdentifier, Testcase};
use crate::timer::PeriodicTimer;

pub const DEFAULT_SELECTION_PRESSURE: f64 = 0.4;

fn default_allowed_signals() -> Vec<i32> {
    vec![Signal::SIGSEGV as i32, Signal::SIGILL as i32]
}

/// Which [`Scorer`] the Supervisor should instantiate, and the parameters needed to build it.
pub enum ScorerChoice {
    Length,
    Trace { tracer_path: PathBuf },
}

/// Construction-time configuration for a [`Supervisor`].
pub struct SupervisorConfig {
    pub binary_path: PathBuf,
    pub work_dir: PathBuf,
    pub use_mutational: bool,
    pub use_assisted: bool,
    pub mutational_path: Option<PathBuf>,
    pub assisted_path: Option<PathBuf>,
    pub seeds: Vec<Testcase>,
    pub target_opts: Vec<String>,
    pub pollenation_interval: Duration,
    pub logging_time_interval: Option<Duration>,
    pub callback_time_interval: Option<Duration>,
    pub callback_fn: Option<Box<dyn FnMut() + Send>>,
    pub read_from_file: Option<PathBuf>,
    pub scorer: ScorerChoice,
    pub selection_pressure: f64,
    pub allowed_signals: Vec<i32>,
}

impl SupervisorConfig {
    pub fn new(binary_path: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            binary_path,
            work_dir,
            use_mutational: true,
            use_assisted: true,
            mutational_path: None,
            assisted_path: None,
            seeds: Vec::new(),
            target_opts: Vec::new(),
            pollenation_interval: Duration::from_secs(10),
            logging_time_interval: None,
            callback_time_interval: None,
            callback_fn: None,
            read_from_file: None,
            scorer: ScorerChoice::Length,
            selection_pressure: DEFAULT_SELECTION_PRESSURE,
            allowed_signals: default_allowed_signals(),
        }
    }

    /// Whether the mutational adapter ends up enabled: requested *and* a path was resolved for
    /// it (directly or via the `AFLFAST_PATH` environment fallback at the CLI layer). A path-less
    /// request silently disables that adapter rather than failing construction.
    fn effective_mutational(&self) -> bool {
        self.use_mutational && self.mutational_path.is_some()
    }

    fn effective_assisted(&self) -> bool {
        self.use_assisted && self.assisted_path.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.effective_mutational() && !self.effective_assisted() {
            return Err(ConfigError::NoAdapterEnabled);
        }
        if self.callback_time_interval.is_some() != self.callback_fn.is_some() {
            return Err(ConfigError::IncompleteCallback);
        }
        if !(0.0 < self.selection_pressure && self.selection_pressure <= 1.0) {
            return Err(ConfigError::InvalidSelectionPressure(self.selection_pressure));
        }
        Ok(())
    }
}

/// Shared, concurrently-accessed state: the adapters (guarded by an `RwLock` since the
/// pollination and logging timers only ever need read access, and only `start`/`kill` need to
/// write), the scorer, and the policy parameters.
struct SupervisorCore {
    adapters: RwLock<Vec<Adapter>>,
    scorer: Box<dyn Scorer>,
    selection_pressure: f64,
    allowed_signals: Vec<i32>,
    cancel_requested: AtomicBool,
}

impl SupervisorCore {
    fn known_set(adapter: &Adapter) -> HashSet<Testcase> {
        adapter
            .queue()
            .into_iter()
            .chain(adapter.pollinated())
            .collect()
    }

    /// Runs one pollination cycle per the policy in spec §4.4. Aborts before writing a batch if
    /// `cancel_requested` becomes true while scoring candidates.
    fn pollinate_once(&self) {
        let adapters = self.adapters.read().unwrap();
        let Some(source) = adapters.iter().find(|a| *a.identifier() == FuzzerIdentifier::MUTATIONAL)
        else {
            return;
        };
        let Some(dest) = adapters.iter().find(|a| *a.identifier() == FuzzerIdentifier::ASSISTED)
        else {
            return;
        };

        let known = Self::known_set(dest);
        let candidates: Vec<Testcase> =
            source.queue().into_iter().filter(|tc| !known.contains(tc)).collect();

        let mut scored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.cancel_requested.load(Ordering::SeqCst) {
                return;
            }
            let score = self.scorer.score(&candidate);
            scored.push((score, candidate));
        }

        let n = scored.len();
        if n == 0 {
            info!("pollination cycle found no new candidates");
            return;
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let tail_len = ((n as f64) * self.selection_pressure).floor() as usize;
        let tail_len = tail_len.saturating_sub(1).min(n.saturating_sub(1));

        if self.cancel_requested.load(Ordering::SeqCst) {
            return;
        }

        let batch: Vec<Testcase> = scored.into_iter().take(1 + tail_len).map(|(_, tc)| tc).collect();

        dest.pollenate(&batch);
        info!(candidates = n, selected = batch.len(), "pollinated batch into assisted engine");
    }

    fn log_status(&self) {
        let adapters = self.adapters.read().unwrap();
        for adapter in adapters.iter() {
            let queue_len = adapter.queue().len();
            let crashes_len = adapter.crashes(&self.allowed_signals).len();
            info!(
                identifier = %adapter.identifier(),
                queue = queue_len,
                crashes = crashes_len,
                "fuzzer status"
            );
        }
    }
}

/// Owns a set of [`Adapter`]s, a [`Scorer`], and up to three [`PeriodicTimer`]s, and implements
/// the cross-pollination control loop.
pub struct Supervisor {
    core: Arc<SupervisorCore>,
    pollenation_timer: PeriodicTimer,
    logging_timer: Option<PeriodicTimer>,
    callback_timer: Option<PeriodicTimer>,
    killed: AtomicBool,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut adapters = Vec::new();
        if config.effective_mutational() {
            let engine_path = config.mutational_path.clone().expect("checked by effective_mutational");
            adapters.push(Adapter::Mutational(crate::adapter::MutationalAdapter::new(
                engine_path,
                &config.work_dir,
                config.binary_path.clone(),
                config.target_opts.clone(),
                config.seeds.clone(),
            )));
        }
        if config.effective_assisted() {
            let engine_path = config.assisted_path.clone().expect("checked by effective_assisted");
            adapters.push(Adapter::Assisted(crate::adapter::AssistedAdapter::new(
                engine_path,
                &config.work_dir,
                config.binary_path.clone(),
                config.target_opts.clone(),
                config.seeds.clone(),
            )));
        }

        let scorer: Box<dyn Scorer> = match config.scorer {
            ScorerChoice::Length => Box::new(LengthScorer),
            ScorerChoice::Trace { tracer_path } => Box::new(crate::scorer::process_trace_scorer(
                tracer_path,
                config.binary_path.clone(),
                config.target_opts.clone(),
                config.read_from_file.clone(),
            )?),
        };

        let core = Arc::new(SupervisorCore {
            adapters: RwLock::new(adapters),
            scorer,
            selection_pressure: config.selection_pressure,
            allowed_signals: config.allowed_signals,
            cancel_requested: AtomicBool::new(false),
        });

        let pollenation_core = Arc::clone(&core);
        let pollenation_timer =
            PeriodicTimer::new(config.pollenation_interval, move || pollenation_core.pollinate_once());

        let logging_timer = config.logging_time_interval.map(|interval| {
            let logging_core = Arc::clone(&core);
            PeriodicTimer::new(interval, move || logging_core.log_status())
        });

        let callback_timer = match (config.callback_time_interval, config.callback_fn) {
            (Some(interval), Some(callback)) => Some(PeriodicTimer::new(interval, callback)),
            _ => None,
        };

        Ok(Self {
            core,
            pollenation_timer,
            logging_timer,
            callback_timer,
            killed: AtomicBool::new(false),
        })
    }

    /// Starts each enabled adapter in declaration order, then arms all configured timers. On
    /// the first adapter failure, already-started adapters are killed before the error
    /// propagates.
    pub fn start(&self) -> Result<(), StartFailure> {
        {
            let mut adapters = self.core.adapters.write().unwrap();
            for index in 0..adapters.len() {
                if let Err(error) = adapters[index].start() {
                    for started in adapters.iter_mut().take(index) {
                        started.kill();
                    }
                    return Err(error);
                }
            }
        }

        self.pollenation_timer.start().expect("timer not yet started");
        if let Some(timer) = &self.logging_timer {
            timer.start().expect("timer not yet started");
        }
        if let Some(timer) = &self.callback_timer {
            timer.start().expect("timer not yet started");
        }
        Ok(())
    }

    /// Cancels all timers first, then kills each adapter. Idempotent: a second call is a no-op.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.core.cancel_requested.store(true, Ordering::SeqCst);

        self.pollenation_timer.cancel();
        if let Some(timer) = &self.logging_timer {
            timer.cancel();
        }
        if let Some(timer) = &self.callback_timer {
            timer.cancel();
        }

        let mut adapters = self.core.adapters.write().unwrap();
        for adapter in adapters.iter_mut() {
            adapter.kill();
        }
    }

    pub fn queue(&self) -> HashMap<FuzzerIdentifier, Vec<Testcase>> {
        let adapters = self.core.adapters.read().unwrap();
        adapters.iter().map(|a| (a.identifier().clone(), a.queue())).collect()
    }

    pub fn crashes(&self) -> HashMap<FuzzerIdentifier, HashSet<Testcase>> {
        let adapters = self.core.adapters.read().unwrap();
        adapters
            .iter()
            .map(|a| (a.identifier().clone(), a.crashes(&self.core.allowed_signals)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_config(work_dir: PathBuf) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(PathBuf::from("/bin/true"), work_dir);
        config.mutational_path = Some(PathBuf::from("/bin/true"));
        config.assisted_path = Some(PathBuf::from("/bin/true"));
        config
    }

    #[test]
    fn rejects_config_with_no_adapters_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = make_config(tmp.path().to_owned());
        config.use_mutational = false;
        config.use_assisted = false;
        let err = Supervisor::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::NoAdapterEnabled));
    }

    #[test]
    fn missing_engine_path_silently_disables_that_adapter_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = make_config(tmp.path().to_owned());
        config.assisted_path = None;
        assert!(Supervisor::new(config).is_ok());
    }

    #[test]
    fn rejects_only_when_both_paths_are_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = make_config(tmp.path().to_owned());
        config.mutational_path = None;
        config.assisted_path = None;
        let err = Supervisor::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::NoAdapterEnabled));
    }

    #[test]
    fn rejects_mismatched_callback_config() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = make_config(tmp.path().to_owned());
        config.callback_time_interval = Some(Duration::from_secs(1));
        let err = Supervisor::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteCallback));
    }

    fn seed_queue(dir: &std::path::Path, files: &[(&str, &[u8])]) {
        fs::create_dir_all(dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
    }

    #[test]
    fn pollination_skips_known_testcases() {
        let tmp = tempfile::tempdir().unwrap();
        let config = make_config(tmp.path().to_owned());
        let supervisor = Supervisor::new(config).unwrap();

        let mutational_queue = tmp.path().join("mutational").join("true").join("sync").join("queue");
        seed_queue(&mutational_queue, &[("id:000", b"AAAA")]);
        let assisted_queue = tmp.path().join("assisted").join("true").join("sync").join("queue");
        seed_queue(&assisted_queue, &[("id:000", b"AAAA")]);

        supervisor.core.pollinate_once();

        let inbox = tmp
            .path()
            .join("assisted")
            .join("true")
            .join("sync")
            .join("inbox")
            .join("queue");
        assert!(!inbox.exists() || fs::read_dir(&inbox).unwrap().next().is_none());
    }

    #[test]
    fn elite_candidate_is_pollenated() {
        let tmp = tempfile::tempdir().unwrap();
        let config = make_config(tmp.path().to_owned());
        let supervisor = Supervisor::new(config).unwrap();

        let mutational_queue = tmp.path().join("mutational").join("true").join("sync").join("queue");
        seed_queue(
            &mutational_queue,
            &[("id:000", b"A"), ("id:001", b"BB"), ("id:002", b"CCC")],
        );
        let assisted_queue = tmp.path().join("assisted").join("true").join("sync").join("queue");
        seed_queue(&assisted_queue, &[("id:000", b"A")]);

        supervisor.core.pollinate_once();

        let inbox = tmp
            .path()
            .join("assisted")
            .join("true")
            .join("sync")
            .join("inbox")
            .join("queue");
        let files: Vec<_> = fs::read_dir(&inbox).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read(files[0].path()).unwrap(), b"CCC");
    }

    #[test]
    fn kill_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let config = make_config(tmp.path().to_owned());
        let supervisor = Supervisor::new(config).unwrap();
        supervisor.kill();
        supervisor.kill();
    }
}
