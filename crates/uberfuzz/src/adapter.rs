//! FuzzerAdapter: a uniform handle to one running fuzzing engine.
//!
//! Modeled as a tagged enum (`Adapter`) over two concrete structs, not a trait-object
//! hierarchy, per the redesign guidance: the two variants differ only in how they spawn their
//! engine and which subdirectories they own, so a `match` over the capability set is clearer
//! than a base class.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::error::StartFailure;
use crate::layout;
use crate::testcase::{FuzzerIdentifier, Testcase};

const STATE_DIR_ENTRY: &str = ".state";
const MEMORY_LIMIT: &str = "8G";

/// Polite-then-forceful termination of a child process, tolerating a child that is already
/// dead. Grounded in the fork-server teardown pattern: send a signal, treat "no such process"
/// as success, then reap.
fn terminate_child(child: &mut Child, polite_signal: Signal) {
    let pid = Pid::from_raw(child.id() as i32);
    match signal::kill(pid, polite_signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(%errno, "failed to deliver {polite_signal} to child {pid}"),
    }

    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(error) => warn!(%error, "failed to poll child before force-kill"),
    }

    std::thread::sleep(std::time::Duration::from_millis(200));

    if matches!(child.try_wait(), Ok(None)) {
        if let Err(error) = child.kill() {
            warn!(%error, "failed to force-kill child {pid}");
        }
    }

    if let Err(error) = child.wait() {
        warn!(%error, "failed to reap child {pid}");
    }
}

/// Paths shared by both adapter variants: `work_dir/<identifier>/<binary_name>/...`.
struct AdapterPaths {
    fuzzer_binary_dir: PathBuf,
    input_dir: PathBuf,
    sync_dir: PathBuf,
    log_path: PathBuf,
}

impl AdapterPaths {
    fn new(work_dir: &Path, identifier: &FuzzerIdentifier, binary_name: &str) -> Self {
        let fuzzer_binary_dir = work_dir.join(identifier.as_str()).join(binary_name);
        Self {
            input_dir: fuzzer_binary_dir.join("input"),
            sync_dir: fuzzer_binary_dir.join("sync"),
            log_path: fuzzer_binary_dir.join(format!("{identifier}.log")),
            fuzzer_binary_dir,
        }
    }

    fn queue_dir(&self) -> PathBuf {
        self.sync_dir.join("queue")
    }

    fn crashes_dir(&self) -> PathBuf {
        self.sync_dir.join("crashes")
    }

    fn stats_path(&self) -> PathBuf {
        self.sync_dir.join("fuzzer_stats")
    }

    fn inbox_queue_dir(&self) -> PathBuf {
        self.sync_dir.join("inbox").join("queue")
    }
}

fn create_dir(path: &Path) -> Result<(), StartFailure> {
    std::fs::create_dir_all(path).map_err(|source| StartFailure::Directory {
        path: path.to_owned(),
        source,
    })
}

fn write_seeds(input_dir: &Path, seeds: &[Testcase]) -> Result<(), StartFailure> {
    for (index, seed) in seeds.iter().enumerate() {
        let path = input_dir.join(format!("seed-{index}"));
        std::fs::write(&path, seed.as_bytes())
            .map_err(|source| StartFailure::Seed { path, source })?;
    }
    Ok(())
}

fn spawn_engine(
    identifier: &FuzzerIdentifier,
    engine_path: &Path,
    input_arg: &str,
    sync_dir: &Path,
    target_binary: &Path,
    target_opts: &[String],
    log_path: &Path,
) -> Result<Child, StartFailure> {
    let log_file = std::fs::File::create(log_path).map_err(|source| StartFailure::Directory {
        path: log_path.to_owned(),
        source,
    })?;

    let mut command = Command::new(engine_path);
    command
        .arg("-i")
        .arg(input_arg)
        .arg("-o")
        .arg(sync_dir)
        .arg("-m")
        .arg(MEMORY_LIMIT)
        .arg("-Q")
        .arg("--")
        .arg(target_binary)
        .args(target_opts)
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::null());

    command.spawn().map_err(|source| StartFailure::Spawn {
        identifier: identifier.clone(),
        source,
    })
}

/// Shared construction/runtime state for both adapter variants.
struct EngineHandle {
    identifier: FuzzerIdentifier,
    engine_path: PathBuf,
    target_binary: PathBuf,
    target_opts: Vec<String>,
    seeds: Vec<Testcase>,
    paths: AdapterPaths,
    resuming: bool,
    process: Option<Child>,
}

impl EngineHandle {
    fn new(
        identifier: FuzzerIdentifier,
        engine_path: PathBuf,
        work_dir: &Path,
        target_binary: PathBuf,
        target_opts: Vec<String>,
        seeds: Vec<Testcase>,
    ) -> Self {
        let binary_name = target_binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "target".to_owned());
        let paths = AdapterPaths::new(work_dir, &identifier, &binary_name);
        let resuming = std::fs::read_dir(&paths.sync_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);

        Self {
            identifier,
            engine_path,
            target_binary,
            target_opts,
            seeds,
            paths,
            resuming,
            process: None,
        }
    }

    fn start(&mut self) -> Result<(), StartFailure> {
        create_dir(&self.paths.fuzzer_binary_dir)?;
        create_dir(&self.paths.sync_dir)?;

        let input_arg = if self.resuming {
            "-".to_owned()
        } else {
            create_dir(&self.paths.input_dir)?;
            write_seeds(&self.paths.input_dir, &self.seeds)?;
            self.paths.input_dir.to_string_lossy().into_owned()
        };

        let child = spawn_engine(
            &self.identifier,
            &self.engine_path,
            &input_arg,
            &self.paths.sync_dir,
            &self.target_binary,
            &self.target_opts,
            &self.paths.log_path,
        )?;
        self.process = Some(child);
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            terminate_child(&mut child, Signal::SIGTERM);
        }
    }

    fn queue(&self) -> Vec<Testcase> {
        layout::read_testcases(&self.paths.queue_dir(), &[STATE_DIR_ENTRY])
    }

    fn crashes(&self, allowed_signals: &[i32]) -> std::collections::HashSet<Testcase> {
        layout::read_crashes(&self.paths.crashes_dir(), allowed_signals)
    }

    fn stats(&self) -> std::collections::HashMap<String, String> {
        layout::read_stats(&self.paths.stats_path())
    }

    fn pollinated(&self) -> Vec<Testcase> {
        layout::read_pollinated(&self.paths.inbox_queue_dir())
    }

    fn pollenate(&self, batch: &[Testcase]) {
        if let Err(error) = layout::write_pollen_batch(&self.paths.inbox_queue_dir(), batch) {
            warn!(%error, identifier = %self.identifier, "failed to write pollen batch");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

/// A generic AFL-family fuzzer launched as a subprocess.
pub struct MutationalAdapter(EngineHandle);

impl MutationalAdapter {
    pub fn new(
        engine_path: PathBuf,
        work_dir: &Path,
        target_binary: PathBuf,
        target_opts: Vec<String>,
        seeds: Vec<Testcase>,
    ) -> Self {
        Self(EngineHandle::new(
            FuzzerIdentifier::MUTATIONAL,
            engine_path,
            work_dir,
            target_binary,
            target_opts,
            seeds,
        ))
    }
}

/// A mutational fuzzer augmented by an out-of-process symbolic helper. The helper's management
/// is opaque to this crate (spec §1 out-of-scope collaborator); the adapter only spawns and
/// observes the launcher process, the same way `MutationalAdapter` does for its own engine.
pub struct AssistedAdapter(EngineHandle);

impl AssistedAdapter {
    pub fn new(
        engine_path: PathBuf,
        work_dir: &Path,
        target_binary: PathBuf,
        target_opts: Vec<String>,
        seeds: Vec<Testcase>,
    ) -> Self {
        Self(EngineHandle::new(
            FuzzerIdentifier::ASSISTED,
            engine_path,
            work_dir,
            target_binary,
            target_opts,
            seeds,
        ))
    }
}

/// A handle to one running fuzzing engine, tagged by which kind it is.
pub enum Adapter {
    Mutational(MutationalAdapter),
    Assisted(AssistedAdapter),
}

impl Adapter {
    pub fn identifier(&self) -> &FuzzerIdentifier {
        match self {
            Adapter::Mutational(a) => &a.0.identifier,
            Adapter::Assisted(a) => &a.0.identifier,
        }
    }

    fn handle(&self) -> &EngineHandle {
        match self {
            Adapter::Mutational(a) => &a.0,
            Adapter::Assisted(a) => &a.0,
        }
    }

    fn handle_mut(&mut self) -> &mut EngineHandle {
        match self {
            Adapter::Mutational(a) => &mut a.0,
            Adapter::Assisted(a) => &mut a.0,
        }
    }

    pub fn start(&mut self) -> Result<(), StartFailure> {
        self.handle_mut().start()
    }

    pub fn kill(&mut self) {
        self.handle_mut().kill();
    }

    pub fn queue(&self) -> Vec<Testcase> {
        self.handle().queue()
    }

    pub fn crashes(&self, allowed_signals: &[i32]) -> std::collections::HashSet<Testcase> {
        self.handle().crashes(allowed_signals)
    }

    pub fn stats(&self) -> std::collections::HashMap<String, String> {
        self.handle().stats()
    }

    pub fn pollinated(&self) -> Vec<Testcase> {
        self.handle().pollinated()
    }

    pub fn pollenate(&self, batch: &[Testcase]) {
        self.handle().pollenate(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_adapter_is_not_resuming() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = EngineHandle::new(
            FuzzerIdentifier::MUTATIONAL,
            PathBuf::from("/bin/true"),
            tmp.path(),
            PathBuf::from("/bin/true"),
            Vec::new(),
            Vec::new(),
        );
        assert!(!adapter.resuming);
    }

    #[test]
    fn preexisting_sync_dir_with_entries_is_resuming() {
        let tmp = tempfile::tempdir().unwrap();
        let sync_dir = tmp.path().join("mutational").join("true").join("sync");
        std::fs::create_dir_all(sync_dir.join("queue")).unwrap();
        std::fs::write(sync_dir.join("queue").join("id:000"), b"A").unwrap();

        let adapter = EngineHandle::new(
            FuzzerIdentifier::MUTATIONAL,
            PathBuf::from("/bin/true"),
            tmp.path(),
            PathBuf::from("/bin/true"),
            Vec::new(),
            Vec::new(),
        );
        assert!(adapter.resuming);
    }

    #[test]
    fn pollenate_then_read_pollinated_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = EngineHandle::new(
            FuzzerIdentifier::ASSISTED,
            PathBuf::from("/bin/true"),
            tmp.path(),
            PathBuf::from("/bin/true"),
            Vec::new(),
            Vec::new(),
        );
        let batch = vec![Testcase::new(b"hello".to_vec())];
        adapter.pollenate(&batch);
        assert_eq!(adapter.pollinated(), batch);
    }
}
