//! Free functions over on-disk fuzzer directories.
//!
//! These are deliberately *not* methods on the adapter types: both adapter variants read the
//! same shapes of directory (a flat directory of testcase files, a flat directory of
//! crash files with an encoded filename grammar, a `key: value` stats file, a pollen inbox),
//! so the behavior lives here once and adapters just point it at their own paths.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::hash::BuildHasher;
use std::path::Path;

use tracing::debug;

use crate::testcase::Testcase;

/// Enumerate files directly inside `dir` and read each as a [`Testcase`], skipping entries
/// whose name appears in `skip` (engine-private bookkeeping, e.g. a `.state` subdirectory).
///
/// Missing directories yield an empty list. A file that vanishes between being listed and
/// being opened (the engine renamed or consumed it) is skipped, not an error.
pub fn read_testcases(dir: &Path, skip: &[&str]) -> Vec<Testcase> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut testcases = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if skip.contains(&name.as_ref()) {
            continue;
        }
        match fs::read(entry.path()) {
            Ok(bytes) => testcases.push(Testcase::new(bytes)),
            Err(error) => {
                debug!(path = %entry.path().display(), %error, "skipping unreadable queue entry");
            }
        }
    }
    testcases
}

/// Parse a crash filename's `key1:val1,key2:val2,...` grammar into a key→value map.
fn parse_crash_attrs(filename: &str) -> HashMap<&str, &str> {
    filename
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k, v))
        .collect()
}

/// Read `dir` as a crashes directory: skip the engine's `README.txt`, parse each remaining
/// filename's `sig` attribute, and keep only crashes whose signal is in `allowed_signals`.
/// Returned as a set, deduplicated by byte-identity.
pub fn read_crashes(dir: &Path, allowed_signals: &[i32]) -> HashSet<Testcase> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };

    let mut crashes = HashSet::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "README.txt" {
            continue;
        }

        let attrs = parse_crash_attrs(&name);
        let Some(sig) = attrs.get("sig").and_then(|s| s.parse::<i32>().ok()) else {
            debug!(file = %name, "crash entry has no parseable sig attribute, skipping");
            continue;
        };
        if !allowed_signals.contains(&sig) {
            continue;
        }

        match fs::read(entry.path()) {
            Ok(bytes) => {
                crashes.insert(Testcase::new(bytes));
            }
            Err(error) => {
                debug!(path = %entry.path().display(), %error, "skipping unreadable crash entry");
            }
        }
    }
    crashes
}

/// Parse a `key : value` per-line stats file. Missing file yields an empty map.
pub fn read_stats(path: &Path) -> HashMap<String, String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return HashMap::new();
    };

    contents
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_owned(), value.trim().to_owned()))
        })
        .collect()
}

/// Read the pollination inbox: the same shape as a queue directory, with no bookkeeping entries.
pub fn read_pollinated(dir: &Path) -> Vec<Testcase> {
    read_testcases(dir, &[])
}

/// Write `batch` into the pollen inbox directory `dir`, creating it if necessary.
///
/// Each testcase is written under a filename derived from a content hash, so delivering the
/// same bytes twice (within one cycle or across cycles) overwrites the same file rather than
/// accumulating duplicates.
pub fn write_pollen_batch(dir: &Path, batch: &[Testcase]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    for testcase in batch {
        let hash = ahash::RandomState::with_seeds(0, 0, 0, 0).hash_one(testcase.as_bytes());
        let path = dir.join(format!("pollen-{hash:016x}"));
        fs::write(path, testcase.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_directory_yields_empty_views() {
        let dir = Path::new("/nonexistent/path/for/uberfuzz/tests");
        assert!(read_testcases(dir, &[]).is_empty());
        assert!(read_crashes(dir, &[11, 4]).is_empty());
        assert!(read_stats(&dir.join("fuzzer_stats")).is_empty());
    }

    #[test]
    fn reads_queue_skipping_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("id:000000"), b"AAAA").unwrap();
        fs::create_dir(tmp.path().join(".state")).unwrap();

        let testcases = read_testcases(tmp.path(), &[".state"]);
        assert_eq!(testcases, vec![Testcase::new(b"AAAA".to_vec())]);
    }

    #[test]
    fn filters_crashes_by_allowed_signal() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("id:000,sig:11,src:000"), b"SEGV").unwrap();
        fs::write(tmp.path().join("id:001,sig:06,src:000"), b"ABRT").unwrap();
        fs::write(tmp.path().join("README.txt"), b"nope").unwrap();

        let crashes = read_crashes(tmp.path(), &[11, 4]);
        assert_eq!(crashes.len(), 1);
        assert!(crashes.contains(&Testcase::new(b"SEGV".to_vec())));
    }

    #[test]
    fn parses_stats_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("fuzzer_stats"), "start_time : 123\nexecs_done : 456\n\n").unwrap();

        let stats = read_stats(&tmp.path().join("fuzzer_stats"));
        assert_eq!(stats.get("start_time").map(String::as_str), Some("123"));
        assert_eq!(stats.get("execs_done").map(String::as_str), Some("456"));
    }

    #[test]
    fn pollenating_same_bytes_twice_writes_one_file() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = vec![Testcase::new(b"AAAA".to_vec()), Testcase::new(b"AAAA".to_vec())];
        write_pollen_batch(tmp.path(), &batch).unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
    }
}
