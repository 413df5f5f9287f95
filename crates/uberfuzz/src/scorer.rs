//! Scoring strategies: cheap proxies for "is this candidate worth transplanting".

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::error::ConfigError;
use crate::testcase::Testcase;
use crate::tracer::{self, ConcolicTracer, ProcessTracer};

/// A sentinel score returned when the tracer fails, so a flaky trace never outranks, nor aborts
/// scoring of, a cycle's other candidates.
pub const SCORER_FAILURE_SENTINEL: f64 = f64::MIN;

/// Gives a real-valued score to a testcase. Higher is better. Pure with respect to the
/// testcase's bytes within a run.
pub trait Scorer: Send + Sync {
    fn score(&self, testcase: &Testcase) -> f64;
}

/// Scores by byte length. Total, side-effect-free, constant-time.
#[derive(Debug, Default)]
pub struct LengthScorer;

impl Scorer for LengthScorer {
    fn score(&self, testcase: &Testcase) -> f64 {
        testcase.len() as f64
    }
}

/// Scores by a property of a concolic execution trace of the target on the testcase.
pub struct TraceScorer {
    tracer: Arc<dyn ConcolicTracer>,
    read_from_file: Option<PathBuf>,
}

impl TraceScorer {
    /// Fails with [`ConfigError::MissingInputFile`] if the target reads its input from a file
    /// (its argument vector contains the file-input placeholder) but no concrete path to
    /// materialize that file at was supplied: there would be no sink to write the testcase to.
    pub fn new(
        tracer: Arc<dyn ConcolicTracer>,
        target_args: &[String],
        read_from_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if tracer::uses_file_placeholder(target_args, tracer::FILE_PLACEHOLDER)
            && read_from_file.is_none()
        {
            return Err(ConfigError::MissingInputFile);
        }
        Ok(Self { tracer, read_from_file })
    }
}

impl Scorer for TraceScorer {
    fn score(&self, testcase: &Testcase) -> f64 {
        if let Some(path) = &self.read_from_file {
            if let Err(error) = tracer::write_input_file(path, testcase) {
                warn!(%error, path = %path.display(), "failed to materialize testcase for tracer, using sentinel score");
                return SCORER_FAILURE_SENTINEL;
            }
        }

        match self.tracer.trace(testcase) {
            Ok(result) => result.path_length as f64,
            Err(error) => {
                warn!(%error, "concolic tracer failed, using sentinel score");
                SCORER_FAILURE_SENTINEL
            }
        }
    }
}

/// Builds a [`ProcessTracer`]-backed [`TraceScorer`] from CLI-level configuration.
pub fn process_trace_scorer(
    tracer_path: PathBuf,
    target_path: PathBuf,
    target_args: Vec<String>,
    read_from_file: Option<PathBuf>,
) -> Result<TraceScorer, ConfigError> {
    let tracer = Arc::new(ProcessTracer::new(tracer_path, target_path, target_args.clone()));
    TraceScorer::new(tracer, &target_args, read_from_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{TraceResult, TracerError};

    struct StubTracer(Result<TraceResult, ()>);

    impl ConcolicTracer for StubTracer {
        fn trace(&self, _testcase: &Testcase) -> Result<TraceResult, TracerError> {
            self.0.map_err(|_| TracerError::NonZeroExit)
        }
    }

    #[test]
    fn length_scorer_scores_by_length() {
        let scorer = LengthScorer;
        assert_eq!(scorer.score(&Testcase::new(b"A".to_vec())), 1.0);
        assert_eq!(scorer.score(&Testcase::new(b"CCC".to_vec())), 3.0);
    }

    #[test]
    fn trace_scorer_requires_input_file_when_placeholder_present() {
        let tracer: Arc<dyn ConcolicTracer> = Arc::new(StubTracer(Ok(TraceResult { path_length: 1 })));
        let args = vec!["@@".to_owned()];
        let err = TraceScorer::new(tracer, &args, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingInputFile));
    }

    #[test]
    fn trace_scorer_returns_sentinel_on_tracer_failure() {
        let tracer: Arc<dyn ConcolicTracer> = Arc::new(StubTracer(Err(())));
        let scorer = TraceScorer::new(tracer, &[], None).unwrap();
        assert_eq!(scorer.score(&Testcase::new(b"x".to_vec())), SCORER_FAILURE_SENTINEL);
    }

    #[test]
    fn trace_scorer_reports_path_length_on_success() {
        let tracer: Arc<dyn ConcolicTracer> = Arc::new(StubTracer(Ok(TraceResult { path_length: 42 })));
        let scorer = TraceScorer::new(tracer, &[], None).unwrap();
        assert_eq!(scorer.score(&Testcase::new(b"x".to_vec())), 42.0);
    }
}
