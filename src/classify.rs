use serde::Serialize;
use tracing::warn;

use crate::candidate::{CandidateFile, CheckStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Output is unusable and should be discarded by the caller.
    Bad,
    Ok,
    /// Shorter than its calculated size but past the minimum; the sink is
    /// left open for the caller to settle.
    OkTruncated,
}

/// Decide the fate of a candidate without touching its sink.
///
/// Unbounded and custom candidates have their calculated size fixed to the
/// bytes written, so `Ok` always means `written == calculated_size`.
pub fn classify(candidate: &mut CandidateFile, paranoid: bool) -> Classification {
    let written = candidate.written();

    match &candidate.strategy {
        CheckStrategy::Size => {}
        CheckStrategy::Unbounded => candidate.calculated_size = Some(written),
        CheckStrategy::Custom(check) => {
            if !check.check_file(written) {
                return Classification::Bad;
            }
            if candidate.calculated_size.is_none() {
                candidate.calculated_size = Some(written);
            }
        }
    }

    if written < candidate.min_size {
        return Classification::Bad;
    }

    match candidate.calculated_size {
        Some(calculated) if written == calculated => Classification::Ok,
        Some(calculated) if written < calculated => {
            if paranoid {
                Classification::Bad
            } else {
                Classification::OkTruncated
            }
        }
        // feed never writes past the calculated size
        Some(_) => Classification::Bad,
        None => {
            candidate.calculated_size = Some(written);
            Classification::Ok
        }
    }
}

/// Classify the candidate and close its sink unless it is left pending as
/// truncated. A sink that fails to flush turns the verdict into `Bad`.
pub fn finish(candidate: &mut CandidateFile, paranoid: bool) -> Classification {
    let classification = classify(candidate, paranoid);
    if classification == Classification::OkTruncated {
        return classification;
    }
    match candidate.close_output() {
        Ok(()) => classification,
        Err(err) => {
            warn!(
                "closing output for candidate at offset {} failed: {err}",
                candidate.start()
            );
            Classification::Bad
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::fds::FDS;
    use crate::sink::{MemorySinkFactory, RetryPolicy, open_with_retry};

    fn fds_candidate(sides: u64) -> CandidateFile {
        let mut candidate = CandidateFile::new(0);
        candidate.min_size = 16;
        candidate.calculated_size = Some(16 + sides * 65500);
        candidate.strategy = CheckStrategy::Size;
        candidate.adopt(&FDS, 0);
        candidate
    }

    fn feed(candidate: &mut CandidateFile, mut total: usize) {
        let block = [0u8; 4096];
        while total > 0 {
            let n = total.min(block.len());
            candidate.append(&block[..n]).expect("append");
            total -= n;
        }
    }

    #[test]
    fn exact_size_is_ok_and_closes_sink() {
        let sinks = MemorySinkFactory::new();
        let mut candidate = fds_candidate(2);
        candidate.attach(open_with_retry(&sinks, "a.fds", &RetryPolicy::single_attempt()).unwrap());
        feed(&mut candidate, 131016);
        assert_eq!(finish(&mut candidate, false), Classification::Ok);
        assert!(!candidate.has_open_sink());
        assert_eq!(candidate.summary().map(|s| s.written), Some(131016));
    }

    #[test]
    fn short_candidate_is_truncated_and_keeps_sink_open() {
        let sinks = MemorySinkFactory::new();
        let mut candidate = fds_candidate(2);
        candidate.attach(open_with_retry(&sinks, "a.fds", &RetryPolicy::single_attempt()).unwrap());
        feed(&mut candidate, 50000);
        assert_eq!(finish(&mut candidate, false), Classification::OkTruncated);
        assert!(candidate.has_open_sink());
    }

    #[test]
    fn paranoid_rejects_short_size_based_candidate() {
        let mut candidate = fds_candidate(2);
        feed(&mut candidate, 50000);
        assert_eq!(finish(&mut candidate, true), Classification::Bad);
    }

    #[test]
    fn below_minimum_is_bad() {
        let mut candidate = fds_candidate(2);
        feed(&mut candidate, 15);
        assert_eq!(finish(&mut candidate, false), Classification::Bad);
    }

    #[test]
    fn unbounded_takes_written_as_calculated() {
        let mut candidate = CandidateFile::new(0);
        candidate.min_size = 512;
        candidate.adopt(&FDS, 0);
        feed(&mut candidate, 2048);
        assert_eq!(finish(&mut candidate, false), Classification::Ok);
        assert_eq!(candidate.calculated_size, Some(2048));
    }

    #[test]
    fn ok_only_when_written_equals_calculated() {
        for written in [16usize, 17, 1000, 65515, 65516] {
            let mut candidate = fds_candidate(1);
            feed(&mut candidate, written);
            let verdict = finish(&mut candidate, false);
            let calculated = candidate.calculated_size.unwrap();
            if verdict == Classification::Ok {
                assert_eq!(candidate.written(), calculated);
            } else {
                assert_ne!(candidate.written(), calculated);
                assert_eq!(verdict, Classification::OkTruncated);
            }
        }
    }
}
