//! Run counters

/// Counters for one run
///
/// Components return these as deltas which the caller merges, so no
/// counter is shared between workers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Files parsed, validated and handed to the writer
    pub processed: usize,
    /// Failed listings, downloads, validations and dropped batch records
    pub errors: usize,
    pub folders_visited: usize,
    pub batches_committed: usize,
    /// Change events routed to ingestion
    pub changes_processed: usize,
}

impl RunStats {
    /// Add another set of counters into this one
    pub fn merge(&mut self, other: RunStats) {
        self.processed += other.processed;
        self.errors += other.errors;
        self.folders_visited += other.folders_visited;
        self.batches_committed += other.batches_committed;
        self.changes_processed += other.changes_processed;
    }

    /// By-value merge, handy as a reducer
    pub fn merged(mut self, other: RunStats) -> Self {
        self.merge(other);
        self
    }

    pub fn one_processed() -> Self {
        Self {
            processed: 1,
            ..Default::default()
        }
    }

    pub fn one_error() -> Self {
        Self {
            errors: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut stats = RunStats {
            processed: 2,
            folders_visited: 1,
            ..Default::default()
        };
        stats.merge(RunStats {
            processed: 3,
            errors: 1,
            batches_committed: 1,
            changes_processed: 4,
            folders_visited: 2,
        });

        assert_eq!(
            stats,
            RunStats {
                processed: 5,
                errors: 1,
                folders_visited: 3,
                batches_committed: 1,
                changes_processed: 4,
            }
        );
    }

    #[test]
    fn test_reduce() {
        let total = [RunStats::one_processed(), RunStats::one_error(), RunStats::one_processed()]
            .into_iter()
            .fold(RunStats::default(), RunStats::merged);

        assert_eq!(total.processed, 2);
        assert_eq!(total.errors, 1);
    }
}
