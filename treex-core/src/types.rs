use std::fmt;

/// The role of a leaf inside a tree.
///
/// Every leaf stored in a module, optimizer or metric tree carries exactly one
/// kind. The kind is fixed when the slot is declared; only the value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LeafKind {
    /// Trainable weights (kernels, biases, scales).
    Parameter,
    /// Running statistics such as batch-norm means and variances.
    BatchStat,
    /// Pseudo-random keys.
    Rng,
    /// Values cached between calls.
    Cache,
    /// Running sums and counts of loss/metric accumulators.
    MetricState,
    /// Optimizer bookkeeping (moments, step counters).
    OptState,
    /// Logged loss values.
    LossLog,
    /// Logged metric values.
    MetricLog,
    /// Any other non-trainable state.
    State,
}

impl LeafKind {
    pub const ALL: [LeafKind; 9] = [
        LeafKind::Parameter,
        LeafKind::BatchStat,
        LeafKind::Rng,
        LeafKind::Cache,
        LeafKind::MetricState,
        LeafKind::OptState,
        LeafKind::LossLog,
        LeafKind::MetricLog,
        LeafKind::State,
    ];

    /// Non-trainable state of any flavour.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            LeafKind::BatchStat
                | LeafKind::Rng
                | LeafKind::Cache
                | LeafKind::MetricState
                | LeafKind::OptState
                | LeafKind::State
        )
    }

    /// State that belongs to the model itself and changes during forward passes.
    pub fn is_model_state(&self) -> bool {
        matches!(self, LeafKind::BatchStat | LeafKind::Cache)
    }

    pub fn is_log(&self) -> bool {
        matches!(self, LeafKind::LossLog | LeafKind::MetricLog)
    }
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeafKind::Parameter => "Parameter",
            LeafKind::BatchStat => "BatchStat",
            LeafKind::Rng => "Rng",
            LeafKind::Cache => "Cache",
            LeafKind::MetricState => "MetricState",
            LeafKind::OptState => "OptState",
            LeafKind::LossLog => "LossLog",
            LeafKind::MetricLog => "MetricLog",
            LeafKind::State => "State",
        };
        f.write_str(name)
    }
}

/// A set of leaf kinds used to project a tree onto a subset of its leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    mask: u16,
}

impl Filter {
    /// Keeps exactly the given kinds.
    pub fn only(kinds: &[LeafKind]) -> Self {
        let mask = kinds.iter().fold(0u16, |acc, k| acc | Self::bit(*k));
        Filter { mask }
    }

    pub fn all() -> Self {
        Filter::only(&LeafKind::ALL)
    }

    pub fn parameters() -> Self {
        Filter::only(&[LeafKind::Parameter])
    }

    pub fn batch_stats() -> Self {
        Filter::only(&[LeafKind::BatchStat])
    }

    pub fn rngs() -> Self {
        Filter::only(&[LeafKind::Rng])
    }

    pub fn model_states() -> Self {
        Self::matching(LeafKind::is_model_state)
    }

    pub fn states() -> Self {
        Self::matching(LeafKind::is_state)
    }

    pub fn logs() -> Self {
        Self::matching(LeafKind::is_log)
    }

    /// Union of two filters.
    pub fn or(self, other: Filter) -> Self {
        Filter {
            mask: self.mask | other.mask,
        }
    }

    pub fn contains(&self, kind: LeafKind) -> bool {
        self.mask & Self::bit(kind) != 0
    }

    fn matching(pred: fn(&LeafKind) -> bool) -> Self {
        let kinds: Vec<LeafKind> = LeafKind::ALL.iter().copied().filter(pred).collect();
        Filter::only(&kinds)
    }

    fn bit(kind: LeafKind) -> u16 {
        1 << (kind as u16)
    }
}

impl From<LeafKind> for Filter {
    fn from(kind: LeafKind) -> Self {
        Filter::only(&[kind])
    }
}
