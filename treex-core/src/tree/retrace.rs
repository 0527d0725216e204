use super::{signature, Signature, Tree};

/// Detects when a step function would have to be traced again.
///
/// A tracing compiler reuses a compiled step only while the treedef, leaf
/// presence and leaf shapes of its inputs stay the same. Feed the inputs of
/// every step call to [`RetraceDetector::check`]; the first call counts as the
/// initial trace, every later signature change is a retrace and is logged as
/// a warning.
#[derive(Debug, Clone, Default)]
pub struct RetraceDetector {
    name: String,
    last: Option<Signature>,
    traces: usize,
}

impl RetraceDetector {
    pub fn new(name: impl Into<String>) -> Self {
        RetraceDetector {
            name: name.into(),
            last: None,
            traces: 0,
        }
    }

    /// Records the signature of `inputs`. Returns `true` if this call traced
    /// (first call or changed signature).
    pub fn check<T: Tree + ?Sized>(&mut self, inputs: &T) -> bool {
        let current = signature(inputs);
        let traced = match &self.last {
            None => true,
            Some(previous) => match previous.first_difference(&current) {
                None => false,
                Some(diff) => {
                    log::warn!(
                        "'{}' retraced (trace #{}): {}",
                        self.name,
                        self.traces + 1,
                        diff
                    );
                    true
                }
            },
        };
        if traced {
            self.traces += 1;
            self.last = Some(current);
        }
        traced
    }

    /// Number of traces seen so far, including the first.
    pub fn traces(&self) -> usize {
        self.traces
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
