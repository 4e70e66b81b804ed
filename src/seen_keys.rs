use crate::model::MetricSnapshot;
use std::collections::BTreeSet;

/// Metric keys of one device that have not yet carried a value.
///
/// Keys only ever move from pending to seen, so each one is reported at most once.
#[derive(Debug, Clone, Default)]
pub struct SeenKeys {
    pending: BTreeSet<String>,
    seen: BTreeSet<String>,
}

impl SeenKeys {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        SeenKeys {
            pending: keys.into_iter().map(Into::into).collect(),
            seen: BTreeSet::new(),
        }
    }

    /// Move every pending key that is present and non-null in `snapshot` to the seen set and
    /// return those keys.
    pub fn observe(&mut self, snapshot: &MetricSnapshot) -> Vec<String> {
        let newly: Vec<String> = self
            .pending
            .iter()
            .filter(|key| snapshot.has_value(key))
            .cloned()
            .collect();
        for key in &newly {
            self.pending.remove(key);
            self.seen.insert(key.clone());
        }
        newly
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn seen(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}
