//! Trace context carrier for batches.

use serde::{Deserialize, Serialize};

/// Trace context carried alongside a batch.
///
/// Holds W3C Trace Context headers (traceparent, tracestate) injected by the
/// scheduler so execution spans can be linked across nodes. Propagation into
/// a tracing backend is the embedding binary's concern; the committee layer
/// only carries the headers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceContext {
    /// Header key/value pairs; empty when tracing is not propagated.
    pub headers: Vec<(String, String)>,
}

impl TraceContext {
    /// An empty context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a header by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
