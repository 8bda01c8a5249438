//! Composite of the host's optional capability handlers.

use std::sync::{Arc, Weak};

use crate::elicitation::ElicitationHandler;
use crate::roots::RootsManager;
use crate::sampling::SamplingHandler;

/// Handlers offered to every connected server.
///
/// Sampling is held weakly: the sampling handler calls back into the
/// connection manager, which owns this struct.
#[derive(Debug, Default)]
pub struct HostCapabilities {
    sampling: Option<Weak<SamplingHandler>>,
    elicitation: Option<Arc<ElicitationHandler>>,
    roots: Option<Arc<RootsManager>>,
}

impl HostCapabilities {
    /// No capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer sampling.
    #[must_use]
    pub fn with_sampling(mut self, handler: &Arc<SamplingHandler>) -> Self {
        self.sampling = Some(Arc::downgrade(handler));
        self
    }

    /// Offer form elicitation.
    #[must_use]
    pub fn with_elicitation(mut self, handler: Arc<ElicitationHandler>) -> Self {
        self.elicitation = Some(handler);
        self
    }

    /// Offer roots.
    #[must_use]
    pub fn with_roots(mut self, roots: Arc<RootsManager>) -> Self {
        self.roots = Some(roots);
        self
    }

    /// Whether sampling is advertised.
    #[must_use]
    pub fn has_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    /// Whether elicitation is advertised.
    #[must_use]
    pub fn has_elicitation(&self) -> bool {
        self.elicitation.is_some()
    }

    /// Whether roots are advertised.
    #[must_use]
    pub fn has_roots(&self) -> bool {
        self.roots.is_some()
    }

    /// The sampling handler, if offered and still alive.
    #[must_use]
    pub fn sampling(&self) -> Option<Arc<SamplingHandler>> {
        self.sampling.as_ref().and_then(Weak::upgrade)
    }

    /// The elicitation handler, if offered.
    #[must_use]
    pub fn elicitation(&self) -> Option<&Arc<ElicitationHandler>> {
        self.elicitation.as_ref()
    }

    /// The roots manager, if offered.
    #[must_use]
    pub fn roots(&self) -> Option<&Arc<RootsManager>> {
        self.roots.as_ref()
    }
}
