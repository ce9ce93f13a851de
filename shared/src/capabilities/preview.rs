use bytes::Bytes;
use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::model::PreviewId;

/// Transient preview references held by the shell (object URLs on the web).
/// Every `Acquire` is paired with exactly one `Release` from the core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreviewOperation {
    Acquire { id: PreviewId, bytes: Bytes },
    Release { id: PreviewId },
}

impl PreviewOperation {
    #[must_use]
    pub fn id(&self) -> &PreviewId {
        match self {
            Self::Acquire { id, .. } | Self::Release { id } => id,
        }
    }
}

impl std::fmt::Debug for PreviewOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquire { id, bytes } => f
                .debug_struct("Acquire")
                .field("id", id)
                .field("bytes", &bytes.len())
                .finish(),
            Self::Release { id } => f.debug_struct("Release").field("id", id).finish(),
        }
    }
}

// Fire and forget: the shell never answers.
impl Operation for PreviewOperation {
    type Output = ();
}

pub struct Preview<Ev> {
    context: CapabilityContext<PreviewOperation, Ev>,
}

impl<Ev> Clone for Preview<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Preview<Ev> {
    type Operation = PreviewOperation;
    type MappedSelf<MappedEv> = Preview<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Preview::new(self.context.map_event(f))
    }
}

impl<Ev> Preview<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<PreviewOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn acquire(&self, id: PreviewId, bytes: Bytes) {
        self.notify(PreviewOperation::Acquire { id, bytes });
    }

    pub fn release(&self, id: PreviewId) {
        self.notify(PreviewOperation::Release { id });
    }

    fn notify(&self, operation: PreviewOperation) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(operation).await;
        });
    }
}
