use bytes::Bytes;
use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::image_processing::{DecodeError, DecodedImage};
use crate::model::PreviewId;

/// Decode an uploaded image off the update path. The shell runs it on a
/// blocking worker and answers with the decoded raster.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeOperation {
    pub preview: PreviewId,
    pub bytes: Bytes,
}

impl std::fmt::Debug for DecodeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeOperation")
            .field("preview", &self.preview)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

pub type DecodeOutput = Result<DecodedImage, DecodeError>;

impl Operation for DecodeOperation {
    type Output = DecodeOutput;
}

pub struct Decode<Ev> {
    context: CapabilityContext<DecodeOperation, Ev>,
}

impl<Ev> Clone for Decode<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Decode<Ev> {
    type Operation = DecodeOperation;
    type MappedSelf<MappedEv> = Decode<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Decode::new(self.context.map_event(f))
    }
}

impl<Ev> Decode<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<DecodeOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn decode<F>(&self, preview: PreviewId, bytes: Bytes, make_event: F)
    where
        F: FnOnce(DecodeOutput) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let output = ctx
                .request_from_shell(DecodeOperation { preview, bytes })
                .await;
            ctx.update_app(make_event(output));
        });
    }
}
