pub mod decode;
pub mod preview;

pub use crux_core::render::Render;
pub use crux_http::Http;

pub use decode::{Decode, DecodeOperation, DecodeOutput};
pub use preview::{Preview, PreviewOperation};

use crate::app::App;
use crate::event::Event;

/// What an HTTP exchange hands back to the app.
pub type HttpResult = crux_http::Result<crux_http::Response<Vec<u8>>>;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
    pub decode: Decode<Event>,
    pub preview: Preview<Event>,
}

impl Effect {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Render(_) => "render",
            Self::Decode(_) => "decode",
            Self::Preview(_) => "preview",
        }
    }
}
