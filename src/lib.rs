pub mod canvas;
pub mod channel;
pub mod codec;
pub mod effects;
pub mod error;
pub mod server;

// Re-export commonly used types
pub use canvas::{Canvas, Feature, GraphicsSurface, Rgb24};
pub use channel::{Channel, ChannelConfig, ChannelController, FrameQueue};
pub use codec::ClientResponse;
pub use effects::{EffectsManager, LedEffect, SharedEffect};
pub use error::{ChannelError, CodecError, EffectsError};
pub use server::ApiState;
