mod close_hooks;
mod loopback;
mod media_engine;
mod media_event;
mod mediasoup_engine;

pub use loopback::*;
pub use media_engine::*;
pub use media_event::*;
pub use mediasoup_engine::*;
