mod bridge_orchestrator;
mod bridge_session;
mod port_allocator;
mod session_description;
mod transcoder;

pub use bridge_orchestrator::*;
pub use bridge_session::*;
pub use port_allocator::*;
pub use session_description::*;
pub use transcoder::*;
