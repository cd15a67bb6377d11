mod matchmaker;
mod media_event_loop;

pub use matchmaker::*;
pub use media_event_loop::*;
