pub mod bridge;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod room;
pub mod server;
pub mod signaling;
pub mod store;

pub use bridge::*;
pub use config::*;
pub use error::*;
pub use media::*;
pub use peer::*;
pub use room::*;
pub use server::*;
pub use signaling::*;
pub use store::*;
