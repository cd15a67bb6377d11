mod memory_store;
mod redis_store;
mod session_store;

pub use memory_store::*;
pub use redis_store::*;
pub use session_store::*;
