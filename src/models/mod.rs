mod customer;
mod heartbeat;
mod license;
mod product;
mod request_log;
mod team;

pub use customer::*;
pub use heartbeat::*;
pub use license::*;
pub use product::*;
pub use request_log::*;
pub use team::*;
