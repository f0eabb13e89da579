pub mod events;
pub mod tickets;

pub use events::*;
pub use tickets::*;
