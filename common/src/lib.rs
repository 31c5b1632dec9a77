pub mod location;
pub mod protocol;
pub mod status;

pub use location::*;
pub use protocol::*;
pub use status::*;
