pub mod account;
pub mod invite;
pub mod role;

pub use account::*;
pub use invite::*;
pub use role::*;
