pub mod node;
pub mod user;

pub use node::*;
pub use user::*;
