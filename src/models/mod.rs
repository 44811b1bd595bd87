pub mod comment;
pub mod post;
pub mod user;
pub mod vote;

pub use comment::*;
pub use post::*;
pub use user::*;
pub use vote::*;
