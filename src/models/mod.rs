mod order;
mod plan;
mod product;
mod subscription;
mod user;

pub use order::*;
pub use plan::*;
pub use product::*;
pub use subscription::*;
pub use user::*;
