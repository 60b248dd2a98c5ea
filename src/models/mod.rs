mod checkout;
mod order;
mod product;
mod user;

pub use checkout::*;
pub use order::*;
pub use product::*;
pub use user::*;
