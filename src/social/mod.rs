//! 社交网络层：客户端抽象与实现（REST / Mock）

pub mod mock;
pub mod rest;
pub mod traits;

pub use mock::{MockOp, MockSocialClient};
pub use rest::RestSocialClient;
pub use traits::{Connection, Post, SocialClient};
