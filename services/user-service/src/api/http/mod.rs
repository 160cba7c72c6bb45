//! HTTP 接口（axum）

mod cache;
mod handlers;
mod response;
mod router;
mod trace;

pub use cache::*;
pub use handlers::*;
pub use response::*;
pub use router::*;
pub use trace::*;
