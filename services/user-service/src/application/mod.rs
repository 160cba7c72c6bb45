//! 应用层

mod dto;
mod notification;
mod user_service;

pub use dto::*;
pub use notification::*;
pub use user_service::*;
