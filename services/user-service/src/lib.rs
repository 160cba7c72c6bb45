//! user-service - 用户 CRUD 服务
//!
//! HTTP API 与后台 worker 共用同一套领域、应用和基础设施代码，
//! 两个二进制分别位于 `main.rs` 和 `bin/worker.rs`。

pub mod api;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod worker;
