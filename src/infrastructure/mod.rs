//! 基础设施层
//!
//! 依赖注入容器及其作用域、校验与释放实现。

// 容器实现
pub mod container;

// 重新导出API
pub use container::{ServiceContainer, ServiceLifetime};
