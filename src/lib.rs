//! tokenwire：基于令牌的依赖注入容器
//!
//! 服务以类型化的 [`Token`] 注册，容器经过校验后才能解析，
//! 支持单例、瞬态和作用域三种生命周期，以及按创建顺序倒序的清理。

pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod logging;
pub mod metrics;

// Re-export commonly used items for convenience
pub use config::ContainerConfig;
pub use errors::{ContainerError, ContainerErrorCode};
pub use infrastructure::container::{
    is_api_safe_token, mark_as_api_safe, ApiSafeToken, AsyncDisposable, ContainerBuilder,
    DependencyGraph, Disposable, DisposalHooks, ProviderKind, Registration, ResolvedDependencies,
    ScopeInfo, ServiceClass, ServiceContainer, ServiceLifetime, Token, TokenKey, ValidationState,
};
pub use metrics::{ContainerStats, ErrorSanitizer, MetricsCollector, ResolutionObserver};

/// 创建使用默认配置的根容器
pub fn create_root() -> ServiceContainer {
    ServiceContainer::new()
}

/// 使用给定配置创建根容器
pub fn create_root_with_config(config: ContainerConfig) -> ServiceContainer {
    ServiceContainer::with_config(config)
}
