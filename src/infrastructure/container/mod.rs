//! Container module
//!
//! 令牌驱动的依赖注入容器：注册 -> 校验 -> 解析 -> 释放。

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

mod builder;
mod cache;
mod disposal;
mod registry;
mod resolution;
mod scope;
mod service_container;
mod token;
mod validation;

pub use builder::ContainerBuilder;
pub use disposal::{AsyncDisposable, Disposable, DisposalHooks};
pub use registry::{ProviderKind, Registration, ServiceClass};
pub use resolution::ResolvedDependencies;
pub use scope::ScopeInfo;
pub use service_container::ServiceContainer;
pub use token::{is_api_safe_token, mark_as_api_safe, ApiSafeToken, Token, TokenKey};
pub use validation::{DependencyGraph, ValidationState};

// Lifecycle enum kept at container module level so every submodule can reference it via `super::ServiceLifetime`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceLifetime {
    /// Single instance for the lifetime of the registering container
    Singleton,
    /// New instance per resolve
    Transient,
    /// One instance per scope; unavailable from the root
    Scoped,
}

impl fmt::Display for ServiceLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceLifetime::Singleton => "singleton",
            ServiceLifetime::Transient => "transient",
            ServiceLifetime::Scoped => "scoped",
        };
        f.write_str(label)
    }
}

/// 类型擦除后的实例，内部保存 `Arc<T>`，因此 `T` 可以是 trait 对象
pub(crate) type ErasedInstance = Arc<dyn Any + Send + Sync>;

pub(crate) fn erase_instance<T>(instance: Arc<T>) -> ErasedInstance
where
    T: ?Sized + Send + Sync + 'static,
{
    Arc::new(instance)
}

pub(crate) fn downcast_instance<T>(instance: &ErasedInstance) -> Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    instance.downcast_ref::<Arc<T>>().cloned()
}
