//! 链式构建器

use std::sync::Arc;

use super::disposal::DisposalHooks;
use super::registry::ServiceClass;
use super::resolution::ResolvedDependencies;
use super::service_container::ServiceContainer;
use super::token::{Token, TokenKey};
use super::ServiceLifetime;
use crate::config::ContainerConfig;
use crate::errors::ContainerError;

/// 链式注册后在 [`ContainerBuilder::build`] 中完成校验
///
/// ```
/// use std::sync::Arc;
/// use tokenwire::{ServiceContainer, Token};
///
/// let port: Token<u16> = Token::new("Port");
/// let container = ServiceContainer::builder()
///     .value(&port, Arc::new(8080))?
///     .build()?;
/// assert_eq!(*container.resolve_with_error(&port)?, 8080);
/// # Ok::<(), tokenwire::ContainerError>(())
/// ```
#[derive(Debug)]
pub struct ContainerBuilder {
    container: ServiceContainer,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::for_container(ServiceContainer::new())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self::for_container(ServiceContainer::with_config(config))
    }

    pub(crate) fn for_container(container: ServiceContainer) -> Self {
        Self { container }
    }

    pub fn class<C: ServiceClass>(
        self,
        token: &Token<C>,
        lifetime: ServiceLifetime,
    ) -> Result<Self, ContainerError> {
        self.container.register_class(token, lifetime)?;
        Ok(self)
    }

    pub fn factory<T, F, I>(
        self,
        token: &Token<T>,
        factory: F,
        lifetime: ServiceLifetime,
        dependencies: I,
    ) -> Result<Self, ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolvedDependencies) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
        I: IntoIterator<Item = TokenKey>,
    {
        self.container
            .register_factory(token, factory, lifetime, dependencies)?;
        Ok(self)
    }

    pub fn value<T>(self, token: &Token<T>, value: Arc<T>) -> Result<Self, ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container.register_value(token, value)?;
        Ok(self)
    }

    pub fn alias<T: ?Sized>(self, alias: &Token<T>, target: &Token<T>) -> Result<Self, ContainerError> {
        self.container.register_alias(alias, target)?;
        Ok(self)
    }

    pub fn disposal<T>(self, token: &Token<T>, hooks: DisposalHooks<T>) -> Result<Self, ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container.register_disposal(token, hooks)?;
        Ok(self)
    }

    pub fn fallback<T, F>(self, token: &Token<T>, fallback: F) -> Result<Self, ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.container.register_fallback(token, fallback)?;
        Ok(self)
    }

    /// 校验并交出容器；校验失败时容器仍处于注册阶段，随错误一起丢弃
    pub fn build(self) -> Result<ServiceContainer, ContainerError> {
        self.container.validate()?;
        Ok(self.container)
    }

    /// 不校验直接取出容器，之后可以继续注册
    pub fn into_container(self) -> ServiceContainer {
        self.container
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
