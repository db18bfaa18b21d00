//! 服务容器门面
//!
//! [`ServiceContainer`] 是可廉价克隆的句柄。根容器与子作用域共用同一类型，
//! 区别只在于底层 [`ScopeNode`] 是否有父节点。

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use std::convert::Infallible;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::builder::ContainerBuilder;
use super::disposal::{DisposalCoordinator, DisposalHooks, ErasedDisposal};
use super::registry::{Provider, Registration, ServiceClass};
use super::resolution::{ResolutionContext, ResolvedDependencies, ServiceResolver};
use super::scope::{ScopeInfo, ScopeNode};
use super::token::{ApiSafeToken, Token, TokenKey};
use super::validation::{ContainerValidator, DependencyGraph, ValidationState, ValidationStateMachine};
use super::{downcast_instance, erase_instance, ErasedInstance, ServiceLifetime};
use crate::config::ContainerConfig;
use crate::errors::ContainerError;
use crate::metrics::ContainerStats;

type FallbackFn = Arc<dyn Fn() -> ErasedInstance + Send + Sync>;

struct ContainerInner {
    node: Arc<ScopeNode>,
    state: ValidationStateMachine,
    /// 子作用域在释放前一直由父容器持有
    children: DashMap<Uuid, ServiceContainer>,
    parent: Weak<ContainerInner>,
    fallbacks: DashMap<TokenKey, FallbackFn>,
}

/// 依赖注入容器
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<ContainerInner>,
}

impl ServiceContainer {
    /// 使用默认配置创建根容器
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        let node = ScopeNode::root(Arc::new(config));
        debug!(scope = %node.name, "Creating root container");
        Self::from_node(node, Weak::new())
    }

    /// 以链式注册方式构建根容器
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    fn from_node(node: Arc<ScopeNode>, parent: Weak<ContainerInner>) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                node,
                state: ValidationStateMachine::new(),
                children: DashMap::new(),
                parent,
                fallbacks: DashMap::new(),
            }),
        }
    }

    // ---- 注册 ----

    /// 注册由容器构造的服务类型
    pub fn register_class<C: ServiceClass>(
        &self,
        token: &Token<C>,
        lifetime: ServiceLifetime,
    ) -> Result<(), ContainerError> {
        let hooks = C::disposal_hooks().map(DisposalHooks::erase);
        self.register(Registration::class(token, lifetime), hooks)
    }

    /// 注册工厂函数；`dependencies` 会先被解析再传给工厂
    pub fn register_factory<T, F, I>(
        &self,
        token: &Token<T>,
        factory: F,
        lifetime: ServiceLifetime,
        dependencies: I,
    ) -> Result<(), ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolvedDependencies) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
        I: IntoIterator<Item = TokenKey>,
    {
        let dependencies = dependencies.into_iter().collect();
        self.register(
            Registration::factory(token, factory, lifetime, dependencies),
            None,
        )
    }

    /// 注册现成的值，始终按单例处理
    pub fn register_value<T>(&self, token: &Token<T>, value: Arc<T>) -> Result<(), ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(Registration::value(token, value), None)
    }

    /// 让 `alias` 解析为 `target` 的实例
    pub fn register_alias<T: ?Sized>(
        &self,
        alias: &Token<T>,
        target: &Token<T>,
    ) -> Result<(), ContainerError> {
        if alias.key() == target.key() {
            return Err(ContainerError::invalid_operation(format!(
                "Alias {} cannot point to itself",
                alias
            ))
            .with_token(alias.description()));
        }
        self.register(Registration::alias(alias, target), None)
    }

    /// 为本容器中已注册的令牌挂上清理钩子
    pub fn register_disposal<T>(
        &self,
        token: &Token<T>,
        hooks: DisposalHooks<T>,
    ) -> Result<(), ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_not_disposed("register disposal", token.description())?;
        let node = &self.inner.node;
        self.inner.state.while_registering(token.description(), || {
            node.registry
                .attach_disposal(token.key(), hooks.erase(), &node.name)
        })
    }

    /// 为 API 安全令牌注册兜底工厂，`resolve` 失败时使用
    pub fn register_fallback<T, F>(&self, token: &Token<T>, fallback: F) -> Result<(), ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.ensure_not_disposed("register fallback", token.description())?;
        let erased: FallbackFn = Arc::new(move || erase_instance(fallback()));
        self.inner.fallbacks.insert(token.key(), erased);
        debug!(scope = %self.inner.node.name, token = token.description(), "Fallback factory registered");
        Ok(())
    }

    fn register(
        &self,
        registration: Registration,
        hooks: Option<ErasedDisposal>,
    ) -> Result<(), ContainerError> {
        let key = registration.token();
        self.ensure_not_disposed("register service", key.description())?;

        let node = &self.inner.node;
        let kind = registration.kind();
        let lifetime = registration.lifetime();
        self.inner.state.while_registering(key.description(), || {
            node.registry.register(registration, &node.name)?;
            if let Some(hooks) = hooks {
                node.registry.attach_disposal(key, hooks, &node.name)?;
            }
            Ok(())
        })?;

        debug!(
            scope = %node.name,
            token = key.description(),
            kind = ?kind,
            lifetime = ?lifetime,
            "Service registered"
        );
        Ok(())
    }

    /// 本容器或任一祖先是否注册了该令牌；从不失败
    pub fn is_registered<T: ?Sized>(&self, token: &Token<T>) -> Result<bool, Infallible> {
        Ok(self.inner.node.is_visible(token.key()))
    }

    /// 查看以值方式注册的实例，不触发解析
    pub fn registered_value<T>(&self, token: &Token<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (_, registration) = self.inner.node.find_registration(token.key())?;
        match &registration.provider {
            Provider::Value(value) => downcast_instance::<T>(value),
            _ => None,
        }
    }

    /// 本容器自己的注册（按注册顺序）
    pub fn registered_tokens(&self) -> Vec<TokenKey> {
        self.inner
            .node
            .registry
            .registrations()
            .iter()
            .map(|registration| registration.token())
            .collect()
    }

    // ---- 校验 ----

    /// 检查所有依赖都能满足，成功后容器变为不可变
    pub fn validate(&self) -> Result<(), ContainerError> {
        let node = &self.inner.node;
        if node.is_disposed() {
            return Err(ContainerError::disposed("validate").with_scope(&node.name));
        }

        self.inner
            .state
            .run(|| ContainerValidator::validate(node))
            .map_err(|error| {
                warn!(scope = %node.name, code = %error.code, error = %error.message, "Container validation failed");
                error
            })?;

        info!(
            scope = %node.name,
            registrations = node.registry.len(),
            "Container validated"
        );
        Ok(())
    }

    /// 列出所有校验问题而不改变状态
    pub fn diagnose(&self) -> Vec<ContainerError> {
        ContainerValidator::diagnose(&self.inner.node)
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::build(&self.inner.node)
    }

    pub fn validation_state(&self) -> ValidationState {
        self.inner.state.state()
    }

    pub fn is_validated(&self) -> bool {
        self.validation_state() == ValidationState::Validated
    }

    // ---- 解析 ----

    /// 解析服务，失败时返回结构化错误
    pub fn resolve_with_error<T>(&self, token: &Token<T>) -> Result<Arc<T>, ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let node = &self.inner.node;
        if node.is_disposed() {
            return Err(ContainerError::disposed("resolve service")
                .with_token(token.description())
                .with_scope(&node.name));
        }
        if !self.is_validated() {
            return Err(ContainerError::not_validated("resolving services")
                .with_token(token.description())
                .with_scope(&node.name));
        }

        node.stats.record_resolution();
        let mut ctx = ResolutionContext::new(node.config.max_resolution_depth);
        let result = ServiceResolver::resolve(node, token.key(), &mut ctx).and_then(|instance| {
            downcast_instance::<T>(&instance).ok_or_else(|| {
                ContainerError::invalid_operation(format!(
                    "Instance registered for {} has an unexpected type",
                    token
                ))
                .with_token(token.description())
            })
        });

        if let Err(error) = &result {
            node.stats.record_failure();
            debug!(
                scope = %node.name,
                token = token.description(),
                code = %error.code,
                "Service resolution failed"
            );
        }
        result
    }

    /// 解析 API 安全令牌，失败时使用兜底工厂
    ///
    /// `ApiSafeToken` 只能由 `mark_as_api_safe` 产生，类型本身就是标记。
    ///
    /// # Panics
    ///
    /// 解析失败且没有为该令牌注册兜底工厂时 panic。panic 载荷是 [`ContainerError`]，
    /// 保留原始错误码，可通过 `catch_unwind` 后 `downcast::<ContainerError>()` 取回。
    pub fn resolve<T>(&self, token: &ApiSafeToken<T>) -> Arc<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.resolve_with_error(token.token()) {
            Ok(service) => service,
            Err(mut failure) => match self.fallback_for(token.token()) {
                Some(service) => {
                    debug!(token = token.description(), code = %failure.code, "Using fallback factory");
                    service
                }
                None => {
                    failure.message = format!(
                        "Cannot resolve {}: {}. No fallback factory registered for this token.",
                        token.token(),
                        failure.message
                    );
                    error!(token = token.description(), code = %failure.code, "{}", failure.message);
                    std::panic::panic_any(failure)
                }
            },
        }
    }

    /// 依次查找本容器与祖先容器中的兜底工厂
    fn fallback_for<T>(&self, token: &Token<T>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut current = Some(self.inner.clone());
        while let Some(inner) = current {
            // 先克隆出来，调用时不持有分片锁
            let fallback = inner.fallbacks.get(&token.key()).map(|entry| entry.value().clone());
            if let Some(fallback) = fallback {
                return downcast_instance::<T>(&fallback());
            }
            current = inner.parent.upgrade();
        }
        None
    }

    // ---- 作用域 ----

    /// 创建命名子作用域，名称为 `<父名>.<name>`
    pub fn create_scope(&self, name: &str) -> Result<ServiceContainer, ContainerError> {
        self.spawn_child(Some(name))
    }

    /// 创建自动命名（`scope-<uuid>`）的子作用域
    pub fn create_unnamed_scope(&self) -> Result<ServiceContainer, ContainerError> {
        self.spawn_child(None)
    }

    /// 创建子作用域并返回其构建器，用于注册作用域本地服务
    pub fn scope_builder(&self, name: &str) -> Result<ContainerBuilder, ContainerError> {
        self.create_scope(name).map(ContainerBuilder::for_container)
    }

    fn spawn_child(&self, name: Option<&str>) -> Result<ServiceContainer, ContainerError> {
        let node = &self.inner.node;
        if node.is_disposed() {
            return Err(ContainerError::disposed("create scope").with_scope(&node.name));
        }
        if !self.is_validated() {
            return Err(ContainerError::not_validated("creating scopes").with_scope(&node.name));
        }

        let child_node = node.create_child(name)?;
        let child = Self::from_node(child_node, Arc::downgrade(&self.inner));
        self.inner
            .children
            .insert(child.inner.node.id, child.clone());

        debug!(
            parent = %node.name,
            scope = %child.inner.node.name,
            depth = child.inner.node.depth,
            "Scope created"
        );
        Ok(child)
    }

    pub fn scope_name(&self) -> &str {
        &self.inner.node.name
    }

    pub fn scope_id(&self) -> Uuid {
        self.inner.node.id
    }

    pub fn depth(&self) -> usize {
        self.inner.node.depth
    }

    pub fn is_root(&self) -> bool {
        self.inner.node.is_root()
    }

    pub fn parent(&self) -> Option<ServiceContainer> {
        self.inner
            .parent
            .upgrade()
            .map(|inner| ServiceContainer { inner })
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    pub fn scope_info(&self) -> ScopeInfo {
        self.inner.node.info(self.child_count())
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.node.config
    }

    /// 统计快照；计数器在整棵作用域树中共享
    pub fn stats(&self) -> ContainerStats {
        let node = &self.inner.node;
        node.stats.snapshot(
            node.registry.len(),
            node.cache.len(),
            self.child_count(),
        )
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }

    fn ensure_not_disposed(&self, operation: &str, token: &str) -> Result<(), ContainerError> {
        if self.inner.node.is_disposed() {
            return Err(ContainerError::disposed(operation)
                .with_token(token)
                .with_scope(&self.inner.node.name));
        }
        Ok(())
    }

    // ---- 释放 ----

    /// 同步释放：先递归释放子作用域，再按创建顺序倒序执行清理钩子
    ///
    /// 重复调用直接返回成功。只有异步钩子的实例会被跳过，需要时请使用
    /// [`ServiceContainer::dispose_async`]。
    pub fn dispose(&self) -> Result<(), ContainerError> {
        let node = &self.inner.node;
        if !node.mark_disposed() {
            return Ok(());
        }

        let mut failures = Vec::new();
        for child in self.take_children() {
            if let Err(error) = child.dispose() {
                failures.push(error);
            }
        }

        let entries = node.cache.drain();
        let instance_count = entries.len();
        failures.extend(DisposalCoordinator::new(&node.name).dispose(entries));

        self.finish_dispose(instance_count, failures)
    }

    /// 异步释放：顺序等待每个清理钩子，异步钩子优先
    pub async fn dispose_async(&self) -> Result<(), ContainerError> {
        self.dispose_async_boxed().await
    }

    fn dispose_async_boxed(&self) -> BoxFuture<'_, Result<(), ContainerError>> {
        async move {
            let node = &self.inner.node;
            if !node.mark_disposed() {
                return Ok(());
            }

            let mut failures = Vec::new();
            for child in self.take_children() {
                if let Err(error) = child.dispose_async_boxed().await {
                    failures.push(error);
                }
            }

            let entries = node.cache.drain();
            let instance_count = entries.len();
            failures.extend(
                DisposalCoordinator::new(&node.name)
                    .dispose_async(entries)
                    .await,
            );

            self.finish_dispose(instance_count, failures)
        }
        .boxed()
    }

    fn take_children(&self) -> Vec<ServiceContainer> {
        let children: Vec<ServiceContainer> = self
            .inner
            .children
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.children.clear();
        children
    }

    fn finish_dispose(
        &self,
        instance_count: usize,
        failures: Vec<ContainerError>,
    ) -> Result<(), ContainerError> {
        let node = &self.inner.node;
        if let Some(parent) = self.inner.parent.upgrade() {
            parent.children.remove(&node.id);
        }
        self.inner.fallbacks.clear();
        self.inner.state.reset();
        node.stats.record_disposal_failures(failures.len());

        if failures.is_empty() {
            info!(scope = %node.name, instances = instance_count, "Container disposed");
            Ok(())
        } else {
            warn!(
                scope = %node.name,
                instances = instance_count,
                failures = failures.len(),
                "Container disposed with cleanup failures"
            );
            Err(ContainerError::disposal_failed(&node.name, failures))
        }
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("scope", &self.inner.node.name)
            .field("state", &self.validation_state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
