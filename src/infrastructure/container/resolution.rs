//! 服务解析：生命周期缓存、循环检测与依赖构建

use std::sync::Arc;

use super::cache::CachedInstance;
use super::registry::{Provider, Registration};
use super::scope::ScopeNode;
use super::token::{Token, TokenKey};
use super::{downcast_instance, ErasedInstance, ServiceLifetime};
use crate::config::ENV_MAX_RESOLUTION_DEPTH;
use crate::errors::{ContainerError, ContainerErrorCode};

/// 一次解析调用中已解析好的依赖，按声明顺序排列
pub struct ResolvedDependencies {
    owner: TokenKey,
    entries: Vec<(TokenKey, ErasedInstance)>,
}

impl ResolvedDependencies {
    pub(crate) fn new(owner: TokenKey, entries: Vec<(TokenKey, ErasedInstance)>) -> Self {
        Self { owner, entries }
    }

    /// 取出已声明的依赖
    pub fn get<T>(&self, token: &Token<T>) -> anyhow::Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = token.key();
        let (_, instance) = self
            .entries
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .ok_or_else(|| {
                anyhow::anyhow!("{} did not declare a dependency on {}", self.owner, key)
            })?;
        downcast_instance::<T>(instance)
            .ok_or_else(|| anyhow::anyhow!("dependency {} has an unexpected type", key))
    }

    /// 按声明位置取依赖
    pub fn at<T>(&self, index: usize) -> anyhow::Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (key, instance) = self.entries.get(index).ok_or_else(|| {
            anyhow::anyhow!("{} has no dependency at position {}", self.owner, index)
        })?;
        downcast_instance::<T>(instance)
            .ok_or_else(|| anyhow::anyhow!("dependency {} has an unexpected type", key))
    }

    pub fn owner(&self) -> TokenKey {
        self.owner
    }

    pub fn keys(&self) -> impl Iterator<Item = TokenKey> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 单次顶层解析的调用栈，每次 `resolve_with_error` 都新建一个，
/// 并发解析之间互不影响。
#[derive(Debug)]
pub(crate) struct ResolutionContext {
    stack: Vec<TokenKey>,
    max_depth: usize,
}

impl ResolutionContext {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            max_depth,
        }
    }

    pub(crate) fn contains(&self, key: TokenKey) -> bool {
        self.stack.contains(&key)
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// 从 `key` 第一次出现到重复处的路径
    pub(crate) fn cycle_to(&self, key: TokenKey) -> Vec<String> {
        let start = self
            .stack
            .iter()
            .position(|candidate| *candidate == key)
            .unwrap_or(0);
        self.stack[start..]
            .iter()
            .chain(std::iter::once(&key))
            .map(|entry| entry.description().to_string())
            .collect()
    }

    fn push(&mut self, key: TokenKey) {
        self.stack.push(key);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }
}

/// 无状态解析器，所有状态都在 [`ScopeNode`] 和 [`ResolutionContext`] 中
pub(crate) struct ServiceResolver;

impl ServiceResolver {
    pub(crate) fn resolve(
        node: &Arc<ScopeNode>,
        key: TokenKey,
        ctx: &mut ResolutionContext,
    ) -> Result<ErasedInstance, ContainerError> {
        if ctx.contains(key) {
            node.stats.record_circular_dependency();
            return Err(ContainerError::circular_dependency(ctx.cycle_to(key)).with_scope(&node.name));
        }
        if ctx.depth() >= ctx.max_depth {
            return Err(ContainerError::invalid_operation(format!(
                "Resolution of {} exceeded the maximum depth of {}; raise max_resolution_depth \
                 in the container config or set {}",
                key,
                ctx.max_depth,
                ENV_MAX_RESOLUTION_DEPTH
            ))
            .with_token(key.description())
            .with_scope(&node.name));
        }

        let (owner, registration) = node.find_registration(key).ok_or_else(|| {
            ContainerError::token_not_registered(key.description()).with_scope(&node.name)
        })?;
        if owner.is_disposed() {
            return Err(ContainerError::disposed("resolve service")
                .with_token(key.description())
                .with_scope(&owner.name));
        }

        if let Provider::Alias(target) = registration.provider {
            ctx.push(key);
            let resolved = Self::resolve(node, target, ctx);
            ctx.pop();
            return resolved.map_err(|error| {
                ContainerError::dependency_failed(key.description(), target.description(), error)
            });
        }

        match registration.lifetime() {
            ServiceLifetime::Singleton => {
                if let Some(hit) = owner.cache.get(key) {
                    node.stats.record_singleton_hit();
                    return Ok(hit);
                }
                let _construction = owner.cache.lock_construction();
                if let Some(hit) = owner.cache.get(key) {
                    node.stats.record_singleton_hit();
                    return Ok(hit);
                }
                node.stats.record_singleton_miss();
                Self::check_captive_dependencies(&owner, &registration)?;
                let instance = Self::instantiate(&owner, &registration, ctx)?;
                Ok(Self::store(&owner, &registration, instance))
            }
            ServiceLifetime::Scoped => {
                if node.is_root() {
                    return Err(ContainerError::new(
                        ContainerErrorCode::ScopeRequired,
                        format!(
                            "Service {} is scoped and cannot be resolved from the root container. Create a scope first.",
                            key
                        ),
                    )
                    .with_token(key.description())
                    .with_scope(&node.name));
                }
                if let Some(hit) = node.cache.get(key) {
                    node.stats.record_scoped_hit();
                    return Ok(hit);
                }
                let _construction = node.cache.lock_construction();
                if let Some(hit) = node.cache.get(key) {
                    node.stats.record_scoped_hit();
                    return Ok(hit);
                }
                let instance = Self::instantiate(node, &registration, ctx)?;
                node.stats.record_scoped_creation();
                Ok(Self::store(node, &registration, instance))
            }
            ServiceLifetime::Transient => {
                let instance = Self::instantiate(node, &registration, ctx)?;
                node.stats.record_transient_creation();
                Ok(instance)
            }
        }
    }

    /// 单例不能捕获作用域服务，否则作用域释放后单例仍持有它
    fn check_captive_dependencies(
        owner: &Arc<ScopeNode>,
        registration: &Registration,
    ) -> Result<(), ContainerError> {
        for dependency in registration.dependencies() {
            let Some((_, target)) = owner.find_registration(*dependency) else {
                continue;
            };
            if target.lifetime() == ServiceLifetime::Scoped {
                return Err(ContainerError::new(
                    ContainerErrorCode::InvalidLifecycle,
                    format!(
                        "Singleton {} cannot depend on scoped service {}",
                        registration.token(),
                        dependency
                    ),
                )
                .with_token(registration.token().description())
                .with_scope(&owner.name));
            }
        }
        Ok(())
    }

    fn instantiate(
        build_node: &Arc<ScopeNode>,
        registration: &Registration,
        ctx: &mut ResolutionContext,
    ) -> Result<ErasedInstance, ContainerError> {
        let key = registration.token();
        match &registration.provider {
            Provider::Value(value) => Ok(value.clone()),
            Provider::Construct(provider) => {
                ctx.push(key);
                let dependencies = Self::resolve_dependencies(build_node, registration, ctx);
                ctx.pop();
                let dependencies = dependencies?;

                provider(&dependencies).map_err(|cause| {
                    ContainerError::factory_failed(
                        key.description(),
                        registration.kind().label(),
                        cause,
                    )
                    .with_scope(&build_node.name)
                })
            }
            Provider::Alias(_) => Err(ContainerError::invalid_operation(format!(
                "Alias {} cannot be instantiated directly",
                key
            ))),
        }
    }

    fn resolve_dependencies(
        build_node: &Arc<ScopeNode>,
        registration: &Registration,
        ctx: &mut ResolutionContext,
    ) -> Result<ResolvedDependencies, ContainerError> {
        let key = registration.token();
        let mut entries = Vec::with_capacity(registration.dependencies().len());
        for dependency in registration.dependencies() {
            let instance = Self::resolve(build_node, *dependency, ctx).map_err(|error| {
                ContainerError::dependency_failed(key.description(), dependency.description(), error)
            })?;
            entries.push((*dependency, instance));
        }
        Ok(ResolvedDependencies::new(key, entries))
    }

    fn store(
        node: &Arc<ScopeNode>,
        registration: &Registration,
        instance: ErasedInstance,
    ) -> ErasedInstance {
        let key = registration.token();
        node.cache.insert_if_absent(CachedInstance {
            key,
            lifetime: registration.lifetime(),
            instance,
            disposal: node
                .find_registration_owner(key)
                .and_then(|owner| owner.registry.disposal_for(key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::container::erase_instance;

    #[test]
    fn test_cycle_path_starts_at_first_occurrence() {
        let a: Token<u8> = Token::new("A");
        let b: Token<u8> = Token::new("B");
        let c: Token<u8> = Token::new("C");

        let mut ctx = ResolutionContext::new(16);
        ctx.push(a.key());
        ctx.push(b.key());
        ctx.push(c.key());

        assert!(ctx.contains(b.key()));
        assert_eq!(ctx.cycle_to(b.key()), vec!["B", "C", "B"]);
        ctx.pop();
        assert_eq!(ctx.depth(), 2);
    }

    #[test]
    fn test_resolved_dependencies_lookup() {
        let owner: Token<u8> = Token::new("Owner");
        let name: Token<String> = Token::new("Name");
        let port: Token<u16> = Token::new("Port");
        let deps = ResolvedDependencies::new(
            owner.key(),
            vec![
                (name.key(), erase_instance(Arc::new("db".to_string()))),
                (port.key(), erase_instance(Arc::new(5432u16))),
            ],
        );

        assert_eq!(deps.len(), 2);
        assert_eq!(deps.get(&name).unwrap().as_str(), "db");
        assert_eq!(*deps.at::<u16>(1).unwrap(), 5432);
        assert!(deps.at::<String>(1).is_err());

        let undeclared: Token<u8> = Token::new("Undeclared");
        let err = deps.get(&undeclared).unwrap_err();
        assert!(err.to_string().contains("did not declare"));
    }
}
