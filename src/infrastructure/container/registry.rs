//! 服务注册表：令牌到提供者的映射

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::disposal::{DisposalHooks, ErasedDisposal};
use super::resolution::ResolvedDependencies;
use super::token::{Token, TokenKey};
use super::{erase_instance, ErasedInstance, ServiceLifetime};
use crate::errors::ContainerError;

pub(crate) type ProviderFn =
    Arc<dyn Fn(&ResolvedDependencies) -> anyhow::Result<ErasedInstance> + Send + Sync>;

/// 提供者种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Class,
    Factory,
    Value,
    Alias,
}

impl ProviderKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Class => "Constructor",
            ProviderKind::Factory => "Factory",
            ProviderKind::Value => "Value",
            ProviderKind::Alias => "Alias",
        }
    }
}

#[derive(Clone)]
pub(crate) enum Provider {
    Construct(ProviderFn),
    Value(ErasedInstance),
    Alias(TokenKey),
}

/// 可由容器构造的服务类型
///
/// `dependencies` 按 `construct` 读取的顺序声明依赖令牌，容器先解析
/// 这些依赖再调用 `construct`。
///
/// ```
/// use std::sync::Arc;
/// use tokenwire::{ResolvedDependencies, ServiceClass, Token, TokenKey};
///
/// struct Greeter {
///     prefix: Arc<String>,
/// }
///
/// static PREFIX: std::sync::OnceLock<Token<String>> = std::sync::OnceLock::new();
///
/// fn prefix() -> Token<String> {
///     *PREFIX.get_or_init(|| Token::new("Prefix"))
/// }
///
/// impl ServiceClass for Greeter {
///     fn dependencies() -> Vec<TokenKey> {
///         vec![prefix().key()]
///     }
///
///     fn construct(deps: &ResolvedDependencies) -> anyhow::Result<Self> {
///         Ok(Greeter { prefix: deps.get(&prefix())? })
///     }
/// }
/// ```
pub trait ServiceClass: Sized + Send + Sync + 'static {
    fn dependencies() -> Vec<TokenKey>;

    fn construct(deps: &ResolvedDependencies) -> anyhow::Result<Self>;

    /// 类型自带的清理钩子，注册时自动挂到令牌上
    fn disposal_hooks() -> Option<DisposalHooks<Self>> {
        None
    }
}

/// 一条注册记录，注册后不可变
#[derive(Clone)]
pub struct Registration {
    token: TokenKey,
    kind: ProviderKind,
    lifetime: ServiceLifetime,
    dependencies: Vec<TokenKey>,
    pub(crate) provider: Provider,
}

impl Registration {
    pub(crate) fn class<C: ServiceClass>(token: &Token<C>, lifetime: ServiceLifetime) -> Self {
        let provider: ProviderFn = Arc::new(|deps: &ResolvedDependencies| {
            let service = C::construct(deps)?;
            Ok(erase_instance(Arc::new(service)))
        });
        Self {
            token: token.key(),
            kind: ProviderKind::Class,
            lifetime,
            dependencies: C::dependencies(),
            provider: Provider::Construct(provider),
        }
    }

    pub(crate) fn factory<T, F>(
        token: &Token<T>,
        factory: F,
        lifetime: ServiceLifetime,
        dependencies: Vec<TokenKey>,
    ) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ResolvedDependencies) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let provider: ProviderFn =
            Arc::new(move |deps: &ResolvedDependencies| factory(deps).map(erase_instance));
        Self {
            token: token.key(),
            kind: ProviderKind::Factory,
            lifetime,
            dependencies,
            provider: Provider::Construct(provider),
        }
    }

    pub(crate) fn value<T>(token: &Token<T>, value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            token: token.key(),
            kind: ProviderKind::Value,
            lifetime: ServiceLifetime::Singleton,
            dependencies: Vec::new(),
            provider: Provider::Value(erase_instance(value)),
        }
    }

    /// 别名本身不缓存，生命周期由目标决定
    pub(crate) fn alias<T: ?Sized>(alias: &Token<T>, target: &Token<T>) -> Self {
        Self {
            token: alias.key(),
            kind: ProviderKind::Alias,
            lifetime: ServiceLifetime::Transient,
            dependencies: Vec::new(),
            provider: Provider::Alias(target.key()),
        }
    }

    pub fn token(&self) -> TokenKey {
        self.token
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }

    pub fn dependencies(&self) -> &[TokenKey] {
        &self.dependencies
    }

    pub fn alias_target(&self) -> Option<TokenKey> {
        match self.provider {
            Provider::Alias(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("lifetime", &self.lifetime)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<TokenKey>,
    registrations: HashMap<TokenKey, Arc<Registration>>,
    disposal: HashMap<TokenKey, Arc<ErasedDisposal>>,
}

/// 单个容器自己的注册表（不含祖先）
#[derive(Default)]
pub(crate) struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
}

impl ServiceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        registration: Registration,
        scope: &str,
    ) -> Result<Arc<Registration>, ContainerError> {
        let mut inner = self.inner.write();
        let key = registration.token;
        if inner.registrations.contains_key(&key) {
            return Err(ContainerError::duplicate_registration(key.description()).with_scope(scope));
        }
        let registration = Arc::new(registration);
        inner.order.push(key);
        inner.registrations.insert(key, registration.clone());
        Ok(registration)
    }

    pub(crate) fn get(&self, key: TokenKey) -> Option<Arc<Registration>> {
        self.inner.read().registrations.get(&key).cloned()
    }

    pub(crate) fn contains(&self, key: TokenKey) -> bool {
        self.inner.read().registrations.contains_key(&key)
    }

    /// 按注册顺序返回
    pub(crate) fn registrations(&self) -> Vec<Arc<Registration>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|key| inner.registrations.get(key).cloned())
            .collect()
    }

    pub(crate) fn attach_disposal(
        &self,
        key: TokenKey,
        disposal: ErasedDisposal,
        scope: &str,
    ) -> Result<(), ContainerError> {
        let mut inner = self.inner.write();
        if !inner.registrations.contains_key(&key) {
            return Err(ContainerError::token_not_registered(key.description()).with_scope(scope));
        }
        inner.disposal.insert(key, Arc::new(disposal));
        Ok(())
    }

    pub(crate) fn disposal_for(&self, key: TokenKey) -> Option<Arc<ErasedDisposal>> {
        self.inner.read().disposal.get(&key).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ContainerErrorCode;

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ServiceRegistry::new();
        let token: Token<u32> = Token::new("Port");

        registry
            .register(Registration::value(&token, Arc::new(8080)), "root")
            .unwrap();
        let err = registry
            .register(Registration::value(&token, Arc::new(9090)), "root")
            .unwrap_err();

        assert_eq!(err.code, ContainerErrorCode::DuplicateRegistration);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registrations_keep_order() {
        let registry = ServiceRegistry::new();
        let second: Token<u32> = Token::new("Second");
        let first: Token<u32> = Token::new("First");

        registry
            .register(Registration::value(&second, Arc::new(2)), "root")
            .unwrap();
        registry
            .register(Registration::alias(&first, &second), "root")
            .unwrap();

        let listed: Vec<&str> = registry
            .registrations()
            .iter()
            .map(|registration| registration.token().description())
            .collect();
        assert_eq!(listed, vec!["Second", "First"]);

        let alias = registry.get(first.key()).unwrap();
        assert_eq!(alias.kind(), ProviderKind::Alias);
        assert_eq!(alias.alias_target(), Some(second.key()));
    }

    #[test]
    fn test_attach_disposal_requires_registration() {
        let registry = ServiceRegistry::new();
        let token: Token<u32> = Token::new("Missing");

        let err = registry
            .attach_disposal(token.key(), DisposalHooks::<u32>::new().erase(), "root")
            .unwrap_err();
        assert_eq!(err.code, ContainerErrorCode::TokenNotRegistered);
        assert!(registry.disposal_for(token.key()).is_none());
    }
}
