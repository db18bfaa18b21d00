//! 释放协调器
//!
//! 清理能力在注册时就被解析成闭包（见 [`DisposalHooks`]），
//! 释放阶段只需按创建顺序的倒序逐个调用，单个失败不会中断后续释放。

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

use super::cache::CachedInstance;
use super::{downcast_instance, ErasedInstance};
use crate::errors::{ContainerError, ContainerErrorCode};

/// 需要同步清理的服务
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;
}

/// 需要异步清理的服务（连接、文件句柄等）
#[async_trait]
pub trait AsyncDisposable: Send + Sync {
    async fn dispose_async(&self) -> anyhow::Result<()>;
}

type SyncHook<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;
type AsyncHook<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 某个令牌的清理钩子
pub struct DisposalHooks<T: ?Sized> {
    on_dispose: Option<SyncHook<T>>,
    on_dispose_async: Option<AsyncHook<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> DisposalHooks<T> {
    pub fn new() -> Self {
        Self {
            on_dispose: None,
            on_dispose_async: None,
        }
    }

    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_dispose = Some(Arc::new(hook));
        self
    }

    pub fn on_dispose_async<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_dispose_async = Some(Arc::new(move |service| hook(service).boxed()));
        self
    }

    /// 使用 [`Disposable::dispose`]
    pub fn disposable() -> Self
    where
        T: Disposable,
    {
        Self::new().on_dispose(|service: &T| service.dispose())
    }

    /// 使用 [`AsyncDisposable::dispose_async`]
    pub fn async_disposable() -> Self
    where
        T: AsyncDisposable,
    {
        Self::new().on_dispose_async(|service: Arc<T>| async move { service.dispose_async().await })
    }

    pub fn is_empty(&self) -> bool {
        self.on_dispose.is_none() && self.on_dispose_async.is_none()
    }

    pub(crate) fn erase(self) -> ErasedDisposal {
        let sync = self.on_dispose.map(|hook| {
            let erased: ErasedSyncHook = Arc::new(move |instance: &ErasedInstance| {
                let service = downcast_instance::<T>(instance)
                    .ok_or_else(|| anyhow::anyhow!("cached instance has an unexpected type"))?;
                hook(service.as_ref())
            });
            erased
        });

        let asynchronous = self.on_dispose_async.map(|hook| {
            let erased: ErasedAsyncHook = Arc::new(move |instance: ErasedInstance| {
                match downcast_instance::<T>(&instance) {
                    Some(service) => hook(service),
                    None => futures_util::future::ready(Err(anyhow::anyhow!(
                        "cached instance has an unexpected type"
                    )))
                    .boxed(),
                }
            });
            erased
        });

        ErasedDisposal { sync, asynchronous }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for DisposalHooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

type ErasedSyncHook = Arc<dyn Fn(&ErasedInstance) -> anyhow::Result<()> + Send + Sync>;
type ErasedAsyncHook =
    Arc<dyn Fn(ErasedInstance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) struct ErasedDisposal {
    sync: Option<ErasedSyncHook>,
    asynchronous: Option<ErasedAsyncHook>,
}

/// 逐个执行一个容器缓存中的清理钩子
pub(crate) struct DisposalCoordinator<'a> {
    scope_name: &'a str,
}

impl<'a> DisposalCoordinator<'a> {
    pub(crate) fn new(scope_name: &'a str) -> Self {
        Self { scope_name }
    }

    /// 同步释放；只有异步钩子的实例会被跳过
    pub(crate) fn dispose(&self, entries: Vec<CachedInstance>) -> Vec<ContainerError> {
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            let Some(disposal) = entry.disposal.as_ref() else {
                continue;
            };
            match disposal.sync.as_ref() {
                Some(hook) => {
                    if let Err(error) = hook(&entry.instance) {
                        failures.push(self.failure(&entry, error));
                    }
                }
                None => {
                    tracing::debug!(
                        scope = self.scope_name,
                        token = entry.key.description(),
                        "Skipping async-only cleanup during synchronous dispose"
                    );
                }
            }
        }

        failures
    }

    /// 异步释放：依次 await，优先使用异步钩子，否则退回同步钩子
    pub(crate) async fn dispose_async(&self, entries: Vec<CachedInstance>) -> Vec<ContainerError> {
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            let Some(disposal) = entry.disposal.clone() else {
                continue;
            };
            let outcome = if let Some(hook) = disposal.asynchronous.as_ref() {
                hook(entry.instance.clone()).await
            } else if let Some(hook) = disposal.sync.as_ref() {
                hook(&entry.instance)
            } else {
                Ok(())
            };

            if let Err(error) = outcome {
                failures.push(self.failure(&entry, error));
            }
        }

        failures
    }

    fn failure(&self, entry: &CachedInstance, error: anyhow::Error) -> ContainerError {
        let token = entry.key.description();
        tracing::warn!(
            scope = self.scope_name,
            token,
            lifetime = ?entry.lifetime,
            error = %error,
            "Service cleanup failed, continuing with remaining instances"
        );
        ContainerError::new(
            ContainerErrorCode::DisposalFailed,
            format!("Error disposing service {}: {}", token, error),
        )
        .with_token(token)
        .with_scope(self.scope_name)
        .with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::container::erase_instance;
    use crate::infrastructure::container::token::Token;
    use crate::infrastructure::container::ServiceLifetime;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Disposable for Recorder {
        fn dispose(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("sync:{}", self.name));
            if self.fail {
                anyhow::bail!("{} refused to close", self.name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AsyncDisposable for Recorder {
        async fn dispose_async(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("async:{}", self.name));
            Ok(())
        }
    }

    fn entry(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool, hooks: DisposalHooks<Recorder>) -> CachedInstance {
        let token: Token<Recorder> = Token::new(name);
        CachedInstance {
            key: token.key(),
            lifetime: ServiceLifetime::Singleton,
            instance: erase_instance(Arc::new(Recorder {
                name,
                log: log.clone(),
                fail,
            })),
            disposal: Some(Arc::new(hooks.erase())),
        }
    }

    #[test]
    fn test_sync_dispose_reverse_order_and_partial_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entries = vec![
            entry("first", &log, false, DisposalHooks::disposable()),
            entry("second", &log, true, DisposalHooks::disposable()),
            entry("third", &log, false, DisposalHooks::disposable()),
        ];

        let failures = DisposalCoordinator::new("root").dispose(entries);

        assert_eq!(*log.lock(), vec!["sync:third", "sync:second", "sync:first"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code, ContainerErrorCode::DisposalFailed);
        assert_eq!(failures[0].token_description.as_deref(), Some("second"));
    }

    #[test]
    fn test_sync_dispose_skips_async_only_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entries = vec![entry("pool", &log, false, DisposalHooks::async_disposable())];

        let failures = DisposalCoordinator::new("root").dispose(entries);

        assert!(failures.is_empty());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_async_dispose_prefers_async_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let both = DisposalHooks::<Recorder>::disposable()
            .on_dispose_async(|service: Arc<Recorder>| async move { service.dispose_async().await });
        let entries = vec![
            entry("sync-only", &log, false, DisposalHooks::disposable()),
            entry("both", &log, false, both),
        ];

        let failures =
            tokio_test::block_on(DisposalCoordinator::new("root").dispose_async(entries));

        assert!(failures.is_empty());
        assert_eq!(*log.lock(), vec!["async:both", "sync:sync-only"]);
    }

    #[test]
    fn test_empty_hooks() {
        assert!(DisposalHooks::<Recorder>::new().is_empty());
        assert!(!DisposalHooks::<Recorder>::disposable().is_empty());
    }
}
