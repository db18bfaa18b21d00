//! 按创建顺序记录的实例缓存

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::disposal::ErasedDisposal;
use super::token::TokenKey;
use super::{ErasedInstance, ServiceLifetime};

/// 缓存中的一个实例及其清理钩子
#[derive(Clone)]
pub(crate) struct CachedInstance {
    pub(crate) key: TokenKey,
    pub(crate) lifetime: ServiceLifetime,
    pub(crate) instance: ErasedInstance,
    pub(crate) disposal: Option<Arc<ErasedDisposal>>,
}

#[derive(Default)]
struct CacheInner {
    order: Vec<TokenKey>,
    instances: HashMap<TokenKey, CachedInstance>,
}

/// 单个容器独占的实例缓存
///
/// `order` 保存插入顺序；依赖总是先于依赖者完成构造并入缓存，
/// 因此倒序遍历即可得到安全的释放顺序。
#[derive(Default)]
pub(crate) struct InstanceCache {
    inner: RwLock<CacheInner>,
    /// 串行化本容器内的缓存型构造；可重入，嵌套依赖只会再去锁祖先容器
    construction: ReentrantMutex<()>,
}

impl InstanceCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: TokenKey) -> Option<ErasedInstance> {
        self.inner
            .read()
            .instances
            .get(&key)
            .map(|entry| entry.instance.clone())
    }

    pub(crate) fn lock_construction(&self) -> ReentrantMutexGuard<'_, ()> {
        self.construction.lock()
    }

    /// 插入实例；若已存在则保留先到者并返回它
    pub(crate) fn insert_if_absent(&self, entry: CachedInstance) -> ErasedInstance {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.instances.get(&entry.key) {
            return existing.instance.clone();
        }
        let instance = entry.instance.clone();
        inner.order.push(entry.key);
        inner.instances.insert(entry.key, entry);
        instance
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// 取出全部实例（创建顺序）并清空缓存
    pub(crate) fn drain(&self) -> Vec<CachedInstance> {
        let mut inner = self.inner.write();
        let CacheInner { order, instances } = std::mem::take(&mut *inner);
        let mut instances = instances;
        order
            .into_iter()
            .filter_map(|key| instances.remove(&key))
            .collect()
    }
}
