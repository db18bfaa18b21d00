//! 作用域树
//!
//! 每个容器（根容器或子作用域）对应一个 [`ScopeNode`]。子节点强引用父节点，
//! 以便沿祖先链查找注册；父节点对子节点的持有放在外层的容器句柄里。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::cache::InstanceCache;
use super::registry::{Registration, ServiceRegistry};
use super::token::TokenKey;
use crate::config::ContainerConfig;
use crate::errors::ContainerError;
use crate::metrics::StatsRecorder;

pub(crate) struct ScopeNode {
    pub(crate) id: Uuid,
    /// 层级名，如 `root.request.tx`
    pub(crate) name: String,
    pub(crate) depth: usize,
    pub(crate) registry: ServiceRegistry,
    pub(crate) cache: InstanceCache,
    pub(crate) parent: Option<Arc<ScopeNode>>,
    pub(crate) stats: Arc<StatsRecorder>,
    pub(crate) config: Arc<ContainerConfig>,
    disposed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl ScopeNode {
    pub(crate) fn root(config: Arc<ContainerConfig>) -> Arc<Self> {
        let stats = Arc::new(StatsRecorder::new(config.metrics_enabled));
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: config.root_scope_name.clone(),
            depth: 0,
            registry: ServiceRegistry::new(),
            cache: InstanceCache::new(),
            parent: None,
            stats,
            config,
            disposed: AtomicBool::new(false),
            created_at: Utc::now(),
        })
    }

    /// 创建子节点；未命名时使用 `scope-<uuid>`
    pub(crate) fn create_child(self: &Arc<Self>, name: Option<&str>) -> Result<Arc<Self>, ContainerError> {
        if self.is_disposed() {
            return Err(ContainerError::disposed("create scope").with_scope(&self.name));
        }
        if self.depth >= self.config.max_scope_depth {
            return Err(ContainerError::invalid_operation(format!(
                "Maximum scope depth of {} exceeded",
                self.config.max_scope_depth
            ))
            .with_scope(&self.name));
        }

        let segment = match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("scope-{}", Uuid::new_v4()),
        };

        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            name: format!("{}.{}", self.name, segment),
            depth: self.depth + 1,
            registry: ServiceRegistry::new(),
            cache: InstanceCache::new(),
            parent: Some(self.clone()),
            stats: self.stats.clone(),
            config: self.config.clone(),
            disposed: AtomicBool::new(false),
            created_at: Utc::now(),
        }))
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// 返回 true 表示本次调用完成了状态切换
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// 沿祖先链查找注册，返回注册所在的节点
    pub(crate) fn find_registration(
        self: &Arc<Self>,
        key: TokenKey,
    ) -> Option<(Arc<ScopeNode>, Arc<Registration>)> {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if let Some(registration) = node.registry.get(key) {
                return Some((node, registration));
            }
            current = node.parent.clone();
        }
        None
    }

    pub(crate) fn find_registration_owner(self: &Arc<Self>, key: TokenKey) -> Option<Arc<ScopeNode>> {
        self.find_registration(key).map(|(owner, _)| owner)
    }

    pub(crate) fn is_visible(&self, key: TokenKey) -> bool {
        let mut current = Some(self);
        while let Some(node) = current {
            if node.registry.contains(key) {
                return true;
            }
            current = node.parent.as_deref();
        }
        false
    }

    pub(crate) fn info(&self, child_count: usize) -> ScopeInfo {
        ScopeInfo {
            id: self.id,
            name: self.name.clone(),
            depth: self.depth,
            parent_id: self.parent.as_ref().map(|parent| parent.id),
            child_count,
            registrations: self.registry.len(),
            cached_instances: self.cache.len(),
            disposed: self.is_disposed(),
            created_at: self.created_at,
        }
    }
}

/// 作用域快照
#[derive(Debug, Clone, Serialize)]
pub struct ScopeInfo {
    pub id: Uuid,
    /// 层级名
    pub name: String,
    /// 根容器为 0
    pub depth: usize,
    pub parent_id: Option<Uuid>,
    /// 仍存活的直接子作用域数
    pub child_count: usize,
    /// 本作用域自己的注册数（不含祖先）
    pub registrations: usize,
    pub cached_instances: usize,
    pub disposed: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ContainerErrorCode;

    fn root_with_depth(max_scope_depth: usize) -> Arc<ScopeNode> {
        let config = ContainerConfig {
            max_scope_depth,
            ..ContainerConfig::default()
        };
        ScopeNode::root(Arc::new(config))
    }

    #[test]
    fn test_hierarchical_names() {
        let root = root_with_depth(10);
        let request = root.create_child(Some("request")).unwrap();
        let tx = request.create_child(Some("tx")).unwrap();

        assert_eq!(root.name, "root");
        assert_eq!(request.name, "root.request");
        assert_eq!(tx.name, "root.request.tx");
        assert_eq!(tx.depth, 2);
        assert_eq!(tx.info(0).parent_id, Some(request.id));
    }

    #[test]
    fn test_unnamed_scope_gets_generated_segment() {
        let root = root_with_depth(10);
        let child = root.create_child(None).unwrap();
        let blank = root.create_child(Some("  ")).unwrap();

        assert!(child.name.starts_with("root.scope-"));
        assert!(blank.name.starts_with("root.scope-"));
        assert_ne!(child.name, blank.name);
    }

    #[test]
    fn test_depth_limit() {
        let root = root_with_depth(2);
        let first = root.create_child(Some("a")).unwrap();
        let second = first.create_child(Some("b")).unwrap();

        let err = second.create_child(Some("c")).err().unwrap();
        assert_eq!(err.code, ContainerErrorCode::InvalidOperation);
        assert!(err.message.contains("Maximum scope depth"));
    }

    #[test]
    fn test_mark_disposed_once() {
        let root = root_with_depth(10);
        assert!(root.mark_disposed());
        assert!(!root.mark_disposed());
        assert!(root.is_disposed());
        assert_eq!(
            root.create_child(Some("late")).err().unwrap().code,
            ContainerErrorCode::Disposed
        );
    }
}
