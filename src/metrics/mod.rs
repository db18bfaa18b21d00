// 容器运行指标
// 原子计数器、按令牌的耗时统计，以及对外暴露错误前的脱敏

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ContainerError, ContainerErrorCode};
use crate::infrastructure::container::{ServiceContainer, Token, TokenKey};
use crate::logging::{LoggingEnvironment, OperationTimer};

/// 整棵作用域树共享的计数器
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    enabled: bool,
    total_resolutions: AtomicU64,
    failed_resolutions: AtomicU64,
    singleton_cache_hits: AtomicU64,
    singleton_cache_misses: AtomicU64,
    scoped_cache_hits: AtomicU64,
    scoped_creations: AtomicU64,
    transient_creations: AtomicU64,
    circular_dependency_errors: AtomicU64,
    disposal_failures: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    fn bump(&self, counter: &AtomicU64, amount: u64) {
        if self.enabled {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_resolution(&self) {
        self.bump(&self.total_resolutions, 1);
    }

    pub(crate) fn record_failure(&self) {
        self.bump(&self.failed_resolutions, 1);
    }

    pub(crate) fn record_singleton_hit(&self) {
        self.bump(&self.singleton_cache_hits, 1);
    }

    pub(crate) fn record_singleton_miss(&self) {
        self.bump(&self.singleton_cache_misses, 1);
    }

    pub(crate) fn record_scoped_hit(&self) {
        self.bump(&self.scoped_cache_hits, 1);
    }

    pub(crate) fn record_scoped_creation(&self) {
        self.bump(&self.scoped_creations, 1);
    }

    pub(crate) fn record_transient_creation(&self) {
        self.bump(&self.transient_creations, 1);
    }

    pub(crate) fn record_circular_dependency(&self) {
        self.bump(&self.circular_dependency_errors, 1);
    }

    pub(crate) fn record_disposal_failures(&self, count: usize) {
        self.bump(&self.disposal_failures, count as u64);
    }

    pub(crate) fn snapshot(
        &self,
        registered_services: usize,
        active_instances: usize,
        child_scopes: usize,
    ) -> ContainerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ContainerStats {
            total_resolutions: load(&self.total_resolutions),
            failed_resolutions: load(&self.failed_resolutions),
            singleton_cache_hits: load(&self.singleton_cache_hits),
            singleton_cache_misses: load(&self.singleton_cache_misses),
            scoped_cache_hits: load(&self.scoped_cache_hits),
            scoped_creations: load(&self.scoped_creations),
            transient_creations: load(&self.transient_creations),
            circular_dependency_errors: load(&self.circular_dependency_errors),
            disposal_failures: load(&self.disposal_failures),
            registered_services,
            active_instances,
            child_scopes,
        }
    }
}

/// 容器统计快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// 顶层解析调用次数
    pub total_resolutions: u64,
    /// 失败的顶层解析次数
    pub failed_resolutions: u64,
    /// 单例缓存命中
    pub singleton_cache_hits: u64,
    /// 单例缓存未命中（即单例构造次数）
    pub singleton_cache_misses: u64,
    /// 作用域缓存命中
    pub scoped_cache_hits: u64,
    pub scoped_creations: u64,
    pub transient_creations: u64,
    pub circular_dependency_errors: u64,
    /// 清理钩子失败次数
    pub disposal_failures: u64,
    /// 本容器自己的注册数
    pub registered_services: usize,
    /// 本容器缓存中的实例数
    pub active_instances: usize,
    /// 存活的直接子作用域数
    pub child_scopes: usize,
}

impl ContainerStats {
    /// 获取总解析次数
    pub fn total(&self) -> u64 {
        self.total_resolutions
    }

    /// 缓存命中率（单例与作用域合计），0.0 - 1.0
    pub fn hit_rate(&self) -> f64 {
        let hits = self.singleton_cache_hits + self.scoped_cache_hits;
        let lookups = hits + self.singleton_cache_misses + self.scoped_creations;
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }

    /// 成功率，0.0 - 1.0
    pub fn success_rate(&self) -> f64 {
        if self.total_resolutions == 0 {
            1.0
        } else {
            (self.total_resolutions - self.failed_resolutions.min(self.total_resolutions)) as f64
                / self.total_resolutions as f64
        }
    }

    /// 一行性能摘要，适合写入日志
    pub fn performance_summary(&self) -> String {
        format!(
            "resolutions={} failed={} hit_rate={:.1}% singletons={} scoped={} transients={} cycles={} disposal_failures={}",
            self.total_resolutions,
            self.failed_resolutions,
            self.hit_rate() * 100.0,
            self.singleton_cache_misses,
            self.scoped_creations,
            self.transient_creations,
            self.circular_dependency_errors,
            self.disposal_failures,
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 单个令牌的解析耗时
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTiming {
    pub resolutions: u64,
    pub failures: u64,
    /// 累计耗时（微秒）
    pub total_micros: u64,
    /// 最长一次耗时（微秒）
    pub max_micros: u64,
}

impl TokenTiming {
    pub fn average_micros(&self) -> f64 {
        if self.resolutions == 0 {
            0.0
        } else {
            self.total_micros as f64 / self.resolutions as f64
        }
    }
}

/// 按令牌聚合解析耗时
#[derive(Debug, Default)]
pub struct MetricsCollector {
    timings: DashMap<TokenKey, TokenTiming>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, token: TokenKey, elapsed: Duration, success: bool) {
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let mut timing = self.timings.entry(token).or_default();
        timing.resolutions += 1;
        if !success {
            timing.failures += 1;
        }
        timing.total_micros = timing.total_micros.saturating_add(micros);
        timing.max_micros = timing.max_micros.max(micros);
    }

    pub fn timing_for(&self, token: TokenKey) -> Option<TokenTiming> {
        self.timings.get(&token).map(|entry| entry.value().clone())
    }

    /// 按令牌描述排序的快照
    pub fn snapshot(&self) -> Vec<(String, TokenTiming)> {
        let mut entries: Vec<(String, TokenTiming)> = self
            .timings
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn reset(&self) {
        self.timings.clear();
    }
}

/// 生产环境下去掉错误中的内部细节，只保留错误码
#[derive(Debug, Clone, Copy)]
pub struct ErrorSanitizer {
    environment: LoggingEnvironment,
}

impl ErrorSanitizer {
    pub fn new(environment: LoggingEnvironment) -> Self {
        Self { environment }
    }

    pub fn sanitize(&self, error: ContainerError) -> ContainerError {
        if !self.environment.is_production() {
            return error;
        }
        let mut sanitized = ContainerError::new(error.code, Self::public_message(error.code));
        sanitized.timestamp = error.timestamp;
        sanitized
    }

    fn public_message(code: ContainerErrorCode) -> &'static str {
        match code {
            ContainerErrorCode::TokenNotRegistered
            | ContainerErrorCode::AliasTargetNotFound => "Requested service is not available",
            ContainerErrorCode::Disposed => "Service container is no longer available",
            ContainerErrorCode::NotValidated => "Service container is not ready",
            ContainerErrorCode::DisposalFailed => "Service cleanup failed",
            _ => "Service resolution failed",
        }
    }
}

/// 带计时与脱敏的解析入口，只依赖容器的公开 API
#[derive(Debug, Clone)]
pub struct ResolutionObserver {
    container: ServiceContainer,
    collector: Arc<MetricsCollector>,
    sanitizer: ErrorSanitizer,
}

impl ResolutionObserver {
    pub fn new(container: ServiceContainer) -> Self {
        let sanitizer = ErrorSanitizer::new(container.config().environment);
        Self {
            container,
            collector: Arc::new(MetricsCollector::new()),
            sanitizer,
        }
    }

    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: ErrorSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn resolve<T>(&self, token: &Token<T>) -> Result<Arc<T>, ContainerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let timer = OperationTimer::new("resolve").with_token(token.description());
        let result = self.container.resolve_with_error(token);
        let elapsed = timer.finish(result.is_ok());
        self.collector.record(token.key(), elapsed, result.is_ok());

        result.map_err(|error| {
            tracing::warn!(
                token = token.description(),
                code = %error.code,
                error = %error,
                "Observed resolution failure"
            );
            self.sanitizer.sanitize(error)
        })
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_disabled_keeps_zero() {
        let recorder = StatsRecorder::new(false);
        recorder.record_resolution();
        recorder.record_singleton_hit();
        let stats = recorder.snapshot(1, 0, 0);
        assert_eq!(stats.total_resolutions, 0);
        assert_eq!(stats.singleton_cache_hits, 0);
        assert_eq!(stats.registered_services, 1);
    }

    #[test]
    fn test_hit_rate_and_summary() {
        let recorder = StatsRecorder::new(true);
        for _ in 0..4 {
            recorder.record_resolution();
        }
        recorder.record_singleton_miss();
        recorder.record_singleton_hit();
        recorder.record_singleton_hit();
        recorder.record_singleton_hit();

        let stats = recorder.snapshot(2, 1, 0);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(stats.performance_summary().contains("hit_rate=75.0%"));

        let json = stats.to_json().unwrap();
        let parsed: ContainerStats = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stats);
    }

    #[test]
    fn test_collector_aggregates_per_token() {
        let collector = MetricsCollector::new();
        let token: Token<u8> = Token::new("Clock");
        collector.record(token.key(), Duration::from_micros(10), true);
        collector.record(token.key(), Duration::from_micros(30), false);

        let timing = collector.timing_for(token.key()).unwrap();
        assert_eq!(timing.resolutions, 2);
        assert_eq!(timing.failures, 1);
        assert_eq!(timing.max_micros, 30);
        assert!((timing.average_micros() - 20.0).abs() < f64::EPSILON);
        assert_eq!(collector.snapshot()[0].0, "Clock");

        collector.reset();
        assert!(collector.timing_for(token.key()).is_none());
    }

    #[test]
    fn test_sanitizer_strips_details_in_production() {
        let error = ContainerError::token_not_registered("SecretStore")
            .with_scope("root.tenant-42")
            .with_cause(std::io::Error::new(std::io::ErrorKind::Other, "vault path"));

        let sanitized = ErrorSanitizer::new(LoggingEnvironment::Production).sanitize(error);
        assert_eq!(sanitized.code, ContainerErrorCode::TokenNotRegistered);
        assert!(sanitized.token_description.is_none());
        assert!(sanitized.cause.is_none());
        assert!(sanitized.scope.is_none());
        assert!(!sanitized.to_string().contains("SecretStore"));

        let detailed = ErrorSanitizer::new(LoggingEnvironment::Development)
            .sanitize(ContainerError::token_not_registered("SecretStore"));
        assert_eq!(detailed.token_description.as_deref(), Some("SecretStore"));
    }
}
