#![allow(clippy::uninlined_format_args)]
//! 容器解析与释放的性能基准测试

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokenwire::{ResolvedDependencies, ServiceContainer, ServiceLifetime, Token, TokenKey};

/// 测试用的简单服务
struct SimpleService {
    value: u64,
}

/// 依赖链上的一环
struct ChainLink {
    depth: usize,
    _next: Option<Arc<ChainLink>>,
}

fn chain_tokens(length: usize) -> Vec<Token<ChainLink>> {
    (0..length)
        .map(|i| Token::new(Box::leak(format!("Link{}", i).into_boxed_str())))
        .collect()
}

/// 注册一条依赖链，`tokens[i]` 依赖 `tokens[i + 1]`
fn register_chain(container: &ServiceContainer, tokens: &[Token<ChainLink>], lifetime: ServiceLifetime) {
    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).copied();
        let deps: Vec<TokenKey> = next.iter().map(Token::key).collect();
        container
            .register_factory(
                token,
                move |resolved: &ResolvedDependencies| {
                    let next = match next {
                        Some(next) => Some(resolved.get(&next)?),
                        None => None,
                    };
                    Ok(Arc::new(ChainLink { depth: i, _next: next }))
                },
                lifetime,
                deps,
            )
            .unwrap();
    }
}

fn bench_singleton_resolution(c: &mut Criterion) {
    let container = ServiceContainer::new();
    let token: Token<SimpleService> = Token::new("Simple");
    container
        .register_factory(
            &token,
            |_| Ok(Arc::new(SimpleService { value: 7 })),
            ServiceLifetime::Singleton,
            [],
        )
        .unwrap();
    container.validate().unwrap();

    c.bench_function("singleton_cached_resolution", |b| {
        b.iter(|| {
            let service = container.resolve_with_error(black_box(&token)).unwrap();
            black_box(service.value)
        })
    });
}

fn bench_transient_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_chain_resolution");

    for length in [1usize, 8, 32].iter() {
        let container = ServiceContainer::new();
        let tokens = chain_tokens(*length);
        register_chain(&container, &tokens, ServiceLifetime::Transient);
        container.validate().unwrap();
        let head = tokens[0];

        group.bench_with_input(BenchmarkId::from_parameter(length), length, |b, _| {
            b.iter(|| {
                let link = container.resolve_with_error(&head).unwrap();
                black_box(link.depth)
            })
        });
    }

    group.finish();
}

fn bench_scope_lifecycle(c: &mut Criterion) {
    let container = ServiceContainer::new();
    let request: Token<SimpleService> = Token::new("Request");
    container
        .register_factory(
            &request,
            |_| Ok(Arc::new(SimpleService { value: 1 })),
            ServiceLifetime::Scoped,
            [],
        )
        .unwrap();
    container.validate().unwrap();

    c.bench_function("scope_create_resolve_dispose", |b| {
        b.iter(|| {
            let scope = container.create_unnamed_scope().unwrap();
            scope.validate().unwrap();
            let service = scope.resolve_with_error(&request).unwrap();
            black_box(service.value);
            scope.dispose().unwrap();
        })
    });
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    for length in [10usize, 100].iter() {
        let tokens = chain_tokens(*length);
        group.bench_with_input(BenchmarkId::from_parameter(length), length, |b, _| {
            b.iter(|| {
                let container = ServiceContainer::new();
                register_chain(&container, &tokens, ServiceLifetime::Singleton);
                container.validate().unwrap();
                black_box(container.stats().registered_services)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_singleton_resolution,
    bench_transient_chain,
    bench_scope_lifecycle,
    bench_validation
);
criterion_main!(benches);
