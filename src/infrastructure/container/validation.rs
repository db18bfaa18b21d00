//! 容器校验：注册期 -> 校验中 -> 已校验 的状态机，以及依赖图

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::registry::Registration;
use super::scope::ScopeNode;
use super::token::TokenKey;
use crate::errors::{ContainerError, ContainerErrorCode};

/// 容器所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    Registering,
    Validating,
    Validated,
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValidationState::Registering => "registering",
            ValidationState::Validating => "validating",
            ValidationState::Validated => "validated",
        };
        f.write_str(label)
    }
}

pub(crate) struct ValidationStateMachine {
    state: RwLock<ValidationState>,
    /// 同一时刻只允许一次校验；后到者等待并读取其结果
    in_flight: Mutex<()>,
}

impl ValidationStateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ValidationState::Registering),
            in_flight: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> ValidationState {
        *self.state.read()
    }

    /// 在注册阶段执行 `register`；持有读锁，校验无法在注册途中开始
    pub(crate) fn while_registering<R>(
        &self,
        token: &str,
        register: impl FnOnce() -> Result<R, ContainerError>,
    ) -> Result<R, ContainerError> {
        let state = self.state.read();
        if *state != ValidationState::Registering {
            return Err(ContainerError::invalid_operation(format!(
                "Cannot register {} after validation (container is {})",
                token, *state
            ))
            .with_token(token));
        }
        register()
    }

    /// 驱动一次校验；已校验时直接返回成功
    ///
    /// 并发调用按顺序执行：等待者拿到锁后重新读取状态，前一次校验成功则直接返回成功，
    /// 失败则状态已回到注册期，由等待者重新检查并得到同样的结论。
    pub(crate) fn run(
        &self,
        check: impl FnOnce() -> Result<(), ContainerError>,
    ) -> Result<(), ContainerError> {
        let _in_flight = self.in_flight.lock();
        {
            let mut state = self.state.write();
            match *state {
                ValidationState::Validated => return Ok(()),
                // 持有 in_flight 时不会出现
                ValidationState::Validating => {
                    return Err(ContainerError::invalid_operation(
                        "Validation already in progress",
                    ))
                }
                ValidationState::Registering => *state = ValidationState::Validating,
            }
        }

        let outcome = check();
        *self.state.write() = match outcome {
            Ok(()) => ValidationState::Validated,
            Err(_) => ValidationState::Registering,
        };
        outcome
    }

    pub(crate) fn reset(&self) {
        *self.state.write() = ValidationState::Registering;
    }
}

/// 检查某个容器自己的注册是否都能被满足（依赖可在自身或祖先中找到）
pub(crate) struct ContainerValidator;

impl ContainerValidator {
    /// 遇到第一个问题即返回
    pub(crate) fn validate(node: &Arc<ScopeNode>) -> Result<(), ContainerError> {
        for registration in node.registry.registrations() {
            if let Some(error) = Self::check(node, &registration).into_iter().next() {
                return Err(error);
            }
        }
        Ok(())
    }

    /// 收集全部问题，不改变容器状态
    pub(crate) fn diagnose(node: &Arc<ScopeNode>) -> Vec<ContainerError> {
        node.registry
            .registrations()
            .iter()
            .flat_map(|registration| Self::check(node, registration))
            .collect()
    }

    fn check(node: &Arc<ScopeNode>, registration: &Registration) -> Vec<ContainerError> {
        let mut errors = Vec::new();
        let token = registration.token();

        if let Some(target) = registration.alias_target() {
            if !node.is_visible(target) {
                errors.push(
                    ContainerError::new(
                        ContainerErrorCode::AliasTargetNotFound,
                        format!("Alias {} points to {} which is not registered", token, target),
                    )
                    .with_token(token.description())
                    .with_scope(&node.name),
                );
            }
        }

        for dependency in registration.dependencies() {
            if !node.is_visible(*dependency) {
                errors.push(
                    ContainerError::new(
                        ContainerErrorCode::TokenNotRegistered,
                        format!("{} depends on {} which is not registered", token, dependency),
                    )
                    .with_token(dependency.description())
                    .with_scope(&node.name),
                );
            }
        }

        errors
    }
}

/// 从某个容器看到的依赖图；子容器的注册会遮蔽祖先中的同名令牌
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<TokenKey>,
    index: HashMap<TokenKey, usize>,
    edges: Vec<Vec<TokenKey>>,
}

impl DependencyGraph {
    pub(crate) fn build(node: &Arc<ScopeNode>) -> Self {
        let mut graph = Self::default();
        let mut current = Some(node.clone());
        while let Some(scope) = current {
            for registration in scope.registry.registrations() {
                let key = registration.token();
                if graph.index.contains_key(&key) {
                    continue;
                }
                let mut edges: Vec<TokenKey> = registration.dependencies().to_vec();
                if let Some(target) = registration.alias_target() {
                    edges.push(target);
                }
                graph.index.insert(key, graph.nodes.len());
                graph.nodes.push(key);
                graph.edges.push(edges);
            }
            current = scope.parent.clone();
        }
        graph
    }

    pub fn tokens(&self) -> &[TokenKey] {
        &self.nodes
    }

    pub fn contains(&self, key: TokenKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn dependencies_of(&self, key: TokenKey) -> &[TokenKey] {
        self.index
            .get(&key)
            .map(|position| self.edges[*position].as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 三色 DFS 找出一个环，返回从入环令牌到重复令牌的路径
    pub fn find_cycle(&self) -> Option<Vec<TokenKey>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if marks[start] != Mark::White {
                continue;
            }
            // (节点, 下一条待访问的边)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Gray;

            while let Some((current, edge)) = stack.last_mut() {
                let current = *current;
                let Some(next_key) = self.edges[current].get(*edge).copied() else {
                    marks[current] = Mark::Black;
                    stack.pop();
                    continue;
                };
                *edge += 1;

                // 未注册的依赖由校验负责报告
                let Some(&next) = self.index.get(&next_key) else {
                    continue;
                };
                match marks[next] {
                    Mark::White => {
                        marks[next] = Mark::Gray;
                        stack.push((next, 0));
                    }
                    Mark::Gray => {
                        let entry = stack
                            .iter()
                            .position(|(frame, _)| *frame == next)
                            .unwrap_or(0);
                        let mut cycle: Vec<TokenKey> =
                            stack[entry..].iter().map(|(frame, _)| self.nodes[*frame]).collect();
                        cycle.push(self.nodes[next]);
                        return Some(cycle);
                    }
                    Mark::Black => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_round_trip() {
        let machine = ValidationStateMachine::new();
        assert_eq!(machine.state(), ValidationState::Registering);

        let err = machine
            .run(|| Err(ContainerError::token_not_registered("Missing")))
            .unwrap_err();
        assert_eq!(err.code, ContainerErrorCode::TokenNotRegistered);
        assert_eq!(machine.state(), ValidationState::Registering);

        machine.run(|| Ok(())).unwrap();
        assert_eq!(machine.state(), ValidationState::Validated);

        // 已校验后再次校验不会重新检查
        machine
            .run(|| Err(ContainerError::invalid_operation("should not run")))
            .unwrap();

        let err = machine.while_registering("Late", || Ok(())).unwrap_err();
        assert_eq!(err.code, ContainerErrorCode::InvalidOperation);

        machine.reset();
        assert!(machine.while_registering("Late", || Ok(())).is_ok());
    }

    #[test]
    fn test_concurrent_runs_share_outcome() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Barrier;
        use std::thread;
        use std::time::Duration;

        let machine = Arc::new(ValidationStateMachine::new());
        let checks = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let machine = machine.clone();
                let checks = checks.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    machine.run(|| {
                        checks.fetch_add(1, Ordering::SeqCst);
                        // 拉长校验窗口，让另一个线程在校验途中进入
                        thread::sleep(Duration::from_millis(50));
                        Ok(())
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        // 第二个调用者看到已校验状态，不再重复检查
        assert_eq!(checks.load(Ordering::SeqCst), 1);
        assert_eq!(machine.state(), ValidationState::Validated);
    }

    #[test]
    fn test_validation_state_display() {
        assert_eq!(ValidationState::Validated.to_string(), "validated");
        assert_eq!(
            serde_json::to_string(&ValidationState::Registering).unwrap(),
            "\"registering\""
        );
    }
}
