//! 服务令牌
//!
//! 令牌按身份比较而不是按名称比较：两个同名令牌互不相同。
//! `Token<T>` 在调用处携带服务类型，容器内部只使用类型擦除后的 [`TokenKey`]。

use dashmap::DashSet;
use lazy_static::lazy_static;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    /// 通过 `mark_as_api_safe` 标记过的令牌
    static ref API_SAFE_TOKENS: DashSet<u64> = DashSet::new();
}

/// 类型擦除的令牌句柄
#[derive(Clone, Copy)]
pub struct TokenKey {
    id: u64,
    description: &'static str,
}

impl TokenKey {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn description(&self) -> &'static str {
        self.description
    }
}

impl PartialEq for TokenKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TokenKey {}

impl Hash for TokenKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description)
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}#{})", self.description, self.id)
    }
}

/// 指向服务类型 `T` 的唯一令牌
///
/// `T` 可以是 trait object，例如 `Token<dyn Logger>`，解析结果统一为 `Arc<T>`。
pub struct Token<T: ?Sized> {
    key: TokenKey,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> Token<T> {
    /// 铸造一个新令牌，每次调用得到的身份都不同
    pub fn new(description: &'static str) -> Self {
        Self {
            key: TokenKey {
                id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                description,
            },
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> TokenKey {
        self.key
    }

    pub fn description(&self) -> &'static str {
        self.key.description
    }
}

impl<T: ?Sized> Clone for Token<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Token<T> {}

impl<T: ?Sized> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T: ?Sized> Eq for Token<T> {}

impl<T: ?Sized> Hash for Token<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.key, f)
    }
}

impl<T: ?Sized> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key.description)
    }
}

impl<T: ?Sized> From<&Token<T>> for TokenKey {
    fn from(token: &Token<T>) -> Self {
        token.key
    }
}

impl<T: ?Sized> From<Token<T>> for TokenKey {
    fn from(token: Token<T>) -> Self {
        token.key
    }
}

/// 允许通过抛出式 `resolve` 对外暴露的令牌
pub struct ApiSafeToken<T: ?Sized> {
    token: Token<T>,
}

impl<T: ?Sized> ApiSafeToken<T> {
    pub fn token(&self) -> &Token<T> {
        &self.token
    }

    pub fn key(&self) -> TokenKey {
        self.token.key
    }
}

impl<T: ?Sized> Clone for ApiSafeToken<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for ApiSafeToken<T> {}

impl<T: ?Sized> fmt::Debug for ApiSafeToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiSafe{:?}", self.token.key)
    }
}

impl<T: ?Sized> std::ops::Deref for ApiSafeToken<T> {
    type Target = Token<T>;

    fn deref(&self) -> &Token<T> {
        &self.token
    }
}

/// 将令牌标记为可对外暴露
///
/// 只应在组合根（构建公共 API 的地方）调用，内部代码应使用 `resolve_with_error`。
pub fn mark_as_api_safe<T: ?Sized>(token: &Token<T>) -> ApiSafeToken<T> {
    API_SAFE_TOKENS.insert(token.key.id);
    ApiSafeToken { token: *token }
}

/// 运行时检查令牌是否被标记过
pub fn is_api_safe_token(key: impl Into<TokenKey>) -> bool {
    API_SAFE_TOKENS.contains(&key.into().id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    trait Greeter {}

    #[test]
    fn test_tokens_with_same_label_are_distinct() {
        let a: Token<String> = Token::new("Config");
        let b: Token<String> = Token::new("Config");

        assert_ne!(a, b);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.description(), b.description());
    }

    #[test]
    fn test_copies_share_identity() {
        let a: Token<dyn Greeter> = Token::new("Greeter");
        let b = a;
        assert_eq!(a, b);

        let mut keys = HashSet::new();
        keys.insert(a.key());
        assert!(keys.contains(&TokenKey::from(&b)));
    }

    #[test]
    fn test_formatting() {
        let token: Token<u32> = Token::new("Port");
        assert_eq!(token.to_string(), "Port");
        assert!(format!("{:?}", token).starts_with("Token(Port#"));
    }

    #[test]
    fn test_api_safe_marking() {
        let internal: Token<u32> = Token::new("Internal");
        let exposed: Token<u32> = Token::new("Exposed");

        let safe = mark_as_api_safe(&exposed);

        assert!(is_api_safe_token(&exposed));
        assert!(is_api_safe_token(safe.key()));
        assert!(!is_api_safe_token(&internal));
        assert_eq!(*safe.token(), exposed);
        assert_eq!(safe.description(), "Exposed");
    }
}
