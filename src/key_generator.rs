//! Key generation utilities for rate limiting.

use crate::error::{ThrottlerError, ThrottlerResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Derives a key from request headers, client IP and path.
pub type KeyFn =
    Arc<dyn Fn(&HashMap<String, String>, &str, &str) -> ThrottlerResult<String> + Send + Sync>;

/// Strategy for generating rate limit keys
#[derive(Clone)]
pub enum KeyStrategy {
    /// Use client IP address
    IpAddress,
    /// Use API key from header
    ApiKey,
    /// Use user ID from token/auth
    UserId,
    /// Composite key from multiple sources
    Composite(Vec<KeyStrategy>),
    /// Caller-supplied derivation
    Custom(KeyFn),
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::IpAddress => f.write_str("IpAddress"),
            KeyStrategy::ApiKey => f.write_str("ApiKey"),
            KeyStrategy::UserId => f.write_str("UserId"),
            KeyStrategy::Composite(parts) => f.debug_tuple("Composite").field(parts).finish(),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Generates rate limiting keys based on request context
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    default_strategy: KeyStrategy,
}

impl KeyGenerator {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self {
            default_strategy: strategy,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&HashMap<String, String>, &str, &str) -> ThrottlerResult<String> + Send + Sync + 'static,
    {
        Self::new(KeyStrategy::Custom(Arc::new(f)))
    }

    pub fn strategy(&self) -> &KeyStrategy {
        &self.default_strategy
    }

    /// Generate a rate limit key from request headers and metadata
    pub fn generate_key(
        &self,
        headers: &HashMap<String, String>,
        client_ip: &str,
        path: &str,
    ) -> ThrottlerResult<String> {
        self.generate_key_with_strategy(&self.default_strategy, headers, client_ip, path)
    }

    /// Generate key using a specific strategy
    pub fn generate_key_with_strategy(
        &self,
        strategy: &KeyStrategy,
        headers: &HashMap<String, String>,
        client_ip: &str,
        path: &str,
    ) -> ThrottlerResult<String> {
        match strategy {
            KeyStrategy::IpAddress => Ok(format!("throttle:ip:{}:{}", client_ip, path)),
            KeyStrategy::ApiKey => {
                let api_key = Self::api_key(headers)?;
                Ok(format!("throttle:api:{}:{}", api_key, path))
            }
            KeyStrategy::UserId => {
                let user_id = Self::user_id(headers)?;
                Ok(format!("throttle:user:{}:{}", user_id, path))
            }
            KeyStrategy::Composite(strategies) => {
                let mut key_parts = Vec::with_capacity(strategies.len());
                for sub_strategy in strategies {
                    let part = match sub_strategy {
                        KeyStrategy::IpAddress => client_ip.to_string(),
                        KeyStrategy::ApiKey => Self::api_key(headers)?.clone(),
                        KeyStrategy::UserId => Self::user_id(headers)?.clone(),
                        KeyStrategy::Custom(f) => f(headers, client_ip, path)?,
                        KeyStrategy::Composite(_) => {
                            return Err(ThrottlerError::InvalidKeyStrategy(
                                "Nested composite keys not supported".to_string(),
                            ))
                        }
                    };
                    key_parts.push(part);
                }
                Ok(format!("throttle:composite:{}:{}", key_parts.join(":"), path))
            }
            KeyStrategy::Custom(f) => {
                let key = f(headers, client_ip, path)?;
                if key.is_empty() {
                    return Err(ThrottlerError::InvalidKey(
                        "Custom key generator returned an empty key".to_string(),
                    ));
                }
                Ok(key)
            }
        }
    }

    fn api_key(headers: &HashMap<String, String>) -> ThrottlerResult<&String> {
        headers
            .get("x-api-key")
            .or_else(|| headers.get("authorization"))
            .ok_or(ThrottlerError::MissingApiKey)
    }

    fn user_id(headers: &HashMap<String, String>) -> ThrottlerResult<&String> {
        headers.get("x-user-id").ok_or(ThrottlerError::MissingUserId)
    }

    /// Extract client IP from various header sources
    pub fn extract_client_ip(headers: &HashMap<String, String>) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|xff| xff.split(',').next().map(|ip| ip.trim()))
            .filter(|ip| !ip.is_empty())
            .or_else(|| headers.get("x-real-ip").map(String::as_str))
            .or_else(|| headers.get("cf-connecting-ip").map(String::as_str))
            .map(str::to_string)
    }

    /// Escapes `key` for use in a store key.
    ///
    /// Bytes outside `[A-Za-z0-9:_./-]` become `%XX`, `%` included, so the
    /// mapping is reversible and distinct keys never collide.
    pub fn escape_key(key: &str) -> String {
        let mut escaped = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b':' | b'-' | b'_' | b'/' | b'.') {
                escaped.push(char::from(byte));
            } else {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        }
        escaped
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(KeyStrategy::IpAddress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_headers() -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "test-api-key".to_string());
        headers.insert("x-user-id".to_string(), "user123".to_string());
        headers.insert("x-forwarded-for".to_string(), "192.168.1.1, 10.0.0.1".to_string());
        headers
    }

    #[test]
    fn test_ip_address_strategy() {
        let generator = KeyGenerator::new(KeyStrategy::IpAddress);
        let headers = create_test_headers();
        let key = generator.generate_key(&headers, "192.168.1.1", "/api/test").unwrap();
        assert_eq!(key, "throttle:ip:192.168.1.1:/api/test");
    }

    #[test]
    fn test_api_key_strategy() {
        let generator = KeyGenerator::new(KeyStrategy::ApiKey);
        let headers = create_test_headers();
        let key = generator.generate_key(&headers, "192.168.1.1", "/api/test").unwrap();
        assert_eq!(key, "throttle:api:test-api-key:/api/test");
    }

    #[test]
    fn test_missing_api_key() {
        let generator = KeyGenerator::new(KeyStrategy::ApiKey);
        let result = generator.generate_key(&HashMap::new(), "10.0.0.1", "/");
        assert!(matches!(result, Err(ThrottlerError::MissingApiKey)));
    }

    #[test]
    fn test_user_id_strategy() {
        let generator = KeyGenerator::new(KeyStrategy::UserId);
        let headers = create_test_headers();
        let key = generator.generate_key(&headers, "192.168.1.1", "/api/test").unwrap();
        assert_eq!(key, "throttle:user:user123:/api/test");
    }

    #[test]
    fn test_composite_strategy() {
        let strategy = KeyStrategy::Composite(vec![KeyStrategy::UserId, KeyStrategy::IpAddress]);
        let generator = KeyGenerator::new(strategy);
        let headers = create_test_headers();
        let key = generator.generate_key(&headers, "192.168.1.1", "/api/test").unwrap();
        assert_eq!(key, "throttle:composite:user123:192.168.1.1:/api/test");
    }

    #[test]
    fn test_nested_composite_rejected() {
        let strategy = KeyStrategy::Composite(vec![KeyStrategy::Composite(vec![])]);
        let generator = KeyGenerator::new(strategy);
        let result = generator.generate_key(&HashMap::new(), "1.2.3.4", "/");
        assert!(matches!(result, Err(ThrottlerError::InvalidKeyStrategy(_))));
    }

    #[test]
    fn test_custom_strategy() {
        let generator = KeyGenerator::custom(|headers, _ip, _path| {
            Ok(format!(
                "tenant:{}",
                headers.get("x-tenant").map(String::as_str).unwrap_or("anonymous")
            ))
        });
        let key = generator.generate_key(&HashMap::new(), "1.2.3.4", "/").unwrap();
        assert_eq!(key, "tenant:anonymous");
    }

    #[test]
    fn test_extract_client_ip() {
        let headers = create_test_headers();
        let ip = KeyGenerator::extract_client_ip(&headers);
        assert_eq!(ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(KeyGenerator::extract_client_ip(&HashMap::new()), None);
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(KeyGenerator::escape_key("ip:10.0.0.1:/api"), "ip:10.0.0.1:/api");
        assert_eq!(
            KeyGenerator::escape_key("test@key#with$special%chars"),
            "test%40key%23with%24special%25chars"
        );
        assert_eq!(KeyGenerator::escape_key("é"), "%C3%A9");
    }

    #[test]
    fn test_escape_key_is_injective() {
        let keys = ["abc+def", "abc=def", "abc def", "abc_def", "abc%2Bdef"];
        let escaped: std::collections::HashSet<String> =
            keys.iter().map(|key| KeyGenerator::escape_key(key)).collect();
        assert_eq!(escaped.len(), keys.len());
    }
}
