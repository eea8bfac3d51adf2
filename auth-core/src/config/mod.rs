//! Immutable engine configuration.
//!
//! Built once (from the environment or by hand in tests) and passed into the
//! engines at construction, so a given engine instance behaves
//! deterministically regardless of ambient state.

use serde::Deserialize;
use std::env;

use crate::models::AuthMethod;
use crate::services::AuthError;

/// When to attempt the secondary sign-in method after the primary fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Fall back on any primary failure, including wrong-password.
    /// Permissive; weakens lockout semantics.
    Always,
    /// Fall back only when the primary method was unavailable
    /// (infrastructure-class failures). Default.
    OnUnavailable,
    /// Never fall back.
    Never,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(FallbackPolicy::Always),
            "on_unavailable" => Ok(FallbackPolicy::OnUnavailable),
            "never" => Ok(FallbackPolicy::Never),
            _ => Err(format!("Invalid fallback policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Method tried first unless the caller asks otherwise.
    pub primary: AuthMethod,
    pub fallback: FallbackPolicy,
    pub local_enabled: bool,
    pub directory_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    /// Failed attempts before the account locks.
    pub max_failed_attempts: i32,
    /// Lockout duration in minutes.
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_hours: i64,
    /// Revoke all of the principal's sessions after a password change.
    pub revoke_on_password_change: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret: String,
    pub leeway_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Hard timeout for a single bind call, distinct from any outer
    /// request deadline.
    pub bind_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElevatedConfig {
    pub ttl_minutes: i64,
    pub code_length: usize,
    pub code_ttl_seconds: i64,
    pub code_max_attempts: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: u8,
    pub require_uppercase: bool,
    pub require_number: bool,
    pub require_special: bool,
    /// How many previous hashes a new password is checked against.
    pub history_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub strategy: StrategyConfig,
    pub lockout: LockoutConfig,
    pub session: SessionConfig,
    pub token: TokenConfig,
    pub directory: DirectoryConfig,
    pub elevated: ElevatedConfig,
    pub password: PasswordPolicy,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let is_prod = env::var("ENVIRONMENT")
            .map(|v| v.eq_ignore_ascii_case("prod"))
            .unwrap_or(false);

        let config = AuthConfig {
            strategy: StrategyConfig {
                primary: match get_env("AUTH_PRIMARY_METHOD", Some("local"), is_prod)?.as_str() {
                    "local" => AuthMethod::Local,
                    "directory" => AuthMethod::Directory,
                    other => {
                        return Err(AuthError::Config(anyhow::anyhow!(
                            "Invalid AUTH_PRIMARY_METHOD: {}",
                            other
                        )))
                    }
                },
                fallback: get_env("AUTH_FALLBACK_POLICY", Some("on_unavailable"), is_prod)?
                    .parse()
                    .map_err(|e: String| AuthError::Config(anyhow::anyhow!(e)))?,
                local_enabled: parse_env("AUTH_LOCAL_ENABLED", "true", is_prod)?,
                directory_enabled: parse_env("AUTH_DIRECTORY_ENABLED", "true", is_prod)?,
            },
            lockout: LockoutConfig {
                max_failed_attempts: parse_env("AUTH_MAX_FAILED_ATTEMPTS", "5", is_prod)?,
                lockout_minutes: parse_env("AUTH_LOCKOUT_MINUTES", "30", is_prod)?,
            },
            session: SessionConfig {
                ttl_hours: parse_env("SESSION_TTL_HOURS", "24", is_prod)?,
                revoke_on_password_change: parse_env(
                    "SESSION_REVOKE_ON_PASSWORD_CHANGE",
                    "true",
                    is_prod,
                )?,
            },
            token: TokenConfig {
                secret: get_env("TOKEN_SECRET", None, is_prod)?,
                leeway_seconds: parse_env("TOKEN_LEEWAY_SECONDS", "30", is_prod)?,
            },
            directory: DirectoryConfig {
                bind_timeout_seconds: parse_env("DIRECTORY_BIND_TIMEOUT_SECONDS", "5", is_prod)?,
            },
            elevated: ElevatedConfig {
                ttl_minutes: parse_env("ELEVATED_TTL_MINUTES", "15", is_prod)?,
                code_length: parse_env("ELEVATED_CODE_LENGTH", "6", is_prod)?,
                code_ttl_seconds: parse_env("ELEVATED_CODE_TTL_SECONDS", "300", is_prod)?,
                code_max_attempts: parse_env("ELEVATED_CODE_MAX_ATTEMPTS", "5", is_prod)?,
            },
            password: PasswordPolicy {
                min_length: parse_env("PASSWORD_MIN_LENGTH", "12", is_prod)?,
                require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", "true", is_prod)?,
                require_number: parse_env("PASSWORD_REQUIRE_NUMBER", "true", is_prod)?,
                require_special: parse_env("PASSWORD_REQUIRE_SPECIAL", "false", is_prod)?,
                history_depth: parse_env("PASSWORD_HISTORY_DEPTH", "5", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.lockout.max_failed_attempts <= 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_MAX_FAILED_ATTEMPTS must be positive"
            )));
        }
        if self.lockout.lockout_minutes <= 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_LOCKOUT_MINUTES must be positive"
            )));
        }
        if self.session.ttl_hours <= 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "SESSION_TTL_HOURS must be positive"
            )));
        }
        if self.elevated.ttl_minutes <= 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "ELEVATED_TTL_MINUTES must be positive"
            )));
        }
        if self.token.secret.len() < 32 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "TOKEN_SECRET must be at least 32 bytes"
            )));
        }
        if !self.strategy.local_enabled && !self.strategy.directory_enabled {
            return Err(AuthError::Config(anyhow::anyhow!(
                "At least one sign-in method must be enabled"
            )));
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    /// Test/dev defaults: 5 attempts / 30 min lockout, 24h sessions,
    /// 15 min elevated TTL.
    fn default() -> Self {
        Self {
            strategy: StrategyConfig {
                primary: AuthMethod::Local,
                fallback: FallbackPolicy::OnUnavailable,
                local_enabled: true,
                directory_enabled: true,
            },
            lockout: LockoutConfig {
                max_failed_attempts: 5,
                lockout_minutes: 30,
            },
            session: SessionConfig {
                ttl_hours: 24,
                revoke_on_password_change: true,
            },
            token: TokenConfig {
                secret: "insecure-test-secret-0123456789abcdef".to_string(),
                leeway_seconds: 30,
            },
            directory: DirectoryConfig {
                bind_timeout_seconds: 5,
            },
            elevated: ElevatedConfig {
                ttl_minutes: 15,
                code_length: 6,
                code_ttl_seconds: 300,
                code_max_attempts: 5,
            },
            password: PasswordPolicy {
                min_length: 12,
                require_uppercase: true,
                require_number: true,
                require_special: false,
                history_depth: 5,
            },
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AuthError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AuthError::Config(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AuthError::Config(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AuthError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AuthError::Config(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        AuthConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn short_token_secret_is_rejected() {
        let mut config = AuthConfig::default();
        config.token.secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn both_methods_disabled_is_rejected() {
        let mut config = AuthConfig::default();
        config.strategy.local_enabled = false;
        config.strategy.directory_enabled = false;
        assert!(config.validate().is_err());
    }
}
