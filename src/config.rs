use anyhow::Context;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::core::constraint_resolver::ResolverMode;
use crate::service::agent::AgentSettings;

/// 环境变量配置 (先由 dotenvy 加载 .env)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub hasura_url: String,
    pub hasura_admin_secret: String,
    pub hasura_timeout: Duration,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub resolver_mode: ResolverMode,
    pub context_char_limit: usize,
    pub request_timeout: Duration,
    pub database_url: Option<String>,
    pub known_entities: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", "0.0.0.0:3000")?,
            hasura_url: var_or("HASURA_URL", "http://localhost:8080/v1/graphql"),
            hasura_admin_secret: var_or("HASURA_ADMIN_SECRET", ""),
            hasura_timeout: Duration::from_secs(parse_or("HASURA_TIMEOUT_SECS", "30")?),
            llm_base_url: var_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: var_or("LLM_API_KEY", ""),
            llm_model: var_or("LLM_MODEL", "gpt-4o-mini"),
            llm_timeout: Duration::from_secs(parse_or("LLM_TIMEOUT_SECS", "60")?),
            resolver_mode: parse_or("RESOLVER_MODE", "llm")?,
            context_char_limit: parse_or("CONTEXT_CHAR_LIMIT", "4000")?,
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", "120")?),
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            known_entities: split_list(&var_or("KNOWN_ENTITIES", "")),
        })
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            resolver_mode: self.resolver_mode,
            context_char_limit: self.context_char_limit,
            request_timeout: self.request_timeout,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(key, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("环境变量 {key} 的值无效: {raw:?}"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
