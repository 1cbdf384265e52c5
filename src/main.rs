use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aqi_agent::api::build_router;
use aqi_agent::ax_state::AppState;
use aqi_agent::config::AppConfig;
use aqi_agent::core::entity_index::EntityIndex;
use aqi_agent::infra::db_internal;
use aqi_agent::infra::hasura::HasuraClient;
use aqi_agent::infra::llm::OpenAiClient;
use aqi_agent::models::schema::SchemaRegistry;
use aqi_agent::service::agent::AqiAgent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aqi_agent=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!("解析器模式: {:?}, 上下文上限: {} 字符", config.resolver_mode, config.context_char_limit);

    // 1. 已知实体名称：配置 + 可选的数据库
    let mut names = config.known_entities.clone();
    if let Some(url) = &config.database_url {
        match db_internal::init_db(url).await {
            Ok(pool) => match db_internal::load_entity_names(&pool).await {
                Ok(loaded) => names.extend(loaded),
                Err(e) => warn!("加载实体名称失败: {}", e),
            },
            Err(e) => warn!("数据库连接失败，仅使用配置中的实体名称: {}", e),
        }
    }
    let entities = Arc::new(EntityIndex::build(&names)?);
    info!("实体索引已构建: {} 个名称", entities.len());

    // 2. 外部服务客户端
    let llm = Arc::new(OpenAiClient::new(
        &config.llm_base_url,
        &config.llm_api_key,
        &config.llm_model,
        config.llm_timeout,
    )?);
    let transport = Arc::new(HasuraClient::new(
        &config.hasura_url,
        &config.hasura_admin_secret,
        config.hasura_timeout,
    )?);

    // 3. 组装应用
    let schemas = Arc::new(SchemaRegistry::aqi());
    let agent = AqiAgent::new(llm, transport, schemas.clone(), entities.clone(), config.agent_settings());
    let state = Arc::new(AppState { agent, schemas, entities });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = build_router(state).layer(TraceLayer::new_for_http()).layer(cors);

    info!("AQI Agent 运行在 http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
