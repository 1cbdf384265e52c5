use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

pub async fn init_db(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// 从区县与省份表加载已知实体名称，供启发式约束推断使用
pub async fn load_entity_names(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT name FROM districts WHERE name IS NOT NULL
         UNION
         SELECT name FROM provinces WHERE name IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    let names: Vec<String> = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .filter(|name| !name.trim().is_empty())
        .collect();
    info!("从数据库加载实体名称: {} 个", names.len());
    Ok(names)
}
