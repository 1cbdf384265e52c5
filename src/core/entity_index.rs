use dashmap::DashMap;
use fst::{Map, MapBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// 单个实体名称最多包含的词数
const MAX_NGRAM: usize = 6;

/// 已知实体名称 (区县/省份) 的 FST 索引
pub struct EntityIndex {
    index: Map<Vec<u8>>,
    // 存储 ID 到展示名称的快速反查
    pub name_cache: Arc<DashMap<u64, String>>,
}

impl EntityIndex {
    pub fn build<S: AsRef<str>>(names: &[S]) -> anyhow::Result<Self> {
        let mut builder = MapBuilder::memory();
        let cache = Arc::new(DashMap::new());

        // FST 键必须有序
        let mut data: BTreeMap<String, u64> = BTreeMap::new();

        for (idx, name) in names.iter().enumerate() {
            let display = name.as_ref().trim();
            let key = normalize_key(display);
            if key.is_empty() {
                continue;
            }
            let id = idx as u64;
            data.insert(key, id);
            cache.insert(id, display.to_string());
        }

        for (key, id) in data {
            builder.insert(key, id)?;
        }

        let bytes = builder.into_inner()?;
        Ok(Self {
            index: Map::new(bytes)?,
            name_cache: cache,
        })
    }

    pub fn empty() -> Self {
        // 空输入的构建不会失败
        Self::build::<&str>(&[]).unwrap_or_else(|_| Self {
            index: Map::default(),
            name_cache: Arc::new(DashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // 按已归一化的键精确查找
    fn lookup(&self, key: &str) -> Option<String> {
        let id = self.index.get(key)?;
        self.name_cache.get(&id).map(|n| n.value().clone())
    }

    /// 在文本中查找最左、最长的已知实体名称，返回其展示名称
    pub fn find_in(&self, text: &str) -> Option<String> {
        let tokens = tokenize(text);
        for start in 0..tokens.len() {
            let max_end = (start + MAX_NGRAM).min(tokens.len());
            for end in (start + 1..=max_end).rev() {
                let candidate = tokens[start..end].join(" ");
                if let Some(name) = self.lookup(&candidate) {
                    debug!("实体命中: {} -> {}", candidate, name);
                    return Some(name);
                }
            }
        }
        None
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn normalize_key(text: &str) -> String {
    tokenize(text).join(" ")
}
