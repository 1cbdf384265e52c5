use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::compiler;
use crate::core::constraint_resolver::ConstraintResolver;
use crate::core::executor::Executor;
use crate::core::field_selector::FieldSelector;
use crate::models::plan::SubQuestion;

pub const FIELD_SELECTION_FAILED: &str = "field selection failed";

/// 子问题流水线的状态：PENDING → FIELDS_SELECTED → CONSTRAINTS_RESOLVED → QUERY_BUILT → EXECUTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Pending,
    FieldsSelected,
    ConstraintsResolved,
    QueryBuilt,
    Executed,
}

/// 流水线终态。`stage` 为到达的最后阶段；失败时 `data` 为空且 `error` 有值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub stage: PipelineStage,
    pub query: String,
    pub data: Map<String, Value>,
    pub error: Option<String>,
}

impl PipelineOutcome {
    fn failed(stage: PipelineStage, error: impl Into<String>) -> Self {
        Self {
            stage,
            query: String::new(),
            data: Map::new(),
            error: Some(error.into()),
        }
    }

    /// 原地回填子问题
    pub fn apply_to(self, sub_question: &mut SubQuestion) {
        sub_question.query = self.query;
        sub_question.data = self.data;
        sub_question.error = self.error;
    }
}

/// 单个子问题：字段选择 → 约束推断 → 编译 → 执行
pub struct SubQuestionPipeline {
    selector: FieldSelector,
    resolver: ConstraintResolver,
    executor: Executor,
}

impl SubQuestionPipeline {
    pub fn new(selector: FieldSelector, resolver: ConstraintResolver, executor: Executor) -> Self {
        Self { selector, resolver, executor }
    }

    /// 任何阶段的失败都写进结果，不向上抛，兄弟子问题不受影响
    #[instrument(skip(self, sub_question, prior), fields(table = %sub_question.table_name))]
    pub async fn run(&self, sub_question: &SubQuestion, prior: &Map<String, Value>) -> PipelineOutcome {
        info!("开始处理子问题: {}", sub_question.question);

        // 1. 字段选择
        let Some(fields) = self
            .selector
            .select(&sub_question.question, &sub_question.description, &sub_question.table_name)
            .await
        else {
            warn!("子问题终止: {}", FIELD_SELECTION_FAILED);
            return PipelineOutcome::failed(PipelineStage::Pending, FIELD_SELECTION_FAILED);
        };
        let mut stage = PipelineStage::FieldsSelected;

        // 2. 约束推断 (没有候选字段时跳过)
        let constraints = if fields.is_empty() {
            None
        } else {
            let c = self
                .resolver
                .resolve_with_context(&sub_question.question, &sub_question.description, &fields, prior)
                .await;
            stage = PipelineStage::ConstraintsResolved;
            c
        };

        // 3. 编译 (对 None 约束同样成立)
        let query = compiler::compile(&sub_question.table_name, &fields, constraints.as_ref());
        info!("生成查询 (阶段 {:?} -> QueryBuilt):\n{}", stage, query);

        // 4. 执行
        let result = self.executor.execute(&query).await;
        let outcome = PipelineOutcome {
            stage: PipelineStage::Executed,
            query,
            data: result.data.unwrap_or_default(),
            error: result.error,
        };
        if let Some(e) = &outcome.error {
            warn!("子问题执行出错: {}", e);
        }
        outcome
    }
}
