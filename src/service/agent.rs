use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::constraint_resolver::{ConstraintResolver, ResolverMode};
use crate::core::entity_index::EntityIndex;
use crate::core::executor::Executor;
use crate::core::field_selector::FieldSelector;
use crate::core::nlg::AnswerGenerator;
use crate::core::orchestrator::TaskOrchestrator;
use crate::core::pipeline::SubQuestionPipeline;
use crate::core::planner::Planner;
use crate::infra::hasura::GraphqlTransport;
use crate::infra::llm::StructuredCompletion;
use crate::models::context::AskResponse;
use crate::models::plan::TodoList;
use crate::models::schema::SchemaRegistry;

pub const APOLOGY_ANSWER: &str =
    "Xin lỗi, tôi chưa thể phân tích câu hỏi của bạn. Bạn vui lòng diễn đạt lại giúp tôi nhé.";
pub const TIMEOUT_ANSWER: &str = "Xin lỗi, việc truy vấn dữ liệu mất quá nhiều thời gian. Bạn vui lòng thử lại sau.";

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub resolver_mode: ResolverMode,
    pub context_char_limit: usize,
    pub request_timeout: Duration,
}

/// 应用服务：规划 → 分阶段执行 → 累积结果 → 生成回答
pub struct AqiAgent {
    planner: Planner,
    orchestrator: TaskOrchestrator,
    generator: AnswerGenerator,
    request_timeout: Duration,
}

impl AqiAgent {
    pub fn new(
        llm: Arc<dyn StructuredCompletion>,
        transport: Arc<dyn GraphqlTransport>,
        schemas: Arc<SchemaRegistry>,
        entities: Arc<EntityIndex>,
        settings: AgentSettings,
    ) -> Self {
        let limit = settings.context_char_limit;
        let pipeline = SubQuestionPipeline::new(
            FieldSelector::new(llm.clone(), schemas.clone(), limit),
            ConstraintResolver::new(settings.resolver_mode, llm.clone(), entities, limit),
            Executor::new(transport),
        );
        Self {
            planner: Planner::new(llm.clone(), schemas),
            orchestrator: TaskOrchestrator::new(Arc::new(pipeline)),
            generator: AnswerGenerator::new(llm, limit),
            request_timeout: settings.request_timeout,
        }
    }

    pub async fn answer(&self, question: &str) -> AskResponse {
        let request_id = Uuid::new_v4();
        self.answer_with_id(question, request_id).await
    }

    #[instrument(skip(self, question, request_id), fields(request_id = %request_id))]
    async fn answer_with_id(&self, question: &str, request_id: Uuid) -> AskResponse {
        info!("收到问题: {}", question);
        let request_id = request_id.to_string();

        // 1. 规划
        let mut plan = match self.planner.plan(question).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("规划失败: {}", e);
                return AskResponse {
                    answer: APOLOGY_ANSWER.to_string(),
                    data: Map::new(),
                    graphql_queries: Vec::new(),
                    errors: vec![e.to_string()],
                    request_id,
                };
            }
        };

        // 2. 执行 (整体超时，不在子问题级别取消)
        let outcome = match tokio::time::timeout(self.request_timeout, self.orchestrator.run_plan(&mut plan)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("请求超时: {:?}", self.request_timeout);
                return AskResponse {
                    answer: TIMEOUT_ANSWER.to_string(),
                    data: Map::new(),
                    graphql_queries: Vec::new(),
                    errors: vec![format!("request timed out after {:?}", self.request_timeout)],
                    request_id,
                };
            }
        };

        // 3. 生成回答
        let (queries, errors) = collect_queries_and_errors(&plan);
        let answer = self.generator.generate(question, &outcome.data, &queries, &errors).await;
        info!("回答完成: {} 个阶段, {} 条查询, {} 个错误", outcome.tasks_run, queries.len(), errors.len());

        AskResponse {
            answer,
            data: outcome.data,
            graphql_queries: queries,
            errors,
            request_id,
        }
    }
}

fn collect_queries_and_errors(plan: &TodoList) -> (Vec<String>, Vec<String>) {
    let queries = plan
        .sub_questions()
        .filter(|sq| !sq.query.is_empty())
        .map(|sq| sq.query.clone())
        .collect();
    let errors = plan
        .sub_questions()
        .filter_map(|sq| {
            sq.error
                .as_ref()
                .map(|e| format!("[{}] {}: {}", sq.table_name, sq.question, e))
        })
        .collect();
    (queries, errors)
}
