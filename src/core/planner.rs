use chrono::Local;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::prompts;
use crate::infra::llm::{complete_as, ChatMessage, LlmError, OutputSchema, StructuredCompletion};
use crate::models::plan::{SubQuestion, Task, TodoList};
use crate::models::schema::SchemaRegistry;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("plan has no sub-questions in first_task")]
    EmptyPlan,

    #[error("planner completion failed: {0}")]
    Llm(#[from] LlmError),
}

/// 把用户问题拆解为两阶段的 TodoList
pub struct Planner {
    llm: Arc<dyn StructuredCompletion>,
    schemas: Arc<SchemaRegistry>,
}

impl Planner {
    pub fn new(llm: Arc<dyn StructuredCompletion>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { llm, schemas }
    }

    #[instrument(skip(self, question))]
    pub async fn plan(&self, question: &str) -> Result<TodoList, PlanError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PlanError::EmptyQuestion);
        }

        let tables = self
            .schemas
            .descriptions()
            .iter()
            .map(|(name, desc)| format!("- {name}: {desc}"))
            .collect::<Vec<_>>()
            .join("\n");
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let messages = [
            ChatMessage::system(prompts::PLANNER_SYSTEM),
            ChatMessage::user(prompts::planner_user(question, &tables, &today)),
        ];

        let target = OutputSchema::new("todo_list", self.todo_schema());
        let plan: TodoList = complete_as(self.llm.as_ref(), &messages, &target).await?;
        let plan = sanitize(plan)?;

        info!(
            "生成计划: first_task {} 个子问题, second_task {} 个子问题",
            plan.first_task.sub_questions.len(),
            plan.second_task.as_ref().map_or(0, |t| t.sub_questions.len())
        );
        Ok(plan)
    }

    fn todo_schema(&self) -> Value {
        let tables: Vec<&str> = self.schemas.tables().map(|t| t.name).collect();
        json!({
            "type": "object",
            "properties": {
                "first_task": {"$ref": "#/$defs/task"},
                "second_task": {"anyOf": [{"$ref": "#/$defs/task"}, {"type": "null"}]}
            },
            "required": ["first_task", "second_task"],
            "additionalProperties": false,
            "$defs": {
                "task": {
                    "type": "object",
                    "properties": {
                        "sub_questions": {"type": "array", "items": {"$ref": "#/$defs/sub_question"}}
                    },
                    "required": ["sub_questions"],
                    "additionalProperties": false
                },
                "sub_question": {
                    "type": "object",
                    "properties": {
                        "question": {"type": "string"},
                        "description": {"type": "string"},
                        "table_name": {"type": "string", "enum": tables}
                    },
                    "required": ["question", "description", "table_name"],
                    "additionalProperties": false
                }
            }
        })
    }
}

/// 清空 LLM 可能带出的运行期字段，空的 second_task 视为不存在
fn sanitize(mut plan: TodoList) -> Result<TodoList, PlanError> {
    for sq in plan
        .first_task
        .sub_questions
        .iter_mut()
        .chain(plan.second_task.iter_mut().flat_map(|t| t.sub_questions.iter_mut()))
    {
        sq.data.clear();
        sq.query.clear();
        sq.error = None;
    }
    let has_question = |sq: &SubQuestion| !sq.question.trim().is_empty();
    plan.first_task.sub_questions.retain(has_question);
    if let Some(task) = plan.second_task.as_mut() {
        task.sub_questions.retain(has_question);
    }
    if plan.first_task.is_empty() {
        warn!("计划的 first_task 为空");
        return Err(PlanError::EmptyPlan);
    }
    plan.second_task = plan.second_task.filter(|t: &Task| !t.is_empty());
    Ok(plan)
}
