use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::core::pipeline::SubQuestionPipeline;
use crate::models::plan::{Task, TaskCursor, TodoList};

/// 整个计划执行完毕后的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub data: Map<String, Value>,
    pub cursor: TaskCursor,
    pub tasks_run: usize,
}

pub struct TaskOrchestrator {
    pipeline: Arc<SubQuestionPipeline>,
}

impl TaskOrchestrator {
    pub fn new(pipeline: Arc<SubQuestionPipeline>) -> Self {
        Self { pipeline }
    }

    /// 并发执行同一阶段的全部子问题，全部到达终态后才返回。
    /// 每个 future 只持有自己那个子问题的可变引用。
    #[instrument(skip(self, task, prior), fields(sub_questions = task.sub_questions.len()))]
    pub async fn run_task(&self, task: &mut Task, prior: &Map<String, Value>) {
        let runs = task.sub_questions.iter_mut().map(|sq| async move {
            let outcome = self.pipeline.run(sq, prior).await;
            outcome.apply_to(sq);
        });
        join_all(runs).await;

        let failed = task.sub_questions.iter().filter(|sq| sq.is_failed()).count();
        info!("阶段完成: {} 个子问题, {} 个失败", task.sub_questions.len(), failed);
    }

    /// 按游标顺序执行各阶段，阶段之间严格串行，前一阶段的累积结果交给后一阶段
    pub async fn run_plan(&self, plan: &mut TodoList) -> PlanOutcome {
        let mut cursor = TaskCursor::for_plan(plan);
        let mut accumulated = Map::new();
        let mut tasks_run = 0;

        while !cursor.is_done() {
            if let Some(task) = plan.task_mut(cursor.task_index) {
                info!("执行第 {}/{} 阶段", cursor.task_index, cursor.task_count);
                self.run_task(task, &accumulated).await;
                for sq in &task.sub_questions {
                    merge_results(&mut accumulated, sq.data.clone());
                }
                tasks_run += 1;
            }
            cursor.advance();
        }

        PlanOutcome { data: accumulated, cursor, tasks_run }
    }
}

/// 按表名合并：列表拼接，对象逐键合并，其余情况覆盖
pub fn merge_results(accumulated: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (table, value) in incoming {
        let leftover = match (accumulated.get_mut(&table), value) {
            (Some(Value::Array(old)), Value::Array(rows)) => {
                old.extend(rows);
                None
            }
            (Some(Value::Object(old)), Value::Object(map)) => {
                old.extend(map);
                None
            }
            (_, value) => Some(value),
        };
        if let Some(value) = leftover {
            accumulated.insert(table, value);
        }
    }
}
