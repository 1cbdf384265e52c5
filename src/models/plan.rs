use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 计划中的单个子问题。`data` / `query` / `error` 在流水线完成后原地回填
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub question: String,
    #[serde(default)]
    pub description: String,
    pub table_name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubQuestion {
    pub fn new(
        question: impl Into<String>,
        description: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            description: description.into(),
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// 同一阶段内并发执行的一组子问题
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub sub_questions: Vec<SubQuestion>,
}

impl Task {
    pub fn new(sub_questions: Vec<SubQuestion>) -> Self {
        Self { sub_questions }
    }

    pub fn is_empty(&self) -> bool {
        self.sub_questions.is_empty()
    }
}

/// 两阶段计划：first_task 必有，second_task 可依赖 first_task 的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    pub first_task: Task,
    #[serde(default)]
    pub second_task: Option<Task>,
}

impl TodoList {
    /// 空的 second_task 不计入阶段数
    pub fn task_count(&self) -> usize {
        match &self.second_task {
            Some(task) if !task.is_empty() => 2,
            _ => 1,
        }
    }

    /// 按游标序号 (从 1 开始) 取阶段
    pub fn task_mut(&mut self, index: usize) -> Option<&mut Task> {
        match index {
            1 => Some(&mut self.first_task),
            2 => self.second_task.as_mut().filter(|t| !t.is_empty()),
            _ => None,
        }
    }

    pub fn sub_questions(&self) -> impl Iterator<Item = &SubQuestion> {
        self.first_task
            .sub_questions
            .iter()
            .chain(self.second_task.iter().flat_map(|t| t.sub_questions.iter()))
    }
}

/// 计划外部的循环游标，每完成一个阶段前进 1，超过 task_count 即结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCursor {
    pub task_index: usize,
    pub task_count: usize,
}

impl TaskCursor {
    pub fn for_plan(plan: &TodoList) -> Self {
        Self {
            task_index: 1,
            task_count: plan.task_count(),
        }
    }

    pub fn advance(&mut self) {
        self.task_index += 1;
    }

    pub fn is_done(&self) -> bool {
        self.task_index > self.task_count
    }
}
