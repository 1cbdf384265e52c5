//! LLM 提示词模板

pub const PLANNER_SYSTEM: &str = "You plan GraphQL lookups over an air-quality (AQI) database.
Split the user question into a TodoList:
- `first_task` is required; its sub_questions run in parallel.
- `second_task` is optional and runs after `first_task`; use it only when a step needs the results of the first.
- Every sub-question names exactly one table in `table_name`, a precise `question` and a short `description` of how to query it.
- AQI values live in `distric_stats`; `districts` has names only. To get the AQI of a named district, query `distric_stats` and mention the district name in the sub-question.
- Keep sub-questions in the user's language.";

pub fn planner_user(question: &str, tables: &str, today: &str) -> String {
    format!("<query>{question}</query>\n\n<tables>\n{tables}\n</tables>\n\nToday is {today}. Return the TodoList.")
}

pub const FIELD_SELECTION_SYSTEM: &str = "You select the database fields a GraphQL query needs to answer a question about air quality.
Set a field to true only when it is needed to answer the question, false otherwise.
Always select `id` when anything is selected.
For `distric_stats`, fill the `district` relationship with {\"name\": true} whenever district names are useful; otherwise set it to null.
Return the table schema object with a boolean for every field.";

pub fn field_selection_user(question: &str, description: &str, schema: &str) -> String {
    format!("Question: {question}\n\nTask description: {description}\n\nTable schema:\n{schema}")
}

pub const CONSTRAINT_SYSTEM: &str = "You write GraphQL (Hasura) query constraints for air-quality questions.
Output {\"where\", \"order_by\", \"limit\", \"offset\"}; use null for anything not needed.
Operators: _eq _neq _gt _gte _lt _lte _in _nin _between _like _ilike _is_null _is_not_null.
A condition is {\"field\", \"op\", \"value\"}; `_in`/`_nin` take a list, `_between` takes [low, high], null checks take true/false.
Combine with {\"_and\": [...]}, {\"_or\": [...]}, {\"_not\": {...}}.
Filter on a related table with {\"field\": \"district\", \"nested\": {\"field\": \"name\", \"op\": \"_ilike\", \"value\": \"%Ba Đình%\"}}.
For current or latest values order by date desc then hour desc with limit 1.
Resolve relative dates (today, yesterday, this week) against today's date given below; `date` values use YYYY-MM-DD.
Only reference fields listed in the selected fields.";

pub fn constraint_user(question: &str, description: &str, fields: &str, today: &str, prior: Option<&str>) -> String {
    let mut prompt = format!(
        "Question: {question}\n\nTask description: {description}\n\nToday's date: {today}\n\nSelected fields:\n{fields}"
    );
    if let Some(prior) = prior {
        prompt.push_str("\n\nResults of previous steps (use their ids/values to filter):\n");
        prompt.push_str(prior);
    }
    prompt
}

pub const NLG_SYSTEM: &str = "You answer questions about air quality in Vietnam using only the data provided.
Answer in the language of the question, concisely, with concrete numbers, dates and district names from the data.
If the data is empty say that no data was found; do not invent values.
If some lookups failed, mention that the answer may be incomplete.";

pub fn nlg_user(question: &str, data: &str, queries: &str, failures: &str) -> String {
    format!("Question: {question}\n\nData:\n{data}\n\nExecuted queries:\n{queries}\n\nFailures:\n{failures}")
}

/// 按字符数截断上下文，保证不切断 UTF-8 字符
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
