pub mod db_internal;
pub mod hasura;
pub mod llm;
