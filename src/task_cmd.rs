//! One-shot CLI commands that drive the router and memory directly,
//! without going through HTTP.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::llm;
use crate::memory::{MemoryStore, SqliteMemory};
use crate::migrate;
use crate::router::{Personas, Task, TaskRouter, UNKNOWN_TASK_MESSAGE};

async fn open_memory(config: &Config) -> Result<(SqlitePool, SqliteMemory)> {
    let embedder = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    let memory = SqliteMemory::new(pool.clone(), embedder, config.memory.collection.clone());
    Ok((pool, memory))
}

/// Run a single task over `text` and print the model's response.
///
/// An unknown task name prints the router's rejection message and fails
/// before any collaborator is constructed.
pub async fn run_task(config: &Config, task: &str, text: &str) -> Result<()> {
    let task: Task = match task.parse() {
        Ok(t) => t,
        Err(e) => {
            println!("{}", UNKNOWN_TASK_MESSAGE);
            bail!(e);
        }
    };

    let chat = llm::create_chat_model(&config.llm).context("failed to create chat model")?;
    let (pool, memory) = open_memory(config).await?;
    let router = TaskRouter::new(
        Arc::new(memory),
        chat,
        Personas::from_config(&config.prompts),
        config.memory.top_k,
    );

    let result = router.dispatch(task, text, "cli").await;
    pool.close().await;

    let response = result.with_context(|| format!("task '{}' failed", task))?;
    println!("{}", response);
    Ok(())
}

/// Print the stored chunks nearest to `text`, nearest first.
pub async fn run_memory_query(config: &Config, text: &str, limit: Option<usize>) -> Result<()> {
    let (pool, memory) = open_memory(config).await?;
    let k = limit.unwrap_or(config.memory.top_k);

    let total = memory.count().await?;
    let results = memory.query(text, k).await;
    pool.close().await;
    let results = results?;

    println!(
        "memory query (collection={}, stored={}, k={})",
        memory.collection(),
        total,
        k
    );
    if results.is_empty() {
        println!("  no results");
        return Ok(());
    }
    for (i, chunk) in results.iter().enumerate() {
        println!("{}. {}", i + 1, chunk);
    }
    Ok(())
}

/// Print every task the router accepts.
pub fn list_tasks() {
    for task in Task::ALL {
        let memory = if task.uses_memory() { " [memory]" } else { "" };
        println!("{:<20} {}{}", task.as_str(), task.describe(), memory);
    }
}
