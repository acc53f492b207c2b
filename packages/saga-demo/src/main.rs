//! Runs a few store workflows end to end and prints the resulting state.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saga_store::{
    Action, EffectContext, EffectMap, Model, Mutation, ReducerMap, StoreConfig, StoreContext,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "saga-demo")]
#[command(about = "Drive a saga store from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Increment a counter through an effect
    Counter {
        #[arg(long, default_value_t = 3)]
        times: u32,
    },

    /// Add todos, then toggle the first one
    Todos {
        titles: Vec<String>,
        /// Delay each save by this many milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
    },

    /// Count down from N through recursive puts
    Countdown {
        #[arg(default_value_t = 5)]
        from: u64,
    },
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct Response<S: Serialize> {
    results: Vec<Value>,
    state: S,
}

fn output<S: Serialize>(resp: &Response<S>) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(resp).context("failed to encode response")?
    );
    Ok(())
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
struct Counter {
    count: i64,
}

fn counter_model(config: StoreConfig) -> Model<Counter> {
    Model::new(Counter::default())
        .config(config)
        .effects(EffectMap::new().effect(
            "increment",
            |_action, ctx: EffectContext<Counter>| async move {
                ctx.set(|draft: &mut Counter| draft.count += 1);
                Ok("done")
            },
        ))
}

#[derive(Debug, Clone, Default, Serialize)]
struct TodoList {
    items: Vec<TodoItem>,
    saving: usize,
}

#[derive(Debug, Clone, Serialize)]
struct TodoItem {
    title: String,
    done: bool,
}

fn todo_model(config: StoreConfig, latency: Duration) -> Model<TodoList> {
    Model::new(TodoList::default())
        .config(config)
        .reducer(
            ReducerMap::new()
                .on("todos/add", |draft: &mut TodoList, _: &Action| {
                    draft.saving += 1;
                })
                .on("todos/toggle_first", |draft: &mut TodoList, _: &Action| {
                    if let Some(first) = draft.items.first_mut() {
                        first.done = !first.done;
                    }
                }),
        )
        .effects(EffectMap::new().scope(
            "todos",
            EffectMap::new()
                .effect("add", move |action: Action, ctx: EffectContext<TodoList>| async move {
                    let title = action
                        .get("title")
                        .and_then(Value::as_str)
                        .context("todos/add needs a title")?
                        .to_string();

                    ctx.delay(latency).await;
                    ctx.set(move |draft: &mut TodoList| {
                        draft.saving -= 1;
                        draft.items.push(TodoItem { title, done: false });
                    });
                    ctx.put(Action::new("saved"));

                    Ok(ctx.select(|state| state.items.len()))
                })
                .effect("saved", |_action, ctx: EffectContext<TodoList>| async move {
                    tracing::debug!(count = ctx.select(|s| s.items.len()), "todo saved");
                    Ok(())
                }),
        ))
}

fn countdown_model(config: StoreConfig) -> Model<Vec<u64>> {
    Model::new(Vec::new())
        .config(config)
        .effects(EffectMap::new().scope(
            "countdown",
            EffectMap::new().effect("tick", |action: Action, ctx: EffectContext<Vec<u64>>| async move {
                let n = action.get("n").and_then(Value::as_u64).unwrap_or(0);
                ctx.set(move |seen: &mut Vec<u64>| {
                    let mut next = seen.clone();
                    next.push(n);
                    Mutation::Replace(next)
                });
                if n == 0 {
                    return Ok(0);
                }
                let rest = ctx.put_resolve(Action::new("tick").with("n", n - 1)).await?;
                Ok(rest.as_u64().unwrap_or(0) + n)
            }),
        ))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,saga_store=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::from_env()?;

    match cli.command {
        Commands::Counter { times } => cmd_counter(config, times).await,
        Commands::Todos { titles, latency_ms } => {
            cmd_todos(config, titles, Duration::from_millis(latency_ms)).await
        }
        Commands::Countdown { from } => cmd_countdown(config, from).await,
    }
}

async fn cmd_counter(config: StoreConfig, times: u32) -> Result<()> {
    let store = counter_model(config).build();

    let mut results = Vec::new();
    for _ in 0..times {
        results.push(store.dispatch_and_await(Action::new("increment")).await?);
    }

    let state = store.get_state();
    store.dispose();
    output(&Response {
        results,
        state: &*state,
    })
}

async fn cmd_todos(config: StoreConfig, titles: Vec<String>, latency: Duration) -> Result<()> {
    let context = StoreContext::new(todo_model(config, latency));

    context
        .provide(async {
            let dispatch = context.use_dispatch()?;

            // Saves run concurrently; each settles with the list length it saw.
            let settlements: Vec<_> = titles
                .iter()
                .map(|title| dispatch.dispatch(Action::new("todos/add").with("title", title.as_str())))
                .collect();
            tracing::info!(
                saving = context.use_state_with(|s| s.saving)?,
                "todos dispatched"
            );

            let mut results = Vec::new();
            for settlement in settlements {
                results.push(settlement.await?);
            }
            dispatch.dispatch(Action::new("todos/toggle_first")).await?;

            let state = context.use_state()?;
            output(&Response {
                results,
                state: &*state,
            })
        })
        .await
}

async fn cmd_countdown(config: StoreConfig, from: u64) -> Result<()> {
    let store = countdown_model(config).build();

    let total = store
        .dispatch_and_await(Action::new("countdown/tick").with("n", from))
        .await?;

    let state = store.get_state();
    store.dispose();
    output(&Response {
        results: vec![total],
        state: &*state,
    })
}
