//! Shared fixtures for store integration tests.

use anyhow::Result;
use saga_store::{async_trait, Action, Effect, EffectContext, EffectMap, Model, ReducerMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoState {
    pub items: Vec<Todo>,
    pub loading: bool,
    pub saved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub title: String,
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddTodo {
    pub title: String,
}

/// Saves a todo and reports how many were saved so far.
pub struct SaveTodo;

#[async_trait]
impl Effect<TodoState> for SaveTodo {
    type Output = usize;

    async fn run(&self, action: Action, ctx: EffectContext<TodoState>) -> Result<usize> {
        let AddTodo { title } = action.payload_as()?;
        if title.trim().is_empty() {
            anyhow::bail!("title must not be blank");
        }

        ctx.set(move |draft: &mut TodoState| {
            draft.items.push(Todo { title, done: false });
            draft.saved += 1;
        });
        ctx.put(Action::new("saved"));

        Ok(ctx.select(|state| state.saved))
    }
}

pub fn todo_model() -> Model<TodoState> {
    Model::new(TodoState::default())
        .reducer(
            ReducerMap::new()
                .on("todos/fetch", |draft: &mut TodoState, _: &Action| {
                    draft.loading = true;
                })
                .on("todos/toggle", |draft: &mut TodoState, action: &Action| {
                    let index = action.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    if let Some(todo) = draft.items.get_mut(index) {
                        todo.done = !todo.done;
                    }
                }),
        )
        .effects(EffectMap::new().scope(
            "todos",
            EffectMap::new()
                .effect("fetch", |_action, ctx: EffectContext<TodoState>| async move {
                    ctx.delay(std::time::Duration::from_millis(5)).await;
                    let fetched = vec![
                        Todo {
                            title: "write tests".into(),
                            done: true,
                        },
                        Todo {
                            title: "ship".into(),
                            done: false,
                        },
                    ];
                    let count = fetched.len();
                    ctx.set(move |draft: &mut TodoState| {
                        draft.items = fetched;
                        draft.loading = false;
                    });
                    Ok(count)
                })
                .handler("add", SaveTodo),
        ))
}
