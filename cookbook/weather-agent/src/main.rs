//! A punny weather forecaster on top of the runtime: two canned tools, a
//! structured reply schema, and two invocations on the same thread.

use std::sync::Arc;

use serde_json::{json, Map};
use squall_engine::{
    init_tracing, weather_toolkit, Agent, CancellationToken, FieldKind, MemoryThreadStore, Schema,
    ScriptedModel,
};

const SYSTEM_PROMPT: &str = "You are an expert weather forecaster, who speaks in puns.\n\n\
You have access to two tools:\n\n\
- get_weather_for_location: use this to get the weather for a specific location\n\
- get_user_location: use this to get the user's location\n\n\
If a user asks you for the weather, make sure you know the location. If you can tell \
from the question that they mean wherever they are, use the get_user_location tool to \
find their location.";

#[tokio::main]
async fn main() -> squall_engine::Result<()> {
    init_tracing();

    // A scripted model keeps the demo deterministic and offline; swap in a
    // real `LanguageModel` implementation to go live.
    let model = ScriptedModel::new(vec![
        r#"{"action":"call_tool","name":"get_user_location","arguments":{}}"#.into(),
        r#"{"action":"call_tool","name":"get_weather_for_location","arguments":{"city":"Florida"}}"#.into(),
        json!({
            "action": "respond",
            "content": json!({
                "punny_response": "Florida looks sun-sational today, no chance of brain-storms!",
                "weather_conditions": "It's always sunny in Florida!"
            })
            .to_string()
        })
        .to_string(),
        json!({
            "action": "respond",
            "content": json!({
                "punny_response": "You're thunder-fully welcome, come rain or shine!"
            })
            .to_string()
        })
        .to_string(),
    ]);

    let store = Arc::new(MemoryThreadStore::new());
    let agent = Agent::new(model, store)
        .with_system_prompt(SYSTEM_PROMPT)
        .with_tools(weather_toolkit()?)
        .with_reply_schema(
            Schema::object()
                .required("punny_response", FieldKind::String)
                .optional("weather_conditions", FieldKind::String),
        );

    let mut context = Map::new();
    context.insert("user_id".into(), json!("1"));

    let forecast = agent
        .invoke_with(
            "1",
            "What is the weather outside?",
            context,
            CancellationToken::new(),
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(forecast.value())?);

    let thanks = agent.invoke("1", "thank you!").await?;
    println!("{}", serde_json::to_string_pretty(thanks.value())?);

    Ok(())
}
