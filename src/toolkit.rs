use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, SquallError};
use crate::schema::{FieldKind, Schema};
use crate::tool::{Tool, ToolContext, ToolRegistry};

/// The canned demo tools: a weather lookup and a context-backed user
/// location lookup.
pub fn weather_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(GetWeatherForLocation)?;
    registry.register(GetUserLocation)?;
    Ok(registry)
}

struct GetWeatherForLocation;

#[async_trait]
impl Tool for GetWeatherForLocation {
    fn name(&self) -> &str {
        "get_weather_for_location"
    }

    fn description(&self) -> &str {
        "Get the weather for a given city."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required("city", FieldKind::String)
            .describe("city", "The city to get the weather for")
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let city = args
            .get("city")
            .and_then(Value::as_str)
            .ok_or_else(|| SquallError::ToolInvocation {
                name: "get_weather_for_location".into(),
                source: "missing `city` argument".into(),
            })?;
        Ok(Value::String(format!("It's always sunny in {city}!")))
    }
}

struct GetUserLocation;

#[async_trait]
impl Tool for GetUserLocation {
    fn name(&self) -> &str {
        "get_user_location"
    }

    fn description(&self) -> &str {
        "Retrieve the user's location from the thread context."
    }

    async fn call(&self, _args: Value, ctx: &ToolContext) -> Result<Value> {
        let location = match ctx.get("user_id").and_then(Value::as_str) {
            Some("1") => "Florida",
            _ => "SF",
        };
        Ok(Value::String(location.into()))
    }
}
