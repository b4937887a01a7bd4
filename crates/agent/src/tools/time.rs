//! Clock tool

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde_json::{json, Value};

use super::{ParamKind, ParamSchema, Result, ToolError, ToolTrait};

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reports the current time
pub struct CurrentTimeTool;

#[async_trait]
impl ToolTrait for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }
    fn description(&self) -> &str {
        "Current date and time, local by default, formatted with strftime syntax."
    }
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .with_default(
                "format",
                ParamKind::String,
                json!(DEFAULT_FORMAT),
                "strftime format",
            )
            .with_default("utc", ParamKind::Boolean, json!(false), "Report UTC")
    }
    async fn execute(&self, params: Value) -> Result<Value> {
        let format = params["format"].as_str().unwrap_or(DEFAULT_FORMAT);
        let utc = params["utc"].as_bool().unwrap_or(false);

        // to_string() panics on an invalid specifier
        let items: Vec<_> = chrono::format::StrftimeItems::new(format).collect();
        if items.contains(&chrono::format::Item::Error) {
            return Err(ToolError::invalid(
                self.name(),
                format!("invalid format '{}'", format),
            ));
        }

        let (formatted, timezone, unix) = if utc {
            let now = Utc::now();
            (
                now.format_with_items(items.iter()).to_string(),
                "UTC".to_string(),
                now.timestamp(),
            )
        } else {
            let now = Local::now();
            (
                now.format_with_items(items.iter()).to_string(),
                now.format("%:z").to_string(),
                now.timestamp(),
            )
        };

        Ok(json!({
            "result": formatted,
            "timezone": timezone,
            "unix": unix,
        }))
    }
}
