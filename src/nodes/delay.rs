//! Pauses the run for a fixed duration

use crate::{
    error::NodeError,
    nodes::{parse_config, NodeHandler, NodeOutcome},
    runtime::context::ExecutionContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DelayConfig {
    /// Number, or a numeric string after template resolution
    duration: Value,
    #[serde(default = "default_unit")]
    unit: String,
}

fn default_unit() -> String {
    "ms".to_string()
}

impl DelayConfig {
    fn as_duration(&self) -> Result<Duration, NodeError> {
        let amount = match &self.duration {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| {
            NodeError::InvalidConfig(format!("delay duration must be a non-negative number, got {}", self.duration))
        })?;

        let millis_per_unit = match self.unit.to_ascii_lowercase().as_str() {
            "ms" | "millisecond" | "milliseconds" => 1.0,
            "s" | "sec" | "second" | "seconds" => 1_000.0,
            "m" | "min" | "minute" | "minutes" => 60_000.0,
            "h" | "hour" | "hours" => 3_600_000.0,
            other => return Err(NodeError::InvalidConfig(format!("unknown delay unit '{}'", other))),
        };

        Ok(Duration::from_millis((amount * millis_per_unit).round() as u64))
    }
}

pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn execute(&self, config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: DelayConfig = parse_config(config)?;
        let duration = config.as_duration()?;

        tracing::debug!("⏳ Delaying for {:?}", duration);
        tokio::time::sleep(duration).await;
        Ok(NodeOutcome::success(json!({ "delayedMs": duration.as_millis() as u64 })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(config: Value) -> Result<Duration, NodeError> {
        parse_config::<DelayConfig>(&config)?.as_duration()
    }

    #[test]
    fn test_units() {
        assert_eq!(parse(json!({ "duration": 250 })).unwrap(), Duration::from_millis(250));
        assert_eq!(parse(json!({ "duration": 2, "unit": "seconds" })).unwrap(), Duration::from_secs(2));
        assert_eq!(parse(json!({ "duration": "1.5", "unit": "minutes" })).unwrap(), Duration::from_secs(90));
        assert_eq!(parse(json!({ "duration": 1, "unit": "hours" })).unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_delays() {
        assert!(parse(json!({ "duration": -1 })).is_err());
        assert!(parse(json!({ "duration": "soon" })).is_err());
        assert!(parse(json!({ "duration": 1, "unit": "fortnights" })).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_for_duration() {
        let mut ctx = ExecutionContext::new("u1", json!({}));
        let started = tokio::time::Instant::now();
        let outcome = DelayHandler
            .execute(&json!({ "duration": 3, "unit": "s" }), &mut ctx)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(outcome.output["delayedMs"], 3000);
    }
}
