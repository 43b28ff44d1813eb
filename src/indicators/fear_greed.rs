// src/indicators/fear_greed.rs
//! CNN Fear & Greed index from the public graph-data endpoint.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::FearGreedConfig;

/// graph-data key → dashboard label, in display order.
pub const COMPONENTS: &[(&str, &str)] = &[
    ("market_momentum_sp500", "Stock Price Momentum"),
    ("stock_price_strength", "Stock Price Strength"),
    ("stock_price_breadth", "Stock Price Breadth"),
    ("put_call_options", "Put and Call Options"),
    ("market_volatility_vix", "Market Volatility"),
    ("junk_bond_demand", "Junk Bond Demand"),
    ("safe_haven_demand", "Safe Haven Demand"),
];

/// Series kept verbatim for the dashboard charts.
pub const TIME_SERIES_KEYS: &[&str] = &[
    "fear_and_greed",
    "fear_and_greed_historical",
    "market_momentum_sp500",
    "market_momentum_sp125",
    "stock_price_strength",
    "stock_price_breadth",
    "put_call_options",
    "market_volatility_vix",
    "market_volatility_vix_50",
    "junk_bond_demand",
    "safe_haven_demand",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub rating: Option<String>,
    /// Two-decimal string for floats, "N/A" when absent, otherwise as reported.
    pub value: Value,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedSnapshot {
    pub score: Option<f64>,
    pub rating: Option<String>,
    pub timestamp: Option<Value>,
    pub previous_close: Option<f64>,
    pub previous_1_week: Option<f64>,
    pub previous_1_month: Option<f64>,
    pub previous_1_year: Option<f64>,
    pub components: Vec<Component>,
    #[serde(default)]
    pub historical_time_series: BTreeMap<String, Value>,
    pub commentary: Option<String>,
}

fn score_of(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn display_value(v: Option<&Value>) -> Value {
    match v {
        None | Some(Value::Null) => Value::String("N/A".into()),
        Some(Value::Number(n)) if n.is_f64() => {
            Value::String(format!("{:.2}", n.as_f64().unwrap_or_default()))
        }
        Some(other) => other.clone(),
    }
}

impl FearGreedSnapshot {
    /// Build a snapshot from the raw graph-data document. Commentary is left empty.
    pub fn from_graphdata(data: &Value) -> Result<Self> {
        let head = data
            .get("fear_and_greed")
            .filter(|v| v.is_object())
            .ok_or_else(|| anyhow!("graph data has no fear_and_greed block"))?;
        let num = |k: &str| head.get(k).and_then(Value::as_f64);

        let components = COMPONENTS
            .iter()
            .filter_map(|(key, name)| {
                let ind = data.get(*key)?;
                let raw_value = if *key == "stock_price_strength" {
                    ind.get("highs_lows")
                } else {
                    ind.get("value")
                };
                Some(Component {
                    name: name.to_string(),
                    rating: ind.get("rating").and_then(Value::as_str).map(str::to_string),
                    value: display_value(raw_value),
                    score: score_of(ind.get("score")),
                })
            })
            .collect();

        let historical_time_series: BTreeMap<String, Value> = TIME_SERIES_KEYS
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        for (k, v) in &historical_time_series {
            let points = v.get("data").and_then(Value::as_array).map_or(0, Vec::len);
            debug!(target: "indicators", series = %k, points, "kept time series");
        }

        Ok(Self {
            score: num("score"),
            rating: head.get("rating").and_then(Value::as_str).map(str::to_string),
            timestamp: head.get("timestamp").cloned(),
            previous_close: num("previous_close"),
            previous_1_week: num("previous_1_week"),
            previous_1_month: num("previous_1_month"),
            previous_1_year: num("previous_1_year"),
            components,
            historical_time_series,
            commentary: None,
        })
    }
}

pub struct FearGreedClient {
    http: reqwest::Client,
    endpoint: String,
}

impl FearGreedClient {
    pub fn new(cfg: &FearGreedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building fear & greed http client")?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
        })
    }

    pub async fn fetch(&self) -> Result<FearGreedSnapshot> {
        let data: Value = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .context("fear & greed request")?
            .error_for_status()
            .context("fear & greed non-2xx")?
            .json()
            .await
            .context("decoding fear & greed json")?;
        let snap = FearGreedSnapshot::from_graphdata(&data)?;
        info!(
            target: "indicators",
            score = snap.score,
            series = snap.historical_time_series.len(),
            "fetched fear & greed"
        );
        Ok(snap)
    }
}
