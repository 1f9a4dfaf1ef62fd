//! Headline / summary generation
//!
//! Narrative text comes from an external service when one is configured.
//! The template narrator produces deterministic text from the same
//! structured request and is always available as the fallback.

use crate::error::{SignalError, SignalResult};
use crate::signals::{Signal, SignalType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Structured signal data handed to a narrator
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeRequest {
    pub signal_type: SignalType,
    pub block_height: u64,
    pub strength: f64,
    pub confidence: f64,
    pub is_predictive: bool,
    pub entity_names: Vec<String>,
    pub payload: Value,
}

impl NarrativeRequest {
    pub fn from_signal(signal: &Signal, confidence: f64) -> Self {
        let mut entity_names: Vec<String> = signal
            .evidence
            .iter()
            .filter_map(|e| e.entity_name.clone())
            .collect();
        entity_names.sort();
        entity_names.dedup();

        Self {
            signal_type: signal.signal_type,
            block_height: signal.block_height,
            strength: signal.strength,
            confidence,
            is_predictive: signal.is_predictive,
            entity_names,
            payload: signal.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub headline: String,
    pub summary: String,
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn narrate(&self, request: &NarrativeRequest) -> SignalResult<Narrative>;

    fn name(&self) -> &'static str;
}

fn text(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn num(payload: &Value, key: &str) -> f64 {
    payload.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn short_address(address: &str) -> String {
    if address.chars().count() <= 12 {
        return address.to_string();
    }
    let head: String = address.chars().take(6).collect();
    let tail: String = address.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{}…{}", head, tail)
}

/// Deterministic text built from the payload
#[derive(Debug, Clone, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
    pub fn render(&self, request: &NarrativeRequest) -> Narrative {
        let p = &request.payload;
        let anomalous = p.get("anomalous").and_then(|v| v.as_bool()).unwrap_or(false);

        let headline = match request.signal_type {
            SignalType::ExchangeFlow => {
                if anomalous {
                    format!(
                        "{} inflow of {:.2} BTC, {:.1}σ above its baseline",
                        text(p, "entity_name"),
                        num(p, "inflow"),
                        num(p, "z_score")
                    )
                } else {
                    format!("{} inflow of {:.2} BTC", text(p, "entity_name"), num(p, "inflow"))
                }
            }
            SignalType::MempoolNowcast => format!(
                "Median mempool fee {:.1} sat/vB (p10 {:.1}, p90 {:.1})",
                num(p, "p50"),
                num(p, "p10"),
                num(p, "p90")
            ),
            SignalType::MinerTreasury => format!(
                "{} {} {:+.2} BTC on {}",
                text(p, "entity_name"),
                text(p, "direction"),
                num(p, "delta"),
                text(p, "day")
            ),
            SignalType::WhaleAccumulation => format!(
                "Address {} accumulated {:.2} BTC over {} straight days",
                short_address(&text(p, "address")),
                num(p, "volume"),
                num(p, "streak_days") as u64
            ),
            SignalType::FeeForecast => format!(
                "Fee forecast for block {}: {:.1} sat/vB ({:.1} to {:.1})",
                num(p, "target_height") as u64,
                num(p, "point"),
                num(p, "lower"),
                num(p, "upper")
            ),
            SignalType::LiquidityPressure => format!(
                "Exchange inflow forecast for block {}: {:.2} BTC ({:.2} to {:.2})",
                num(p, "target_height") as u64,
                num(p, "point"),
                num(p, "lower"),
                num(p, "upper")
            ),
        };

        let summary = format!(
            "Block {}: {}. Signal strength {:.2}, confidence {:.0}%.",
            request.block_height,
            headline,
            request.strength,
            request.confidence * 100.0
        );

        Narrative { headline, summary }
    }
}

#[async_trait]
impl NarrativeGenerator for TemplateNarrator {
    async fn narrate(&self, request: &NarrativeRequest) -> SignalResult<Narrative> {
        Ok(self.render(request))
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

/// External narrative service reached over HTTP
///
/// POSTs the `NarrativeRequest` as JSON and expects `{headline, summary}`.
#[derive(Debug, Clone)]
pub struct HttpNarrator {
    client: reqwest::Client,
    url: String,
}

impl HttpNarrator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SignalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignalError::NarrativeUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrator {
    async fn narrate(&self, request: &NarrativeRequest) -> SignalResult<Narrative> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| SignalError::NarrativeUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalError::NarrativeUnavailable(format!(
                "narrator returned {}",
                response.status()
            )));
        }

        let narrative: Narrative = response
            .json()
            .await
            .map_err(|e| SignalError::NarrativeUnavailable(e.to_string()))?;

        if narrative.headline.trim().is_empty() {
            return Err(SignalError::NarrativeUnavailable("empty headline".to_string()));
        }
        Ok(narrative)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::EvidenceRef;
    use serde_json::json;

    fn flow_signal() -> Signal {
        Signal::new(SignalType::ExchangeFlow, 840_000, "h")
            .with_strength(1.0)
            .with_payload(json!({
                "entity_name": "Binance",
                "inflow": 5000.0,
                "z_score": 45.0,
                "anomalous": true,
            }))
            .with_evidence(vec![EvidenceRef::block(840_000)
                .with_txid("deposit")
                .with_entity("binance", "Binance")])
    }

    #[test]
    fn test_request_collects_entity_names() {
        let request = NarrativeRequest::from_signal(&flow_signal(), 0.93);
        assert_eq!(request.entity_names, vec!["Binance".to_string()]);
        assert_eq!(request.confidence, 0.93);
    }

    #[tokio::test]
    async fn test_template_exchange_flow() {
        let request = NarrativeRequest::from_signal(&flow_signal(), 0.93);
        let narrative = TemplateNarrator.narrate(&request).await.unwrap();
        assert_eq!(
            narrative.headline,
            "Binance inflow of 5000.00 BTC, 45.0σ above its baseline"
        );
        assert!(narrative.summary.starts_with("Block 840000:"));
        assert!(narrative.summary.ends_with("confidence 93%."));
    }

    #[test]
    fn test_template_is_deterministic() {
        let request = NarrativeRequest::from_signal(&flow_signal(), 0.9);
        assert_eq!(TemplateNarrator.render(&request), TemplateNarrator.render(&request));
    }

    #[test]
    fn test_short_address() {
        assert_eq!(short_address("bc1short"), "bc1short");
        assert_eq!(short_address("bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh"), "bc1qxy…0wlh");
    }

    #[tokio::test]
    async fn test_http_narrator_unreachable() {
        let narrator = HttpNarrator::new("http://127.0.0.1:9/narrate", Duration::from_millis(200)).unwrap();
        let request = NarrativeRequest::from_signal(&flow_signal(), 0.9);
        let result = narrator.narrate(&request).await;
        assert!(matches!(result, Err(SignalError::NarrativeUnavailable(_))));
    }
}
