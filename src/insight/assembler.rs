//! Insight assembly from scored signals

use super::narrator::{Narrative, NarrativeGenerator, NarrativeRequest, TemplateNarrator};
use crate::error::{SignalError, SignalResult};
use crate::scoring::{ConfidenceScore, DataQualityReport};
use crate::signals::{EvidenceRef, Signal, SignalType};
use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The confidence breakdown shown alongside an insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainabilityFactors {
    pub signal_strength: f64,
    pub historical_accuracy: f64,
    pub data_quality: f64,
    pub confidence: f64,
    pub threshold: f64,
    pub quality_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub signal_type: SignalType,
    pub block_height: u64,
    pub signal_revision: u32,
    pub headline: String,
    pub summary: String,
    pub confidence: f64,
    pub evidence: Vec<EvidenceRef>,
    pub explainability: ExplainabilityFactors,
    pub tags: Vec<String>,
    pub narrator: String,
    pub created_at: i64,
}

/// Deterministic insight id: one per signal revision
pub fn insight_id(signal: &Signal) -> String {
    format!(
        "{}-{}-r{}",
        signal.block_height,
        signal.signal_type.as_str(),
        signal.revision
    )
}

fn entity_type_for(signal_type: SignalType) -> Option<EntityType> {
    match signal_type {
        SignalType::ExchangeFlow | SignalType::LiquidityPressure => Some(EntityType::Exchange),
        SignalType::MinerTreasury => Some(EntityType::MiningPool),
        _ => None,
    }
}

fn tags_for(signal: &Signal) -> Vec<String> {
    let mut tags = vec![signal.signal_type.as_str().to_lowercase()];
    if let Some(entity_type) = entity_type_for(signal.signal_type) {
        tags.push(entity_type.as_str().to_string());
    }
    if signal.is_predictive {
        tags.push("predictive".to_string());
    }
    if signal.is_anomalous() {
        tags.push("anomaly".to_string());
    }
    tags
}

pub struct InsightAssembler {
    narrator: Option<Arc<dyn NarrativeGenerator>>,
    fallback: TemplateNarrator,
    threshold: f64,
}

impl InsightAssembler {
    /// Template-only assembler
    pub fn new(threshold: f64) -> Self {
        Self {
            narrator: None,
            fallback: TemplateNarrator,
            threshold,
        }
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    async fn narrative_for(&self, request: &NarrativeRequest) -> (Narrative, &'static str) {
        if let Some(narrator) = &self.narrator {
            match narrator.narrate(request).await {
                Ok(narrative) => return (narrative, narrator.name()),
                Err(e) => {
                    log::warn!(
                        "⚠️  Narrator '{}' unavailable for {} at {}, using template: {}",
                        narrator.name(),
                        request.signal_type,
                        request.block_height,
                        e
                    );
                }
            }
        }
        (self.fallback.render(request), "template")
    }

    /// Build the insight for a signal that cleared scoring
    pub async fn assemble(
        &self,
        signal: &Signal,
        score: &ConfidenceScore,
        quality: &DataQualityReport,
    ) -> SignalResult<Insight> {
        if !score.decision.is_publish() {
            return Err(SignalError::InsightRejected(format!(
                "{} at {} did not clear scoring ({:?})",
                signal.signal_type, signal.block_height, score.decision
            )));
        }
        if signal.evidence.is_empty() {
            return Err(SignalError::InsightRejected(format!(
                "{} at {} has no evidence to cite",
                signal.signal_type, signal.block_height
            )));
        }

        let request = NarrativeRequest::from_signal(signal, score.confidence);
        let (narrative, narrator) = self.narrative_for(&request).await;

        Ok(Insight {
            id: insight_id(signal),
            signal_type: signal.signal_type,
            block_height: signal.block_height,
            signal_revision: signal.revision,
            headline: narrative.headline,
            summary: narrative.summary,
            confidence: score.confidence,
            evidence: signal.evidence.clone(),
            explainability: ExplainabilityFactors {
                signal_strength: score.factors.signal_strength,
                historical_accuracy: score.factors.historical_accuracy,
                data_quality: score.factors.data_quality,
                confidence: score.confidence,
                threshold: self.threshold,
                quality_issues: quality.issues.clone(),
            },
            tags: tags_for(signal),
            narrator: narrator.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{ConfidenceFactors, ConfidenceScorer};
    use async_trait::async_trait;
    use serde_json::json;

    struct DownNarrator;

    #[async_trait]
    impl NarrativeGenerator for DownNarrator {
        async fn narrate(&self, _request: &NarrativeRequest) -> SignalResult<Narrative> {
            Err(SignalError::NarrativeUnavailable("offline".to_string()))
        }

        fn name(&self) -> &'static str {
            "down"
        }
    }

    struct FixedNarrator;

    #[async_trait]
    impl NarrativeGenerator for FixedNarrator {
        async fn narrate(&self, _request: &NarrativeRequest) -> SignalResult<Narrative> {
            Ok(Narrative {
                headline: "Big deposit".to_string(),
                summary: "Someone moved coins.".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn clean() -> DataQualityReport {
        DataQualityReport { score: 1.0, issues: vec![] }
    }

    fn signal() -> Signal {
        Signal::new(SignalType::ExchangeFlow, 100, "h")
            .with_strength(1.0)
            .with_payload(json!({"entity_name": "Binance", "inflow": 5000.0, "z_score": 45.0, "anomalous": true}))
            .with_evidence(vec![EvidenceRef::block(100)
                .with_txid("deposit")
                .with_entity("binance", "Binance")])
    }

    fn passing() -> ConfidenceScore {
        ConfidenceScorer::default().score(&ConfidenceFactors::new(1.0, 0.8, 1.0), false)
    }

    #[tokio::test]
    async fn test_assembles_with_explainability_and_tags() {
        let insight = InsightAssembler::new(0.7)
            .assemble(&signal(), &passing(), &clean())
            .await
            .unwrap();

        assert_eq!(insight.id, "100-EXCHANGE_FLOW-r0");
        assert_eq!(insight.explainability.signal_strength, 1.0);
        assert_eq!(insight.explainability.historical_accuracy, 0.8);
        assert_eq!(insight.explainability.data_quality, 1.0);
        assert_eq!(insight.tags, vec!["exchange_flow", "exchange", "anomaly"]);
        assert_eq!(insight.evidence[0].txid.as_deref(), Some("deposit"));
        assert_eq!(insight.narrator, "template");
        assert!(insight.headline.contains("Binance"));
    }

    #[tokio::test]
    async fn test_rejects_without_evidence() {
        let bare = signal().with_evidence(vec![]);
        let result = InsightAssembler::new(0.7).assemble(&bare, &passing(), &clean()).await;
        assert!(matches!(result, Err(SignalError::InsightRejected(_))));
    }

    #[tokio::test]
    async fn test_rejects_unpublished_score() {
        let quiet = ConfidenceScorer::default().score(&ConfidenceFactors::new(1.0, 1.0, 1.0), true);
        let result = InsightAssembler::new(0.7).assemble(&signal(), &quiet, &clean()).await;
        assert!(matches!(result, Err(SignalError::InsightRejected(_))));
    }

    #[tokio::test]
    async fn test_falls_back_to_template_when_narrator_down() {
        let assembler = InsightAssembler::new(0.7).with_narrator(Arc::new(DownNarrator));
        let insight = assembler.assemble(&signal(), &passing(), &clean()).await.unwrap();
        assert_eq!(insight.narrator, "template");
    }

    #[tokio::test]
    async fn test_uses_external_narrator_when_available() {
        let assembler = InsightAssembler::new(0.7).with_narrator(Arc::new(FixedNarrator));
        let insight = assembler.assemble(&signal(), &passing(), &clean()).await.unwrap();
        assert_eq!(insight.narrator, "fixed");
        assert_eq!(insight.headline, "Big deposit");
    }
}
