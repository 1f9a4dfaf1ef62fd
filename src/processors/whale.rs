//! Whale accumulation streaks
//!
//! Tracks net daily flow of addresses that no known entity claims. A streak
//! needs a positive net inflow on every day of the window and a cumulative
//! inflow of at least the volume floor.

use super::rolling::HeightLog;
use super::{ProcessorConfig, SignalProcessor};
use crate::entity::EntitySnapshot;
use crate::error::SignalResult;
use crate::signals::{clamp_unit, EvidenceRef, Signal, SignalType};
use crate::types::Block;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

const EVIDENCE_TXS: usize = 10;

#[derive(Debug, Clone)]
struct AddressContribution {
    address: String,
    day: i64,
    delta: f64,
    txid: String,
}

#[derive(Debug)]
struct Streak {
    address: String,
    streak_days: usize,
    volume: f64,
    strength: f64,
}

pub struct WhaleAccumulationProcessor {
    window_days: usize,
    volume_floor: f64,
    daily: HashMap<String, BTreeMap<i64, f64>>,
    journal: HeightLog<AddressContribution>,
    days: HeightLog<i64>,
}

impl WhaleAccumulationProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            window_days: config.accumulation_window_days.max(1),
            volume_floor: config.whale_volume_floor.max(f64::EPSILON),
            daily: HashMap::new(),
            journal: HeightLog::new(config.rewind_depth),
            days: HeightLog::new(config.rewind_depth),
        }
    }

    fn current_day(&self) -> Option<i64> {
        self.days.newest().and_then(|(_, days)| days.first().copied())
    }

    /// Days of history kept per address; streaks longer than the window
    /// still grow strength up to this length
    fn retained_days(&self) -> i64 {
        2 * self.window_days as i64 + 2
    }

    fn contributions(block: &Block, day: i64, entities: &EntitySnapshot) -> Vec<AddressContribution> {
        let mut out = Vec::new();
        for tx in &block.transactions {
            let mut per_address: BTreeMap<&str, f64> = BTreeMap::new();
            for input in &tx.inputs {
                if entities.lookup(&input.address).is_none() {
                    *per_address.entry(input.address.as_str()).or_default() -= input.amount;
                }
            }
            for output in &tx.outputs {
                if entities.lookup(&output.address).is_none() {
                    *per_address.entry(output.address.as_str()).or_default() += output.amount;
                }
            }
            for (address, delta) in per_address {
                if delta != 0.0 {
                    out.push(AddressContribution {
                        address: address.to_string(),
                        day,
                        delta,
                        txid: tx.txid.clone(),
                    });
                }
            }
        }
        out
    }

    /// Streak ending on `day`, if the address qualifies
    fn evaluate(&self, address: &str, day: i64) -> Option<Streak> {
        let days = self.daily.get(address)?;
        let window = self.window_days as i64;

        let streak_days = (0..self.retained_days())
            .take_while(|offset| days.get(&(day - offset)).is_some_and(|net| *net > 0.0))
            .count();
        if (streak_days as i64) < window {
            return None;
        }

        let volume: f64 = (0..window).filter_map(|offset| days.get(&(day - offset))).sum();
        if volume < self.volume_floor {
            return None;
        }

        let strength = clamp_unit(
            (streak_days as f64 / window as f64) * clamp_unit(volume / (2.0 * self.volume_floor)),
        );

        Some(Streak {
            address: address.to_string(),
            streak_days,
            volume,
            strength,
        })
    }
}

impl SignalProcessor for WhaleAccumulationProcessor {
    fn signal_type(&self) -> SignalType {
        SignalType::WhaleAccumulation
    }

    fn process(&mut self, block: &Block, entities: &EntitySnapshot) -> SignalResult<Option<Signal>> {
        self.rewind(block.height);

        let previous_day = self.current_day();
        let day = previous_day.map_or(block.day(), |d| d.max(block.day()));

        let contributions = Self::contributions(block, day, entities);
        for c in &contributions {
            *self
                .daily
                .entry(c.address.clone())
                .or_default()
                .entry(c.day)
                .or_default() += c.delta;
        }

        let mut touched: Vec<String> = contributions.iter().map(|c| c.address.clone()).collect();
        touched.sort();
        touched.dedup();

        self.journal.record(block.height, contributions);
        self.days.record(block.height, vec![day]);

        if previous_day.is_some_and(|prev| day > prev) {
            let cutoff = day - self.retained_days();
            self.daily.retain(|_, days| {
                days.retain(|d, _| *d > cutoff);
                !days.is_empty()
            });
        }

        let mut streaks: Vec<Streak> = touched
            .iter()
            .filter_map(|address| self.evaluate(address, day))
            .collect();
        if streaks.is_empty() {
            return Ok(None);
        }
        streaks.sort_by(|a, b| b.strength.total_cmp(&a.strength).then(a.address.cmp(&b.address)));
        let best = &streaks[0];

        let daily_net: Vec<f64> = (0..self.window_days as i64)
            .rev()
            .map(|offset| {
                self.daily
                    .get(&best.address)
                    .and_then(|days| days.get(&(day - offset)))
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect();

        let mut evidence: Vec<EvidenceRef> = self
            .journal
            .iter()
            .filter(|(_, c)| c.address == best.address && c.delta > 0.0)
            .map(|(h, c)| EvidenceRef::block(h).with_txid(c.txid.clone()).with_amount(c.delta))
            .collect();
        evidence.reverse();
        evidence.truncate(EVIDENCE_TXS);

        log::info!(
            "🐋 Accumulation streak: {} net +{:.2} BTC over {} days (streak {}d)",
            best.address,
            best.volume,
            self.window_days,
            best.streak_days
        );

        let signal = Signal::new(SignalType::WhaleAccumulation, block.height, block.hash.clone())
            .with_strength(best.strength)
            .with_payload(json!({
                "address": best.address,
                "streak_days": best.streak_days,
                "window_days": self.window_days,
                "volume": best.volume,
                "volume_floor": self.volume_floor,
                "daily_net": daily_net,
                "candidates": streaks.len(),
            }))
            .with_evidence(evidence);

        Ok(Some(signal))
    }

    fn rewind(&mut self, from_height: u64) {
        for (_, c) in self.journal.take_from(from_height) {
            if let Some(days) = self.daily.get_mut(&c.address) {
                if let Some(net) = days.get_mut(&c.day) {
                    *net -= c.delta;
                }
            }
        }
        self.days.take_from(from_height);
    }
}
