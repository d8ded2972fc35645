//! Risk alert detector.
//!
//! Runs on the classified per-event deltas across all platforms and
//! mints typed alerts: significant price movements banded by the
//! configured thresholds, cross-platform direction disagreements
//! against the reference platform, and availability flips close to
//! kickoff. At most one price-change alert per
//! `(event, bookmaker, market, outcome)` per cycle.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;

use super::change::{Classification, DeltaKind, MarketDelta};
use crate::config::Settings;
use crate::types::{
    line_or_zero, AlertSeverity, AlertStatus, AlertType, Bookmaker, Direction, RiskAlert,
};

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Price-change severity bands T1/T2/T3, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub warning: Decimal,
    pub elevated: Decimal,
    pub critical: Decimal,
}

impl AlertThresholds {
    pub fn from_settings(settings: &Settings) -> Self {
        AlertThresholds {
            warning: settings.price_change_threshold_pct_warning,
            elevated: settings.price_change_threshold_pct_elevated,
            critical: settings.price_change_threshold_pct_critical,
        }
    }

    /// Band for an absolute change percentage; `None` below T1.
    pub fn severity(&self, change_pct_abs: Decimal) -> Option<AlertSeverity> {
        if change_pct_abs >= self.critical {
            Some(AlertSeverity::Critical)
        } else if change_pct_abs >= self.elevated {
            Some(AlertSeverity::Elevated)
        } else if change_pct_abs >= self.warning {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// One outcome's movement extracted from a delta.
#[derive(Debug, Clone)]
struct OutcomeMove {
    canonical_market_id: String,
    line: Option<Decimal>,
    outcome_name: String,
    old_odds: Decimal,
    new_odds: Decimal,
    change_percent: Decimal,
    direction: Direction,
}

pub struct RiskDetector {
    thresholds: AlertThresholds,
    imminent_window: Duration,
}

impl RiskDetector {
    pub fn new(thresholds: AlertThresholds, imminent_window_minutes: i64) -> Self {
        RiskDetector {
            thresholds,
            imminent_window: Duration::minutes(imminent_window_minutes),
        }
    }

    /// Detect alerts for one event, given each platform's classified
    /// deltas for this cycle. `event_id` is the joined internal id the
    /// cache uses for every platform of this event.
    pub fn detect(
        &self,
        event_id: i64,
        kickoff_time: DateTime<Utc>,
        per_platform: &[(Bookmaker, &Classification)],
        now: DateTime<Utc>,
    ) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        self.detect_price_changes(event_id, per_platform, now, &mut alerts);
        self.detect_direction_disagreements(event_id, per_platform, now, &mut alerts);
        self.detect_availability(event_id, kickoff_time, per_platform, now, &mut alerts);

        alerts
    }

    // -- price_change ----------------------------------------------------

    fn detect_price_changes(
        &self,
        event_id: i64,
        per_platform: &[(Bookmaker, &Classification)],
        now: DateTime<Utc>,
        alerts: &mut Vec<RiskAlert>,
    ) {
        let mut emitted: HashSet<(Bookmaker, String, String)> = HashSet::new();

        for (bookmaker, classification) in per_platform {
            for delta in &classification.deltas {
                if delta.kind != DeltaKind::Changed {
                    continue;
                }
                for mv in outcome_moves(delta) {
                    let Some(severity) = self.thresholds.severity(mv.change_percent.abs()) else {
                        continue;
                    };
                    let key = (
                        *bookmaker,
                        mv.canonical_market_id.clone(),
                        mv.outcome_name.clone(),
                    );
                    if !emitted.insert(key) {
                        continue;
                    }
                    alerts.push(RiskAlert {
                        event_id,
                        bookmaker: *bookmaker,
                        canonical_market_id: mv.canonical_market_id.clone(),
                        line: mv.line,
                        outcome_name: mv.outcome_name.clone(),
                        alert_type: AlertType::PriceChange,
                        severity,
                        change_percent: Some(mv.change_percent),
                        old_value: Some(mv.old_odds),
                        new_value: Some(mv.new_odds),
                        competitor_direction: None,
                        detected_at: now,
                        status: AlertStatus::New,
                    });
                }
            }
        }
    }

    // -- direction_disagreement ------------------------------------------

    fn detect_direction_disagreements(
        &self,
        event_id: i64,
        per_platform: &[(Bookmaker, &Classification)],
        now: DateTime<Utc>,
        alerts: &mut Vec<RiskAlert>,
    ) {
        let reference = per_platform
            .iter()
            .find(|(bookmaker, _)| bookmaker.is_reference());
        let Some((_, reference_class)) = reference else {
            return;
        };

        let mut emitted: HashSet<(String, Decimal, String)> = HashSet::new();

        for delta in &reference_class.deltas {
            if delta.kind != DeltaKind::Changed {
                continue;
            }
            for reference_move in outcome_moves(delta) {
                let key = (
                    reference_move.canonical_market_id.clone(),
                    line_or_zero(reference_move.line),
                    reference_move.outcome_name.clone(),
                );
                if emitted.contains(&key) {
                    continue;
                }

                // A competitor moving the opposite way by at least T2.
                let opposing = per_platform
                    .iter()
                    .filter(|(bookmaker, _)| !bookmaker.is_reference())
                    .find_map(|(_, classification)| {
                        competitor_opposing_move(
                            classification,
                            &reference_move,
                            self.thresholds.elevated,
                        )
                    });

                if let Some(competitor_direction) = opposing {
                    emitted.insert(key);
                    alerts.push(RiskAlert {
                        event_id,
                        bookmaker: Bookmaker::Betpawa,
                        canonical_market_id: reference_move.canonical_market_id.clone(),
                        line: reference_move.line,
                        outcome_name: reference_move.outcome_name.clone(),
                        alert_type: AlertType::DirectionDisagreement,
                        severity: AlertSeverity::Elevated,
                        change_percent: Some(reference_move.change_percent),
                        old_value: Some(reference_move.old_odds),
                        new_value: Some(reference_move.new_odds),
                        competitor_direction: Some(competitor_direction),
                        detected_at: now,
                        status: AlertStatus::New,
                    });
                }
            }
        }
    }

    // -- availability ----------------------------------------------------

    fn detect_availability(
        &self,
        event_id: i64,
        kickoff_time: DateTime<Utc>,
        per_platform: &[(Bookmaker, &Classification)],
        now: DateTime<Utc>,
        alerts: &mut Vec<RiskAlert>,
    ) {
        // Only pre-event flips inside the imminent window are alertable.
        let until_kickoff = kickoff_time - now;
        if until_kickoff <= Duration::zero() || until_kickoff >= self.imminent_window {
            return;
        }

        for (bookmaker, classification) in per_platform {
            for delta in &classification.deltas {
                if !matches!(delta.kind, DeltaKind::Disappeared | DeltaKind::Returned) {
                    continue;
                }
                alerts.push(RiskAlert {
                    event_id,
                    bookmaker: *bookmaker,
                    canonical_market_id: delta.write.canonical_market_id.clone(),
                    line: delta.write.line,
                    outcome_name: String::new(),
                    alert_type: AlertType::Availability,
                    severity: AlertSeverity::Elevated,
                    change_percent: None,
                    old_value: None,
                    new_value: None,
                    competitor_direction: None,
                    detected_at: now,
                    status: AlertStatus::New,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Move extraction
// ---------------------------------------------------------------------------

/// Active-outcome movements within one changed delta, matched to the
/// previous content by outcome name.
fn outcome_moves(delta: &MarketDelta) -> Vec<OutcomeMove> {
    let Some(previous) = &delta.previous else {
        return Vec::new();
    };

    delta
        .write
        .outcomes
        .iter()
        .filter(|o| o.is_active)
        .filter_map(|new_outcome| {
            let old_outcome = previous
                .outcomes
                .iter()
                .find(|o| o.name == new_outcome.name && o.is_active)?;
            if old_outcome.odds == Decimal::ZERO {
                return None;
            }
            let direction = Direction::of(old_outcome.odds, new_outcome.odds)?;
            let change_percent =
                (new_outcome.odds - old_outcome.odds) / old_outcome.odds * dec!(100);
            Some(OutcomeMove {
                canonical_market_id: delta.write.canonical_market_id.clone(),
                line: delta.write.line,
                outcome_name: new_outcome.name.clone(),
                old_odds: old_outcome.odds,
                new_odds: new_outcome.odds,
                change_percent,
                direction,
            })
        })
        .collect()
}

/// Find a competitor move on the same `(market, line, outcome)` going
/// the opposite direction by at least `threshold` percent.
fn competitor_opposing_move(
    classification: &Classification,
    reference_move: &OutcomeMove,
    threshold: Decimal,
) -> Option<Direction> {
    for delta in &classification.deltas {
        if delta.kind != DeltaKind::Changed {
            continue;
        }
        if delta.write.canonical_market_id != reference_move.canonical_market_id
            || line_or_zero(delta.write.line) != line_or_zero(reference_move.line)
        {
            continue;
        }
        for mv in outcome_moves(delta) {
            if mv.outcome_name == reference_move.outcome_name
                && mv.direction != reference_move.direction
                && mv.change_percent.abs() >= threshold
            {
                return Some(mv.direction);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
