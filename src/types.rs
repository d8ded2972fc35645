//! Shared types for the pawaRisk pipeline.
//!
//! These types form the data model used across all modules: bookmaker
//! identity, normalized markets, cached snapshots, write DTOs, risk
//! alerts and the scrape-run lifecycle. They are designed to be stable
//! so that platform, mapping, engine and store modules can depend on
//! them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Bookmakers
// ---------------------------------------------------------------------------

/// The three bookmakers the pipeline scrapes. BetPawa is the reference
/// platform whose market catalogue is canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bookmaker {
    Betpawa,
    Sportybet,
    Bet9ja,
}

impl Bookmaker {
    /// All bookmakers, reference platform first.
    pub const ALL: &'static [Bookmaker] =
        &[Bookmaker::Betpawa, Bookmaker::Sportybet, Bookmaker::Bet9ja];

    /// Stable slug used as a key in the store and on the wire.
    pub fn slug(&self) -> &'static str {
        match self {
            Bookmaker::Betpawa => "betpawa",
            Bookmaker::Sportybet => "sportybet",
            Bookmaker::Bet9ja => "bet9ja",
        }
    }

    /// Whether this is the reference platform.
    pub fn is_reference(&self) -> bool {
        matches!(self, Bookmaker::Betpawa)
    }
}

impl fmt::Display for Bookmaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl std::str::FromStr for Bookmaker {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "betpawa" => Ok(Bookmaker::Betpawa),
            "sportybet" => Ok(Bookmaker::Sportybet),
            "bet9ja" => Ok(Bookmaker::Bet9ja),
            _ => Err(anyhow::anyhow!("Unknown bookmaker slug: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized markets
// ---------------------------------------------------------------------------

/// One priced outcome of a mapped market, already renamed to its
/// canonical outcome name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedOutcome {
    pub name: String,
    pub odds: Decimal,
    pub is_active: bool,
}

/// Handicap parameterisation of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandicapKind {
    /// Whole-goal head start, e.g. `0:1`.
    European,
    /// Fractional line, e.g. `-0.5`.
    Asian,
}

/// The handicap triple carried by handicap markets: the kind plus the
/// per-team lines (always `home == -away`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handicap {
    pub kind: HandicapKind,
    pub home: Decimal,
    pub away: Decimal,
}

/// Output of a per-platform mapper for one raw market on one event.
///
/// `line` is populated for over/under and handicap markets so that
/// `(canonical_id, line)` works as the cross-platform join key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedMarket {
    pub canonical_id: String,
    pub name: String,
    pub line: Option<Decimal>,
    pub handicap: Option<Handicap>,
    pub outcomes: Vec<MappedOutcome>,
    pub groups: Vec<String>,
}

impl MappedMarket {
    /// The join key used for cross-platform matching and change
    /// detection. A missing line participates as zero.
    pub fn join_key(&self) -> (String, Decimal) {
        (self.canonical_id.clone(), line_or_zero(self.line))
    }
}

impl fmt::Display for MappedMarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} @ {line} ({} outcomes)", self.canonical_id, self.outcomes.len()),
            None => write!(f, "{} ({} outcomes)", self.canonical_id, self.outcomes.len()),
        }
    }
}

/// Normalise an optional line for keying: `None` and `0` are the same key.
pub fn line_or_zero(line: Option<Decimal>) -> Decimal {
    line.unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Odds cache entries
// ---------------------------------------------------------------------------

/// What the odds cache stores for one market instance. Immutable once
/// constructed; snapshots are swapped whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMarket {
    pub canonical_id: String,
    pub name: String,
    pub line: Option<Decimal>,
    pub handicap: Option<Handicap>,
    pub outcomes: Vec<MappedOutcome>,
    pub groups: Vec<String>,
    /// When this market stopped being offered; `None` while live.
    pub unavailable_at: Option<DateTime<Utc>>,
}

impl CachedMarket {
    /// Build a live cache entry from a freshly mapped market.
    pub fn from_mapped(market: &MappedMarket) -> Self {
        CachedMarket {
            canonical_id: market.canonical_id.clone(),
            name: market.name.clone(),
            line: market.line,
            handicap: market.handicap,
            outcomes: market.outcomes.clone(),
            groups: market.groups.clone(),
            unavailable_at: None,
        }
    }

    /// Join key, same shape as [`MappedMarket::join_key`].
    pub fn join_key(&self) -> (String, Decimal) {
        (self.canonical_id.clone(), line_or_zero(self.line))
    }

    /// Whether the market is currently offered.
    pub fn is_available(&self) -> bool {
        self.unavailable_at.is_none()
    }
}

/// The latest scraped state for one `(event, bookmaker)` pair.
/// The cache holds at most one of these per pair; history lives only
/// in the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub event_id: i64,
    pub bookmaker: Bookmaker,
    pub kickoff_time: DateTime<Utc>,
    /// Wall-clock time of the most recent scrape (not the most recent change).
    pub captured_at: DateTime<Utc>,
    /// Freshness timestamp exposed to readers.
    pub last_confirmed_at: DateTime<Utc>,
    pub markets: Vec<CachedMarket>,
}

impl CachedSnapshot {
    /// Find a market by its join key.
    pub fn market(&self, canonical_id: &str, line: Option<Decimal>) -> Option<&CachedMarket> {
        let key = line_or_zero(line);
        self.markets
            .iter()
            .find(|m| m.canonical_id == canonical_id && line_or_zero(m.line) == key)
    }
}

// ---------------------------------------------------------------------------
// Write path DTOs
// ---------------------------------------------------------------------------

/// Market-granular write DTO handed from the coordinator to the
/// asynchronous write handler. One row per market per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCurrentWrite {
    pub event_id: i64,
    pub bookmaker: Bookmaker,
    pub canonical_market_id: String,
    pub market_name: String,
    pub line: Option<Decimal>,
    pub handicap: Option<Handicap>,
    pub outcomes: Vec<MappedOutcome>,
    pub groups: Vec<String>,
    /// When true the handler appends a history row and bumps
    /// `last_updated_at`; when false only `last_confirmed_at` moves.
    pub changed: bool,
    pub unavailable_at: Option<DateTime<Utc>>,
}

/// A batch of writes plus the alerts minted while producing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBatch {
    pub run_id: Uuid,
    /// Cycle capture time shared by every row in the batch.
    pub captured_at: DateTime<Utc>,
    pub writes: Vec<MarketCurrentWrite>,
    pub alerts: Vec<RiskAlert>,
}

impl WriteBatch {
    pub fn new(run_id: Uuid, captured_at: DateTime<Utc>) -> Self {
        WriteBatch {
            run_id,
            captured_at,
            writes: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.alerts.is_empty()
    }

    /// Number of writes that will produce history rows.
    pub fn changed_count(&self) -> usize {
        self.writes.iter().filter(|w| w.changed).count()
    }
}

// ---------------------------------------------------------------------------
// Risk alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PriceChange,
    DirectionDisagreement,
    Availability,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PriceChange => "price_change",
            AlertType::DirectionDisagreement => "direction_disagreement",
            AlertType::Availability => "availability",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity bands derived from the configured thresholds T1/T2/T3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Elevated,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Elevated => "elevated",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Past,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Past => "past",
        }
    }
}

/// Direction of a price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Direction of `new` relative to `old`; `None` when unchanged.
    pub fn of(old: Decimal, new: Decimal) -> Option<Direction> {
        if new > old {
            Some(Direction::Up)
        } else if new < old {
            Some(Direction::Down)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// A typed alert emitted by the risk detector and persisted by the
/// write handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub event_id: i64,
    pub bookmaker: Bookmaker,
    pub canonical_market_id: String,
    pub line: Option<Decimal>,
    pub outcome_name: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub change_percent: Option<Decimal>,
    pub old_value: Option<Decimal>,
    pub new_value: Option<Decimal>,
    /// For direction disagreements: which way the competitor moved.
    pub competitor_direction: Option<Direction>,
    pub detected_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl fmt::Display for RiskAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} ({})",
            self.severity, self.alert_type, self.bookmaker, self.canonical_market_id, self.outcome_name,
        )
    }
}

// ---------------------------------------------------------------------------
// Discovery / scheduling
// ---------------------------------------------------------------------------

/// How one platform refers to an event discovered this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEventRef {
    pub bookmaker: Bookmaker,
    /// The id used by listing endpoints.
    pub external_id: String,
    /// The id the single-event endpoint wants, when it differs from
    /// `external_id` (Bet9ja).
    pub fetch_id: Option<String>,
}

impl PlatformEventRef {
    /// The id to pass to `fetch_event`.
    pub fn fetch_ref(&self) -> &str {
        self.fetch_id.as_deref().unwrap_or(&self.external_id)
    }
}

/// Per-cycle scheduling record: one event, joined across platforms by
/// sportradar id. Created at discovery, destroyed at cycle end.
#[derive(Debug, Clone)]
pub struct EventTarget {
    pub event_id: i64,
    pub sportradar_id: Option<String>,
    pub kickoff_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub platforms: Vec<PlatformEventRef>,
}

impl EventTarget {
    /// How many platforms offer this event.
    pub fn coverage(&self) -> usize {
        self.platforms.len()
    }

    pub fn has_betpawa(&self) -> bool {
        self.platforms.iter().any(|p| p.bookmaker.is_reference())
    }

    pub fn platform(&self, bookmaker: Bookmaker) -> Option<&PlatformEventRef> {
        self.platforms.iter().find(|p| p.bookmaker == bookmaker)
    }
}

/// Synthetic internal id for events that exist only on a competitor
/// (no sportradar join). FNV-1a over `(slug, external_id)`, folded into
/// `[1_000_000_000, i64::MAX)` so it can never collide with
/// store-assigned sequence ids.
pub fn synthetic_event_id(bookmaker: Bookmaker, external_id: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    const FLOOR: i64 = 1_000_000_000;

    let mut hash = FNV_OFFSET;
    for byte in bookmaker.slug().bytes().chain([b':']).chain(external_id.bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    let span = (i64::MAX - FLOOR) as u64;
    FLOOR + (hash % span) as i64
}

// ---------------------------------------------------------------------------
// Scrape run lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeRunStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl ScrapeRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeRunStatus::Pending => "pending",
            ScrapeRunStatus::Running => "running",
            ScrapeRunStatus::Completed => "completed",
            ScrapeRunStatus::Partial => "partial",
            ScrapeRunStatus::Failed => "failed",
        }
    }

    /// Terminal states cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScrapeRunStatus::Completed | ScrapeRunStatus::Partial | ScrapeRunStatus::Failed
        )
    }
}

impl fmt::Display for ScrapeRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScrapeRunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScrapeRunStatus::Pending),
            "running" => Ok(ScrapeRunStatus::Running),
            "completed" => Ok(ScrapeRunStatus::Completed),
            "partial" => Ok(ScrapeRunStatus::Partial),
            "failed" => Ok(ScrapeRunStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown scrape run status: {s}")),
        }
    }
}

/// Error kinds recorded on `scrape_errors` rows and in `EVENT_SCRAPED`
/// progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeErrorKind {
    Network,
    Api,
    Parse,
    Mapping,
    Store,
    Timeout,
    Stale,
    Cancelled,
}

impl ScrapeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeErrorKind::Network => "network",
            ScrapeErrorKind::Api => "api",
            ScrapeErrorKind::Parse => "parse",
            ScrapeErrorKind::Mapping => "mapping",
            ScrapeErrorKind::Store => "store",
            ScrapeErrorKind::Timeout => "timeout",
            ScrapeErrorKind::Stale => "stale",
            ScrapeErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScrapeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Progress events (scrape_progress topic payloads)
// ---------------------------------------------------------------------------

/// Phase events the coordinator publishes on the `scrape_progress`
/// topic. Serialized as the `data` field of a broadcast envelope whose
/// `type` is [`ProgressEvent::kind`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    CycleStart {
        run_id: Uuid,
    },
    DiscoveryComplete {
        run_id: Uuid,
        event_count: usize,
        platform_counts: std::collections::HashMap<String, usize>,
    },
    BatchStart {
        run_id: Uuid,
        batch_index: usize,
        batch_count: usize,
        event_count: usize,
    },
    EventScraping {
        run_id: Uuid,
        event_id: i64,
        bookmaker: Bookmaker,
    },
    EventScraped {
        run_id: Uuid,
        event_id: i64,
        bookmaker: Bookmaker,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<ScrapeErrorKind>,
    },
    BatchComplete {
        run_id: Uuid,
        batch_index: usize,
        markets_written: usize,
    },
    CycleComplete {
        run_id: Uuid,
        status: ScrapeRunStatus,
        event_count: usize,
        changed_markets: usize,
        duration_ms: u64,
    },
    CycleFailed {
        run_id: Uuid,
        reason: String,
    },
}

impl ProgressEvent {
    /// Wire name of this phase event.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::CycleStart { .. } => "CYCLE_START",
            ProgressEvent::DiscoveryComplete { .. } => "DISCOVERY_COMPLETE",
            ProgressEvent::BatchStart { .. } => "BATCH_START",
            ProgressEvent::EventScraping { .. } => "EVENT_SCRAPING",
            ProgressEvent::EventScraped { .. } => "EVENT_SCRAPED",
            ProgressEvent::BatchComplete { .. } => "BATCH_COMPLETE",
            ProgressEvent::CycleComplete { .. } => "CYCLE_COMPLETE",
            ProgressEvent::CycleFailed { .. } => "CYCLE_FAILED",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // -- Bookmaker tests --

    #[test]
    fn test_bookmaker_slug_roundtrip() {
        for bk in Bookmaker::ALL {
            let parsed: Bookmaker = bk.slug().parse().unwrap();
            assert_eq!(*bk, parsed);
        }
    }

    #[test]
    fn test_bookmaker_reference() {
        assert!(Bookmaker::Betpawa.is_reference());
        assert!(!Bookmaker::Sportybet.is_reference());
        assert!(!Bookmaker::Bet9ja.is_reference());
    }

    #[test]
    fn test_bookmaker_serde_is_slug() {
        let json = serde_json::to_string(&Bookmaker::Bet9ja).unwrap();
        assert_eq!(json, "\"bet9ja\"");
        let parsed: Bookmaker = serde_json::from_str("\"sportybet\"").unwrap();
        assert_eq!(parsed, Bookmaker::Sportybet);
    }

    // -- Join key tests --

    #[test]
    fn test_line_or_zero() {
        assert_eq!(line_or_zero(None), Decimal::ZERO);
        assert_eq!(line_or_zero(Some(dec!(2.5))), dec!(2.5));
    }

    #[test]
    fn test_mapped_market_join_key() {
        let market = MappedMarket {
            canonical_id: "OVER_UNDER_FT".to_string(),
            name: "Over/Under".to_string(),
            line: Some(dec!(2.5)),
            handicap: None,
            outcomes: vec![],
            groups: vec![],
        };
        assert_eq!(market.join_key(), ("OVER_UNDER_FT".to_string(), dec!(2.5)));

        let no_line = MappedMarket { line: None, ..market };
        assert_eq!(no_line.join_key().1, Decimal::ZERO);
    }

    // -- CachedMarket tests --

    #[test]
    fn test_cached_market_from_mapped() {
        let mapped = MappedMarket {
            canonical_id: "1X2_FT".to_string(),
            name: "1X2".to_string(),
            line: None,
            handicap: None,
            outcomes: vec![MappedOutcome {
                name: "1".to_string(),
                odds: dec!(2.10),
                is_active: true,
            }],
            groups: vec!["Main".to_string()],
        };
        let cached = CachedMarket::from_mapped(&mapped);
        assert_eq!(cached.canonical_id, "1X2_FT");
        assert!(cached.is_available());
        assert_eq!(cached.outcomes.len(), 1);
    }

    #[test]
    fn test_snapshot_market_lookup_by_line() {
        let snap = CachedSnapshot {
            event_id: 42,
            bookmaker: Bookmaker::Betpawa,
            kickoff_time: Utc::now(),
            captured_at: Utc::now(),
            last_confirmed_at: Utc::now(),
            markets: vec![
                CachedMarket {
                    canonical_id: "OU_FT".to_string(),
                    name: "O/U".to_string(),
                    line: Some(dec!(2.5)),
                    handicap: None,
                    outcomes: vec![],
                    groups: vec![],
                    unavailable_at: None,
                },
                CachedMarket {
                    canonical_id: "OU_FT".to_string(),
                    name: "O/U".to_string(),
                    line: Some(dec!(3.5)),
                    handicap: None,
                    outcomes: vec![],
                    groups: vec![],
                    unavailable_at: None,
                },
            ],
        };
        assert!(snap.market("OU_FT", Some(dec!(2.5))).is_some());
        assert!(snap.market("OU_FT", Some(dec!(3.5))).is_some());
        assert!(snap.market("OU_FT", Some(dec!(4.5))).is_none());
        assert!(snap.market("1X2_FT", None).is_none());
    }

    // -- Synthetic id tests --

    #[test]
    fn test_synthetic_id_stable() {
        let a = synthetic_event_id(Bookmaker::Bet9ja, "987654");
        let b = synthetic_event_id(Bookmaker::Bet9ja, "987654");
        assert_eq!(a, b);
    }

    #[test]
    fn test_synthetic_id_positive_and_offset() {
        for ext in ["1", "42", "sr-less-event", ""] {
            for bk in Bookmaker::ALL {
                let id = synthetic_event_id(*bk, ext);
                assert!(id >= 1_000_000_000, "id {id} below floor");
            }
        }
    }

    #[test]
    fn test_synthetic_id_distinguishes_platform() {
        let a = synthetic_event_id(Bookmaker::Sportybet, "123");
        let b = synthetic_event_id(Bookmaker::Bet9ja, "123");
        assert_ne!(a, b);
    }

    // -- Direction tests --

    #[test]
    fn test_direction_of() {
        assert_eq!(Direction::of(dec!(2.0), dec!(2.1)), Some(Direction::Up));
        assert_eq!(Direction::of(dec!(2.0), dec!(1.9)), Some(Direction::Down));
        assert_eq!(Direction::of(dec!(2.0), dec!(2.0)), None);
    }

    // -- Severity ordering --

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Warning < AlertSeverity::Elevated);
        assert!(AlertSeverity::Elevated < AlertSeverity::Critical);
    }

    // -- EventTarget tests --

    fn target_with(platforms: Vec<PlatformEventRef>) -> EventTarget {
        EventTarget {
            event_id: 1,
            sportradar_id: Some("5551234".to_string()),
            kickoff_time: Utc::now(),
            home_team: "Home".to_string(),
            away_team: "Away".to_string(),
            platforms,
        }
    }

    #[test]
    fn test_event_target_coverage() {
        let target = target_with(vec![
            PlatformEventRef {
                bookmaker: Bookmaker::Betpawa,
                external_id: "e1".to_string(),
                fetch_id: None,
            },
            PlatformEventRef {
                bookmaker: Bookmaker::Bet9ja,
                external_id: "e2".to_string(),
                fetch_id: Some("900112".to_string()),
            },
        ]);
        assert_eq!(target.coverage(), 2);
        assert!(target.has_betpawa());
        assert_eq!(
            target.platform(Bookmaker::Bet9ja).unwrap().fetch_ref(),
            "900112"
        );
        assert_eq!(
            target.platform(Bookmaker::Betpawa).unwrap().fetch_ref(),
            "e1"
        );
    }

    // -- Run status tests --

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            ScrapeRunStatus::Pending,
            ScrapeRunStatus::Running,
            ScrapeRunStatus::Completed,
            ScrapeRunStatus::Partial,
            ScrapeRunStatus::Failed,
        ] {
            let parsed: ScrapeRunStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!("bogus".parse::<ScrapeRunStatus>().is_err());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!ScrapeRunStatus::Pending.is_terminal());
        assert!(!ScrapeRunStatus::Running.is_terminal());
        assert!(ScrapeRunStatus::Completed.is_terminal());
        assert!(ScrapeRunStatus::Partial.is_terminal());
        assert!(ScrapeRunStatus::Failed.is_terminal());
    }

    // -- Progress event tests --

    #[test]
    fn test_progress_event_kinds() {
        let run_id = Uuid::new_v4();
        let event = ProgressEvent::CycleStart { run_id };
        assert_eq!(event.kind(), "CYCLE_START");

        let event = ProgressEvent::EventScraped {
            run_id,
            event_id: 7,
            bookmaker: Bookmaker::Sportybet,
            success: false,
            duration_ms: 120,
            error_kind: Some(ScrapeErrorKind::Api),
        };
        assert_eq!(event.kind(), "EVENT_SCRAPED");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["bookmaker"], "sportybet");
        assert_eq!(value["error_kind"], "api");
    }

    #[test]
    fn test_progress_event_omits_absent_error() {
        let event = ProgressEvent::EventScraped {
            run_id: Uuid::new_v4(),
            event_id: 7,
            bookmaker: Bookmaker::Betpawa,
            success: true,
            duration_ms: 45,
            error_kind: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("error_kind").is_none());
    }

    // -- WriteBatch tests --

    #[test]
    fn test_write_batch_changed_count() {
        let mut batch = WriteBatch::new(Uuid::new_v4(), Utc::now());
        assert!(batch.is_empty());

        for changed in [true, false, true] {
            batch.writes.push(MarketCurrentWrite {
                event_id: 1,
                bookmaker: Bookmaker::Betpawa,
                canonical_market_id: "1X2_FT".to_string(),
                market_name: "1X2".to_string(),
                line: None,
                handicap: None,
                outcomes: vec![],
                groups: vec![],
                changed,
                unavailable_at: None,
            });
        }
        assert_eq!(batch.changed_count(), 2);
        assert!(!batch.is_empty());
    }
}
