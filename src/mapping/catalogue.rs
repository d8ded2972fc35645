//! Code-shipped market catalogue.
//!
//! The baseline canonical catalogue, merged with operator entries at
//! startup (operator wins per canonical id). This is a data asset:
//! entries mirror the reference platform's football offering and pin
//! each platform's identifier for it. A `None` platform id means the
//! platform doesn't offer the market; handler `Unsupported` means the
//! market is offered but intentionally not comparable (free-text or
//! player-prop shaped).

use super::{HandlerKind, MappingSource, MarketMapping, OutcomeMapping};

type Outs = &'static [(&'static str, &'static str, &'static str, &'static str)];

const O_1X2: Outs = &[
    ("1", "1", "Home", "1"),
    ("X", "X", "Draw", "X"),
    ("2", "2", "Away", "2"),
];
const O_OU: Outs = &[("Over", "Over", "Over", "O"), ("Under", "Under", "Under", "U")];
const O_DC: Outs = &[
    ("1X", "1X", "Home or Draw", "1X"),
    ("12", "12", "Home or Away", "12"),
    ("X2", "X2", "Draw or Away", "X2"),
];
const O_HOME_AWAY: Outs = &[("Home", "1", "Home", "1"), ("Away", "2", "Away", "2")];
const O_YES_NO: Outs = &[("Yes", "Yes", "Yes", "Y"), ("No", "No", "No", "N")];
const O_GG_NG: Outs = &[("Yes", "Yes", "Yes", "GG"), ("No", "No", "No", "NG")];
const O_ODD_EVEN: Outs = &[("Odd", "Odd", "Odd", "ODD"), ("Even", "Even", "Even", "EVEN")];
const O_FIRST_TEAM: Outs = &[
    ("1", "1", "Home", "1"),
    ("None", "None", "No Goal", "NG"),
    ("2", "2", "Away", "2"),
];
const O_HALF_COMPARE: Outs = &[
    ("1st Half", "1st Half", "1st Half", "1T"),
    ("Equal", "Equal", "Equal", "EQ"),
    ("2nd Half", "2nd Half", "2nd Half", "2T"),
];
const O_HTFT: Outs = &[
    ("1/1", "1/1", "Home/Home", "11"),
    ("1/X", "1/X", "Home/Draw", "1X"),
    ("1/2", "1/2", "Home/Away", "12"),
    ("X/1", "X/1", "Draw/Home", "X1"),
    ("X/X", "X/X", "Draw/Draw", "XX"),
    ("X/2", "X/2", "Draw/Away", "X2"),
    ("2/1", "2/1", "Away/Home", "21"),
    ("2/X", "2/X", "Away/Draw", "2X"),
    ("2/2", "2/2", "Away/Away", "22"),
];
const O_EXACT_GOALS: Outs = &[
    ("0", "0", "0", "0"),
    ("1", "1", "1", "1"),
    ("2", "2", "2", "2"),
    ("3", "3", "3", "3"),
    ("4", "4", "4", "4"),
    ("5+", "5+", "5+", "5P"),
];
const O_EXACT_GOALS_TEAM: Outs = &[
    ("0", "0", "0", "0"),
    ("1", "1", "1", "1"),
    ("2", "2", "2", "2"),
    ("3+", "3+", "3+", "3P"),
];
const O_1X2_OU: Outs = &[
    ("1 & Over", "1 & Over", "Home & Over", "1O"),
    ("1 & Under", "1 & Under", "Home & Under", "1U"),
    ("X & Over", "X & Over", "Draw & Over", "XO"),
    ("X & Under", "X & Under", "Draw & Under", "XU"),
    ("2 & Over", "2 & Over", "Away & Over", "2O"),
    ("2 & Under", "2 & Under", "Away & Under", "2U"),
];
const O_1X2_GG: Outs = &[
    ("1 & Yes", "1 & Yes", "Home & Yes", "1GG"),
    ("1 & No", "1 & No", "Home & No", "1NG"),
    ("X & Yes", "X & Yes", "Draw & Yes", "XGG"),
    ("X & No", "X & No", "Draw & No", "XNG"),
    ("2 & Yes", "2 & Yes", "Away & Yes", "2GG"),
    ("2 & No", "2 & No", "Away & No", "2NG"),
];
const O_GOAL_RANGE: Outs = &[
    ("0-1", "0-1", "0-1", "01"),
    ("2-3", "2-3", "2-3", "23"),
    ("4-6", "4-6", "4-6", "46"),
    ("7+", "7+", "7+", "7P"),
];
const O_WINNING_MARGIN: Outs = &[
    ("Home by 1", "Home by 1", "Home by 1", "H1"),
    ("Home by 2", "Home by 2", "Home by 2", "H2"),
    ("Home by 3+", "Home by 3+", "Home by 3+", "H3"),
    ("Draw", "Draw", "Draw", "X"),
    ("Away by 1", "Away by 1", "Away by 1", "A1"),
    ("Away by 2", "Away by 2", "Away by 2", "A2"),
    ("Away by 3+", "Away by 3+", "Away by 3+", "A3"),
];

fn opt(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn entry(
    handler: HandlerKind,
    canonical_id: &str,
    name: &str,
    betpawa_id: &str,
    sportybet_id: &str,
    bet9ja_key: &str,
    outcomes: Outs,
) -> MarketMapping {
    MarketMapping {
        canonical_id: canonical_id.to_string(),
        name: name.to_string(),
        handler,
        betpawa_id: opt(betpawa_id),
        sportybet_id: opt(sportybet_id),
        bet9ja_key: opt(bet9ja_key),
        outcomes: outcomes
            .iter()
            .enumerate()
            .map(|(i, (name, bp, sb, b9))| OutcomeMapping {
                name: name.to_string(),
                betpawa_name: opt(bp),
                sportybet_desc: opt(sb),
                bet9ja_suffix: opt(b9),
                position: i as u16,
            })
            .collect(),
        source: MappingSource::Code,
        priority: 0,
    }
}

/// The code-shipped catalogue in canonical (reference-platform) order.
/// `priority` is assigned from the position in this list.
pub fn code_mappings() -> Vec<MarketMapping> {
    use HandlerKind::{Handicap, OverUnder, Simple, Unsupported};

    let mut mappings = vec![
        // -- Match result family ------------------------------------------
        entry(Simple, "1X2_FT", "1X2 | Full Time", "3743", "1", "1X2", O_1X2),
        entry(Simple, "1X2_1H", "1X2 | 1st Half", "3744", "8", "1X21T", O_1X2),
        entry(Simple, "1X2_2H", "1X2 | 2nd Half", "3745", "9", "1X22T", O_1X2),
        entry(Simple, "DC_FT", "Double Chance | Full Time", "3747", "10", "DC", O_DC),
        entry(Simple, "DC_1H", "Double Chance | 1st Half", "3748", "63", "DC1T", O_DC),
        entry(Simple, "DC_2H", "Double Chance | 2nd Half", "3749", "64", "DC2T", O_DC),
        entry(Simple, "DNB_FT", "Draw No Bet | Full Time", "3752", "11", "DNB", O_HOME_AWAY),
        entry(Simple, "DNB_1H", "Draw No Bet | 1st Half", "3753", "65", "DNB1T", O_HOME_AWAY),
        entry(Simple, "DNB_2H", "Draw No Bet | 2nd Half", "3754", "89", "DNB2T", O_HOME_AWAY),
        // -- Totals family -------------------------------------------------
        entry(OverUnder, "OU_FT", "Over/Under | Full Time", "3795", "18", "OU", O_OU),
        entry(OverUnder, "OU_1H", "Over/Under | 1st Half", "3796", "68", "OU1T", O_OU),
        entry(OverUnder, "OU_2H", "Over/Under | 2nd Half", "3797", "90", "OU2T", O_OU),
        entry(OverUnder, "OU_HOME_FT", "Home Over/Under | Full Time", "3798", "19", "OUHOME", O_OU),
        entry(OverUnder, "OU_AWAY_FT", "Away Over/Under | Full Time", "3799", "20", "OUAWAY", O_OU),
        entry(OverUnder, "OU_HOME_1H", "Home Over/Under | 1st Half", "3800", "69", "OUHOME1T", O_OU),
        entry(OverUnder, "OU_AWAY_1H", "Away Over/Under | 1st Half", "3801", "70", "OUAWAY1T", O_OU),
        // -- Handicap family -----------------------------------------------
        entry(Handicap, "AH_FT", "Asian Handicap | Full Time", "3901", "16", "AHND", O_HOME_AWAY),
        entry(Handicap, "AH_1H", "Asian Handicap | 1st Half", "3902", "66", "", O_HOME_AWAY),
        entry(Handicap, "EH_FT", "European Handicap | Full Time", "3905", "14", "HND", O_1X2),
        entry(Handicap, "EH_1H", "European Handicap | 1st Half", "3906", "67", "HND1T", O_1X2),
        // -- Both teams to score -------------------------------------------
        entry(Simple, "BTTS_FT", "Both Teams To Score | Full Time", "3810", "29", "GG", O_GG_NG),
        entry(Simple, "BTTS_1H", "Both Teams To Score | 1st Half", "3811", "75", "GG1T", O_GG_NG),
        entry(Simple, "BTTS_2H", "Both Teams To Score | 2nd Half", "3812", "76", "GG2T", O_GG_NG),
        // -- Odd/even ------------------------------------------------------
        entry(Simple, "ODDEVEN_FT", "Odd/Even | Full Time", "3820", "26", "OE", O_ODD_EVEN),
        entry(Simple, "ODDEVEN_1H", "Odd/Even | 1st Half", "3821", "73", "OE1T", O_ODD_EVEN),
        entry(Simple, "ODDEVEN_2H", "Odd/Even | 2nd Half", "3822", "74", "OE2T", O_ODD_EVEN),
        entry(Simple, "ODDEVEN_HOME", "Home Odd/Even", "3823", "27", "OEHOME", O_ODD_EVEN),
        entry(Simple, "ODDEVEN_AWAY", "Away Odd/Even", "3824", "28", "OEAWAY", O_ODD_EVEN),
        // -- Half/full time ------------------------------------------------
        entry(Simple, "HTFT", "Half Time/Full Time", "3830", "47", "HTFT", O_HTFT),
        entry(Simple, "HIGHEST_HALF", "Highest Scoring Half", "3833", "53", "HSH", O_HALF_COMPARE),
        entry(Simple, "HIGHEST_HALF_HOME", "Home Highest Scoring Half", "3834", "54", "HSHHOME", O_HALF_COMPARE),
        entry(Simple, "HIGHEST_HALF_AWAY", "Away Highest Scoring Half", "3835", "55", "HSHAWAY", O_HALF_COMPARE),
        // -- Goalscoring shape ---------------------------------------------
        entry(Simple, "FIRST_TEAM_TO_SCORE", "First Team To Score", "3840", "60", "FTS", O_FIRST_TEAM),
        entry(Simple, "LAST_TEAM_TO_SCORE", "Last Team To Score", "3841", "61", "LTS", O_FIRST_TEAM),
        entry(Simple, "EXACT_GOALS_FT", "Exact Goals | Full Time", "3845", "21", "EXG", O_EXACT_GOALS),
        entry(Simple, "EXACT_GOALS_1H", "Exact Goals | 1st Half", "3846", "71", "EXG1T", O_EXACT_GOALS),
        entry(Simple, "EXACT_GOALS_HOME", "Home Exact Goals", "3847", "23", "EXGHOME", O_EXACT_GOALS_TEAM),
        entry(Simple, "EXACT_GOALS_AWAY", "Away Exact Goals", "3848", "24", "EXGAWAY", O_EXACT_GOALS_TEAM),
        entry(Simple, "GOAL_RANGE_FT", "Goal Range | Full Time", "3850", "25", "GR", O_GOAL_RANGE),
        entry(Simple, "WINNING_MARGIN", "Winning Margin", "3853", "57", "WM", O_WINNING_MARGIN),
        // -- Team performance ----------------------------------------------
        entry(Simple, "CLEAN_SHEET_HOME", "Home Clean Sheet", "3860", "30", "CSHOME", O_YES_NO),
        entry(Simple, "CLEAN_SHEET_AWAY", "Away Clean Sheet", "3861", "31", "CSAWAY", O_YES_NO),
        entry(Simple, "WIN_TO_NIL_HOME", "Home Win To Nil", "3862", "32", "WTNHOME", O_YES_NO),
        entry(Simple, "WIN_TO_NIL_AWAY", "Away Win To Nil", "3863", "33", "WTNAWAY", O_YES_NO),
        entry(Simple, "WIN_EITHER_HALF_HOME", "Home Win Either Half", "3864", "48", "WEHHOME", O_YES_NO),
        entry(Simple, "WIN_EITHER_HALF_AWAY", "Away Win Either Half", "3865", "49", "WEHAWAY", O_YES_NO),
        entry(Simple, "WIN_BOTH_HALVES_HOME", "Home Win Both Halves", "3866", "50", "WBHHOME", O_YES_NO),
        entry(Simple, "WIN_BOTH_HALVES_AWAY", "Away Win Both Halves", "3867", "51", "WBHAWAY", O_YES_NO),
        entry(Simple, "SCORE_BOTH_HALVES_HOME", "Home Scores In Both Halves", "3868", "78", "SBHHOME", O_YES_NO),
        entry(Simple, "SCORE_BOTH_HALVES_AWAY", "Away Scores In Both Halves", "3869", "79", "SBHAWAY", O_YES_NO),
        entry(Simple, "COMEBACK_WIN", "Team To Win From Behind", "3870", "59", "", O_HOME_AWAY),
        // -- Combos --------------------------------------------------------
        entry(OverUnder, "1X2_OU_FT", "1X2 & Over/Under", "3880", "37", "1X2OU", O_1X2_OU),
        entry(Simple, "1X2_BTTS_FT", "1X2 & Both Teams To Score", "3881", "35", "1X2GG", O_1X2_GG),
        entry(OverUnder, "BTTS_OU_FT", "Both Teams To Score & Over/Under", "3882", "36", "GGOU", &[
            ("Yes & Over", "Yes & Over", "Yes & Over", "GGO"),
            ("Yes & Under", "Yes & Under", "Yes & Under", "GGU"),
            ("No & Over", "No & Over", "No & Over", "NGO"),
            ("No & Under", "No & Under", "No & Under", "NGU"),
        ]),
        entry(Simple, "DC_BTTS_FT", "Double Chance & Both Teams To Score", "3883", "38", "DCGG", &[
            ("1X & Yes", "1X & Yes", "Home or Draw & Yes", "1XGG"),
            ("1X & No", "1X & No", "Home or Draw & No", "1XNG"),
            ("12 & Yes", "12 & Yes", "Home or Away & Yes", "12GG"),
            ("12 & No", "12 & No", "Home or Away & No", "12NG"),
            ("X2 & Yes", "X2 & Yes", "Draw or Away & Yes", "X2GG"),
            ("X2 & No", "X2 & No", "Draw or Away & No", "X2NG"),
        ]),
        // -- Timed goals ---------------------------------------------------
        entry(Simple, "GOAL_BEFORE_10", "Goal Before 10 Minutes", "3890", "96", "G10", O_YES_NO),
        entry(Simple, "GOAL_BEFORE_30", "Goal Before 30 Minutes", "3891", "97", "G30", O_YES_NO),
        entry(Simple, "GOAL_BOTH_HALVES", "Goal In Both Halves", "3892", "80", "GBH", O_YES_NO),
        // -- Corners -------------------------------------------------------
        entry(Simple, "CORNERS_1X2", "Corners 1X2", "3910", "164", "CR1X2", O_1X2),
        entry(OverUnder, "CORNERS_OU_FT", "Corners Over/Under | Full Time", "3911", "166", "CROU", O_OU),
        entry(OverUnder, "CORNERS_OU_1H", "Corners Over/Under | 1st Half", "3912", "167", "CROU1T", O_OU),
        entry(Handicap, "CORNERS_HND", "Corners Handicap", "3913", "165", "CRHND", O_HOME_AWAY),
        entry(Simple, "CORNERS_ODDEVEN", "Corners Odd/Even", "3914", "168", "CROE", O_ODD_EVEN),
        entry(Simple, "CORNERS_RANGE", "Corners Range", "3915", "169", "CRR", &[
            ("0-8", "0-8", "0-8", "08"),
            ("9-11", "9-11", "9-11", "911"),
            ("12+", "12+", "12+", "12P"),
        ]),
        entry(Simple, "FIRST_CORNER", "First Corner", "3916", "170", "", O_HOME_AWAY),
        // -- Bookings ------------------------------------------------------
        entry(OverUnder, "BOOKINGS_OU", "Bookings Over/Under", "3920", "139", "", O_OU),
        entry(Simple, "RED_CARD", "Red Card In Match", "3921", "142", "RC", O_YES_NO),
        entry(Simple, "HOME_RED_CARD", "Home Red Card", "3922", "143", "RCHOME", O_YES_NO),
        entry(Simple, "AWAY_RED_CARD", "Away Red Card", "3923", "144", "RCAWAY", O_YES_NO),
        // -- Specials ------------------------------------------------------
        entry(Simple, "PENALTY_AWARDED", "Penalty Awarded", "3930", "150", "PEN", O_YES_NO),
        entry(Simple, "OWN_GOAL", "Own Goal", "3931", "151", "OG", O_YES_NO),
        entry(Simple, "BOTH_HALVES_OVER_1_5", "Both Halves Over 1.5", "3932", "81", "BHO15", O_YES_NO),
        entry(Simple, "BOTH_HALVES_UNDER_1_5", "Both Halves Under 1.5", "3933", "82", "BHU15", O_YES_NO),
        // -- Not comparable across platforms -------------------------------
        entry(Unsupported, "CORRECT_SCORE_FT", "Correct Score | Full Time", "3940", "45", "CS", &[]),
        entry(Unsupported, "CORRECT_SCORE_1H", "Correct Score | 1st Half", "3941", "46", "CS1T", &[]),
        entry(Unsupported, "ANYTIME_SCORER", "Anytime Goalscorer", "3942", "891", "", &[]),
        entry(Unsupported, "FIRST_SCORER", "First Goalscorer", "3943", "888", "", &[]),
        entry(Unsupported, "SCORECAST", "Scorecast", "3944", "892", "", &[]),
    ];

    // Per-line pre-seeded totals the reference platform lists as
    // separate tiles. They share the over/under handler; the line still
    // comes from the payload parameter.
    for (i, line) in ["0.5", "1.5", "2.5", "3.5", "4.5", "5.5"].iter().enumerate() {
        mappings.push(entry(
            OverUnder,
            &format!("OU_FT_{}", line.replace('.', "_")),
            &format!("Over/Under {line} Goals"),
            &format!("40{i:02}"),
            &format!("18{i:02}"),
            "",
            O_OU,
        ));
        mappings.push(entry(
            OverUnder,
            &format!("OU_1H_{}", line.replace('.', "_")),
            &format!("1st Half Over/Under {line} Goals"),
            &format!("41{i:02}"),
            &format!("68{i:02}"),
            "",
            O_OU,
        ));
    }

    // "Team to score in half" grid.
    for (team, team_name, sb_base, b9_base, bp_base) in [
        ("HOME", "Home", 300, "TSH", 4200),
        ("AWAY", "Away", 310, "TSA", 4210),
    ] {
        for (half, half_name) in [("1H", "1st Half"), ("2H", "2nd Half")] {
            mappings.push(entry(
                HandlerKind::Simple,
                &format!("TEAM_SCORE_{team}_{half}"),
                &format!("{team_name} To Score | {half_name}"),
                &format!("{}", bp_base + if half == "1H" { 0 } else { 1 }),
                &format!("{}", sb_base + if half == "1H" { 0 } else { 1 }),
                &format!("{b9_base}{}", if half == "1H" { "1T" } else { "2T" }),
                O_YES_NO,
            ));
        }
    }

    // Multigoal bands.
    for (idx, band) in ["1-2", "1-3", "1-4", "2-3", "2-4", "3-5", "4-6", "5-7"].iter().enumerate() {
        mappings.push(entry(
            HandlerKind::Simple,
            &format!("MULTIGOAL_{}", band.replace('-', "_")),
            &format!("Multigoal {band}"),
            &format!("43{idx:02}"),
            &format!("551{idx}"),
            "",
            O_YES_NO,
        ));
    }

    for (i, mapping) in mappings.iter_mut().enumerate() {
        mapping.priority = i as i32;
    }
    mappings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
