//! Golf arithmetic used by the round and stats screens.

use crate::types::UnitPreference;
use serde::{Deserialize, Serialize};
use std::fmt;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const YARDS_PER_METRE: f64 = 1.09361;
const METRES_PER_YARD: f64 = 0.9144;
const STANDARD_SLOPE: f64 = 113.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lie {
    Tee,
    Fairway,
    Green,
    Other,
}

/// Great-circle (haversine) distance in whole yards.
pub fn distance_yards(a: GpsCoordinate, b: GpsCoordinate) -> i64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    (EARTH_RADIUS_M * c * YARDS_PER_METRE).round() as i64
}

pub fn yards_to_metres(yards: f64) -> i64 {
    (yards * METRES_PER_YARD).round() as i64
}

pub fn metres_to_yards(metres: f64) -> i64 {
    (metres * YARDS_PER_METRE).round() as i64
}

/// Distance between two points expressed in the user's preferred unit.
pub fn distance_in(unit: UnitPreference, a: GpsCoordinate, b: GpsCoordinate) -> i64 {
    let yards = distance_yards(a, b);
    match unit {
        UnitPreference::Imperial => yards,
        UnitPreference::Metric => yards_to_metres(yards as f64),
    }
}

pub fn net_score(gross: i32, handicap: f64) -> i32 {
    gross - handicap.round() as i32
}

/// Course handicap for a given slope; a missing (zero) slope means the standard 113.
pub fn playing_handicap(handicap_index: f64, slope: f64) -> i32 {
    let slope = if slope > 0.0 { slope } else { STANDARD_SLOPE };
    (handicap_index * slope / STANDARD_SLOPE).round() as i32
}

pub fn scoring_differential(adjusted_gross: f64, course_rating: f64, slope: f64) -> f64 {
    (adjusted_gross - course_rating) * STANDARD_SLOPE / slope
}

/// On the green in par minus two strokes or fewer.
pub fn is_green_in_regulation(strokes_before_green: u32, par: u32) -> bool {
    strokes_before_green + 2 <= par
}

fn percentage(hit: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(hit) / f64::from(total) * 100.0).round() as u32
}

pub fn fairway_accuracy(fairways_hit: u32, total_fairways: u32) -> u32 {
    percentage(fairways_hit, total_fairways)
}

pub fn gir_percentage(greens_hit: u32, total_holes: u32) -> u32 {
    percentage(greens_hit, total_holes)
}

pub fn average_putts(total_putts: u32, total_holes: u32) -> f64 {
    if total_holes == 0 {
        return 0.0;
    }
    round2(f64::from(total_putts) / f64::from(total_holes))
}

/// Positive is better than the baseline.
pub fn strokes_gained(actual: f64, expected: f64) -> f64 {
    round2(expected - actual)
}

/// Simplified tour baseline of strokes to hole out from `yards`.
pub fn expected_strokes(yards: f64, lie: Lie) -> f64 {
    match lie {
        Lie::Tee => match yards {
            y if y >= 450.0 => 4.5,
            y if y >= 400.0 => 4.2,
            y if y >= 350.0 => 4.0,
            _ => 3.8,
        },
        Lie::Fairway => match yards {
            y if y >= 200.0 => 3.5,
            y if y >= 150.0 => 3.2,
            y if y >= 100.0 => 3.0,
            y if y >= 50.0 => 2.8,
            _ => 2.5,
        },
        Lie::Green => match yards {
            y if y >= 30.0 => 2.5,
            y if y >= 20.0 => 2.3,
            y if y >= 10.0 => 2.1,
            _ => 2.0,
        },
        Lie::Other => 3.0,
    }
}

/// Initial bearing from `start` to `end` in whole degrees, 0..360.
pub fn bearing(start: GpsCoordinate, end: GpsCoordinate) -> u32 {
    let phi1 = start.latitude.to_radians();
    let phi2 = end.latitude.to_radians();
    let d_lambda = (end.longitude - start.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let degrees = (y.atan2(x).to_degrees() + 360.0) % 360.0;
    (degrees.round() as u32) % 360
}

pub fn compass_direction(bearing: u32) -> &'static str {
    const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    DIRECTIONS[((f64::from(bearing) / 45.0).round() as usize) % 8]
}

/// `E`, `+3` or `-2`.
pub fn format_to_par(score: i32, par: i32) -> String {
    match score - par {
        0 => "E".to_string(),
        d if d > 0 => format!("+{d}"),
        d => d.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreName {
    Albatross,
    Eagle,
    Birdie,
    Par,
    Bogey,
    DoubleBogey,
    TripleBogey,
    Over(i32),
}

impl ScoreName {
    pub fn for_hole(score: i32, par: i32) -> Self {
        match score - par {
            d if d <= -3 => Self::Albatross,
            -2 => Self::Eagle,
            -1 => Self::Birdie,
            0 => Self::Par,
            1 => Self::Bogey,
            2 => Self::DoubleBogey,
            3 => Self::TripleBogey,
            d => Self::Over(d),
        }
    }
}

impl fmt::Display for ScoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Albatross => f.write_str("Albatross"),
            Self::Eagle => f.write_str("Eagle"),
            Self::Birdie => f.write_str("Birdie"),
            Self::Par => f.write_str("Par"),
            Self::Bogey => f.write_str("Bogey"),
            Self::DoubleBogey => f.write_str("Double Bogey"),
            Self::TripleBogey => f.write_str("Triple Bogey"),
            Self::Over(d) => write!(f, "+{d}"),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
