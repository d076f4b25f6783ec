//! # sm-astro-natal
//!
//! Self-contained implementation of `Ephemeris`. The sun sign comes from the
//! exact tropical calendar boundaries; moon and inner planets use mean
//! ecliptic longitudes (linear motion since J2000). Sign-level accuracy is
//! all the persona profile needs, and this keeps the binary free of native
//! ephemeris libraries.

use chrono::{NaiveDate, TimeZone, Utc};

use sm_core::models::{BirthData, NatalChart, ZodiacSign};
use sm_core::traits::Ephemeris;

/// J2000.0 epoch as a unix timestamp (2000-01-01T12:00:00Z).
const J2000_UNIX: i64 = 946_728_000;

/// Mean daily motion in degrees and mean longitude at J2000, per body.
/// Values from standard low-precision Keplerian element tables.
const MOON: (f64, f64) = (218.316, 13.176396);
const MERCURY: (f64, f64) = (252.251, 4.092317);
const VENUS: (f64, f64) = (181.980, 1.602136);
const MARS: (f64, f64) = (355.433, 0.524039);

/// Tropical sun-sign boundaries as (month, day, sign starting that day).
const SUN_BOUNDARIES: [(u32, u32, ZodiacSign); 12] = [
    (1, 20, ZodiacSign::Aquarius),
    (2, 19, ZodiacSign::Pisces),
    (3, 21, ZodiacSign::Aries),
    (4, 20, ZodiacSign::Taurus),
    (5, 21, ZodiacSign::Gemini),
    (6, 21, ZodiacSign::Cancer),
    (7, 23, ZodiacSign::Leo),
    (8, 23, ZodiacSign::Virgo),
    (9, 23, ZodiacSign::Libra),
    (10, 23, ZodiacSign::Scorpio),
    (11, 22, ZodiacSign::Sagittarius),
    (12, 22, ZodiacSign::Capricorn),
];

fn sun_sign(month: u32, day: u32) -> ZodiacSign {
    let mut sign = ZodiacSign::Capricorn; // carries over from late December
    for (m, d, s) in SUN_BOUNDARIES {
        if (month, day) >= (m, d) {
            sign = s;
        }
    }
    sign
}

fn mean_longitude(epoch: f64, rate: f64, days_since_j2000: f64) -> f64 {
    (epoch + rate * days_since_j2000).rem_euclid(360.0)
}

pub struct NatalCalculator;

impl NatalCalculator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NatalCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl Ephemeris for NatalCalculator {
    fn natal_chart(&self, birth: &BirthData) -> anyhow::Result<NatalChart> {
        let date = NaiveDate::from_ymd_opt(birth.year, birth.month, birth.day)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid birth date {}-{:02}-{:02}",
                    birth.year,
                    birth.month,
                    birth.day
                )
            })?;
        let time = date
            .and_hms_opt(birth.hour, birth.minute, 0)
            .ok_or_else(|| {
                anyhow::anyhow!("invalid birth time {:02}:{:02}", birth.hour, birth.minute)
            })?;
        let moment = Utc.from_utc_datetime(&time);
        let days = (moment.timestamp() - J2000_UNIX) as f64 / 86_400.0;

        Ok(NatalChart {
            sun: sun_sign(birth.month, birth.day),
            moon: ZodiacSign::from_longitude(mean_longitude(MOON.0, MOON.1, days)),
            mercury: ZodiacSign::from_longitude(mean_longitude(MERCURY.0, MERCURY.1, days)),
            venus: ZodiacSign::from_longitude(mean_longitude(VENUS.0, VENUS.1, days)),
            mars: ZodiacSign::from_longitude(mean_longitude(MARS.0, MARS.1, days)),
        })
    }
}
