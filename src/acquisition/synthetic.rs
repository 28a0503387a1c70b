//! Terminal quote source: deterministic synthetic data, seeded from the
//! symbol itself so repeated scans of the same symbol see identical series.
//! Always succeeds, which is what makes the source chain total.

use async_trait::async_trait;
use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use sha2::{Digest, Sha256};

use crate::acquisition::QuoteSource;
use crate::error::SourceError;
use crate::models::{Fundamentals, PriceBar};

/// Sessions generated per month of requested history.
const SESSIONS_PER_MONTH: usize = 22;
/// Indicator warm-up needs a floor regardless of the configured window.
const MIN_GENERATED_SESSIONS: usize = 60;

struct Profile {
    name: &'static str,
    cmp: f64,
    pe: f64,
    roce: f64,
    bv: f64,
    debt: f64,
    industry: &'static str,
}

/// Curated profiles for a handful of well-known symbols. Everything else
/// gets the generic profile.
const PROFILES: [(&str, Profile); 5] = [
    (
        "TCS",
        Profile {
            name: "Tata Consultancy Services",
            cmp: 3852.40,
            pe: 28.54,
            roce: 52.3,
            bv: 285.20,
            debt: 12000.0,
            industry: "IT Services",
        },
    ),
    (
        "INFY",
        Profile {
            name: "Infosys Limited",
            cmp: 1523.75,
            pe: 25.18,
            roce: 36.82,
            bv: 220.45,
            debt: 3800.0,
            industry: "IT Services",
        },
    ),
    (
        "NMDC",
        Profile {
            name: "NMDC Limited",
            cmp: 127.30,
            pe: 8.42,
            roce: 22.10,
            bv: 95.60,
            debt: 4200.0,
            industry: "Mining & Minerals",
        },
    ),
    (
        "TECHM",
        Profile {
            name: "Tech Mahindra Limited",
            cmp: 1342.90,
            pe: 32.05,
            roce: 14.50,
            bv: 380.10,
            debt: 9100.0,
            industry: "IT Services",
        },
    ),
    (
        "WIPRO",
        Profile {
            name: "Wipro Limited",
            cmp: 452.15,
            pe: 22.78,
            roce: 18.92,
            bv: 130.80,
            debt: 6200.0,
            industry: "IT Services",
        },
    ),
];

const DEFAULT_PROFILE: Profile = Profile {
    name: "",
    cmp: 500.0,
    pe: 18.0,
    roce: 15.0,
    bv: 120.0,
    debt: 2500.0,
    industry: "General",
};

struct DipShape {
    start_frac: f64,
    depth: f64,
    recovery_days: usize,
}

/// Symbols whose synthetic series dip hard and start recovering near the
/// end of the window. These exercise the oversold-reversal detector.
const DIP_SHAPES: [(&str, DipShape); 2] = [
    (
        "NMDC",
        DipShape {
            start_frac: 0.78,
            depth: 0.22,
            recovery_days: 6,
        },
    ),
    (
        "WIPRO",
        DipShape {
            start_frac: 0.82,
            depth: 0.16,
            recovery_days: 10,
        },
    ),
];

pub struct SyntheticSource {
    sessions: usize,
}

impl SyntheticSource {
    pub fn new(history_months: u32) -> Self {
        let sessions = (history_months as usize * SESSIONS_PER_MONTH).max(MIN_GENERATED_SESSIONS);
        Self { sessions }
    }

    pub fn fundamentals_for(&self, symbol: &str) -> Fundamentals {
        let known = PROFILES.iter().find(|(s, _)| *s == symbol).map(|(_, p)| p);
        let profile = known.unwrap_or(&DEFAULT_PROFILE);
        let name = match known {
            Some(p) => p.name.to_string(),
            None => format!("{symbol} (synthetic)"),
        };
        Fundamentals {
            symbol: symbol.to_string(),
            name: Some(name),
            cmp: Some(profile.cmp),
            pe: Some(profile.pe),
            roce: Some(profile.roce),
            bv: Some(profile.bv),
            debt: Some(profile.debt),
            industry: Some(profile.industry.to_string()),
        }
    }

    pub fn price_history_for(&self, symbol: &str) -> Vec<PriceBar> {
        let mut rng = StdRng::seed_from_u64(seed_for(symbol));
        let profile = PROFILES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, p)| p)
            .unwrap_or(&DEFAULT_PROFILE);
        // Start below the quoted price so a generic walk has room to drift up.
        let base = profile.cmp * 0.92;
        let closes = match DIP_SHAPES.iter().find(|(s, _)| *s == symbol) {
            Some((_, shape)) => dip_and_recovery(&mut rng, base, self.sessions, shape),
            None => random_walk(&mut rng, base, self.sessions, 0.012, 0.0002),
        };
        business_days_ending(Local::now().date_naive(), self.sessions)
            .into_iter()
            .zip(closes)
            .map(|(date, close)| PriceBar { date, close })
            .collect()
    }
}

#[async_trait]
impl QuoteSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn remote(&self) -> bool {
        false
    }

    fn offers_fundamentals(&self) -> bool {
        true
    }

    async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, SourceError> {
        Ok(self.fundamentals_for(symbol))
    }

    async fn fetch_price_history(&self, symbol: &str) -> Result<Vec<PriceBar>, SourceError> {
        Ok(self.price_history_for(symbol))
    }
}

// ── Generators ────────────────────────────────────────────────────────────────

fn seed_for(symbol: &str) -> u64 {
    let digest = Sha256::digest(symbol.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

// Box-Muller transform. The `1.0 - u` keeps ln() away from zero.
fn gauss(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn random_walk(rng: &mut StdRng, base: f64, n: usize, daily_vol: f64, drift: f64) -> Vec<f64> {
    let mut closes = Vec::with_capacity(n);
    if n == 0 {
        return closes;
    }
    let mut last = round2(base);
    closes.push(last);
    for _ in 1..n {
        let ret = drift + daily_vol * gauss(rng);
        last = round2(last * (1.0 + ret));
        closes.push(last);
    }
    closes
}

/// Three-phase series: uptrend into a peak, a grinding slide to the target
/// trough, then an accelerating bounce. Whatever room is left levels out.
fn dip_and_recovery(rng: &mut StdRng, base: f64, n: usize, shape: &DipShape) -> Vec<f64> {
    let dip_start = (n as f64 * shape.start_frac) as usize;
    let recovery = shape.recovery_days.max(1);
    let dip_len = n.saturating_sub(dip_start + recovery).max(5);

    let mut closes = random_walk(rng, base, dip_start, 0.008, 0.0003);
    let peak = closes.last().copied().unwrap_or(base);
    let mut last = peak;

    let target = peak * (1.0 - shape.depth);
    let daily_drop = (peak - target) / dip_len as f64;
    for _ in 0..dip_len {
        let noise = gauss(rng) * daily_drop * 0.15;
        last = round2(last - daily_drop + noise);
        closes.push(last);
    }

    let trough = last;
    let daily_bounce = (peak - trough) * 0.35 / recovery as f64;
    for i in 0..recovery {
        let factor = 1.0 + (i as f64 / recovery as f64) * 0.5;
        let noise = gauss(rng) * daily_bounce * 0.2;
        last = round2(last + daily_bounce * factor + noise);
        closes.push(last);
    }

    while closes.len() < n {
        last = round2(last * (1.0 + 0.005 * gauss(rng)));
        closes.push(last);
    }
    closes.truncate(n);
    closes
}

/// The `n` most recent weekdays up to and including `end` (or the nearest
/// prior weekday), ascending.
fn business_days_ending(end: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(n);
    let mut day = end;
    while dates.len() < n {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
        day = match day.checked_sub_days(Days::new(1)) {
            Some(prev) => prev,
            None => break,
        };
    }
    dates.reverse();
    dates
}

// ── Tests ─────────────────────────────────────────────────────────────────────
