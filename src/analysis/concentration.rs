use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Holder counts reported by the top-N share table.
pub const TOP_SHARE_COUNTS: [u32; 4] = [5, 10, 20, 50];

/// Number of sampled points on the Lorenz curve (plus the origin).
pub const LORENZ_RESOLUTION: usize = 100;

/// One point on the Lorenz curve: cumulative population share against
/// cumulative wealth share, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LorenzPoint {
    pub population: f64,
    pub wealth: f64,
}

/// Concentration measures over a holder balance distribution.
///
/// All fields are derived from integer base-unit balances; degenerate inputs
/// (no holders, zero total) produce sentinel values with `degenerate` set
/// rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationMetrics {
    /// Gini coefficient in [0, 1].
    pub gini: f64,
    /// Herfindahl-Hirschman index in [0, 10000].
    pub hhi: f64,
    /// Smallest holder count controlling a strict majority of held supply.
    pub nakamoto: u32,
    /// Top-10% share over bottom-40% share. `None` when either cohort is
    /// empty (fewer than ten holders) or the bottom cohort holds nothing.
    pub palma: Option<f64>,
    /// Share of held supply that would need redistribution for equality.
    pub hoover: f64,
    /// Theil entropy index, 0 for perfect equality.
    pub theil: f64,
    /// Held-supply share of the top N holders for N in `TOP_SHARE_COUNTS`.
    pub top_shares: BTreeMap<u32, f64>,
    pub lorenz: Vec<LorenzPoint>,
    /// Set when the input was empty or summed to zero.
    pub degenerate: bool,
}

impl Default for ConcentrationMetrics {
    fn default() -> Self {
        Self {
            gini: 0.0,
            hhi: 0.0,
            nakamoto: 0,
            palma: None,
            hoover: 0.0,
            theil: 0.0,
            top_shares: BTreeMap::new(),
            lorenz: vec![
                LorenzPoint { population: 0.0, wealth: 0.0 },
                LorenzPoint { population: 1.0, wealth: 1.0 },
            ],
            degenerate: true,
        }
    }
}

impl ConcentrationMetrics {
    /// Compute the full metric set for a balance distribution. Ordering of
    /// the input does not matter.
    pub fn compute(balances: &[u128]) -> Self {
        let total: u128 = balances.iter().sum();
        if balances.is_empty() || total == 0 {
            return Self::default();
        }

        let mut ascending = balances.to_vec();
        ascending.sort_unstable();
        let mut descending = ascending.clone();
        descending.reverse();

        let mut top_shares = BTreeMap::new();
        for n in TOP_SHARE_COUNTS {
            top_shares.insert(n, top_n_share(&descending, total, n as usize));
        }

        Self {
            gini: gini(&ascending, total),
            hhi: hhi(&ascending, total),
            nakamoto: nakamoto(&descending, total),
            palma: palma(&descending, total),
            hoover: hoover(&ascending, total),
            theil: theil(&ascending, total),
            top_shares,
            lorenz: lorenz_points(&ascending, total),
            degenerate: false,
        }
    }
}

/// Gini coefficient over ascending-sorted balances:
/// G = (2 * sum(i * b_i)) / (n * T) - (n + 1) / n, clamped to [0, 1].
/// Returns 0 for n <= 1 or zero total.
pub fn gini(ascending: &[u128], total: u128) -> f64 {
    let n = ascending.len();
    if n <= 1 || total == 0 {
        return 0.0;
    }
    let weighted: f64 = ascending
        .iter()
        .enumerate()
        .map(|(i, &b)| (i as f64 + 1.0) * b as f64)
        .sum();
    let n_f = n as f64;
    let g = (2.0 * weighted) / (n_f * total as f64) - (n_f + 1.0) / n_f;
    g.clamp(0.0, 1.0)
}

/// Herfindahl-Hirschman index: sum of squared supply shares, scaled to the
/// traditional 0..10000 range.
pub fn hhi(balances: &[u128], total: u128) -> f64 {
    if balances.is_empty() || total == 0 {
        return 0.0;
    }
    let total_f = total as f64;
    let sum: f64 = balances
        .iter()
        .map(|&b| {
            let share = b as f64 / total_f;
            share * share
        })
        .sum();
    sum * 10_000.0
}

/// Smallest k such that the top-k balances strictly exceed half the total.
/// Zero only when the distribution is empty or worthless.
pub fn nakamoto(descending: &[u128], total: u128) -> u32 {
    if descending.is_empty() || total == 0 {
        return 0;
    }
    let mut running: u128 = 0;
    for (i, &balance) in descending.iter().enumerate() {
        running += balance;
        // running > total / 2, kept in integer arithmetic
        if running * 2 > total {
            return (i + 1) as u32;
        }
    }
    descending.len() as u32
}

/// Palma ratio: top-10% share over bottom-40% share. Cohort sizes use
/// integer division, so fewer than ten holders leaves the top cohort empty
/// and the ratio undefined.
pub fn palma(descending: &[u128], total: u128) -> Option<f64> {
    let n = descending.len();
    if total == 0 {
        return None;
    }
    let top_count = n / 10;
    let bottom_count = (n * 2) / 5;
    if top_count == 0 || bottom_count == 0 {
        return None;
    }
    let top_sum: u128 = descending[..top_count].iter().sum();
    let bottom_sum: u128 = descending[n - bottom_count..].iter().sum();
    if bottom_sum == 0 {
        return None;
    }
    Some(top_sum as f64 / bottom_sum as f64)
}

/// Hoover (Robin Hood) index: half the relative mean absolute deviation.
pub fn hoover(balances: &[u128], total: u128) -> f64 {
    let n = balances.len();
    if n == 0 || total == 0 {
        return 0.0;
    }
    let mean = total as f64 / n as f64;
    let deviations: f64 = balances.iter().map(|&b| (b as f64 - mean).abs()).sum();
    deviations / (2.0 * total as f64)
}

/// Theil entropy index over positive balances.
pub fn theil(balances: &[u128], total: u128) -> f64 {
    let n = balances.len();
    if n == 0 || total == 0 {
        return 0.0;
    }
    let mean = total as f64 / n as f64;
    let n_f = n as f64;
    balances
        .iter()
        .filter(|&&b| b > 0)
        .map(|&b| {
            let x = b as f64 / mean;
            x * x.ln() / n_f
        })
        .sum()
}

/// Held-supply share of the top `n` holders (all of them when fewer exist).
pub fn top_n_share(descending: &[u128], total: u128, n: usize) -> f64 {
    if descending.is_empty() || total == 0 {
        return 0.0;
    }
    let count = n.min(descending.len());
    let top_sum: u128 = descending[..count].iter().sum();
    top_sum as f64 / total as f64
}

/// Lorenz curve sampled at `LORENZ_RESOLUTION` population-share steps.
/// Always starts at (0, 0) and ends at (1, 1).
pub fn lorenz_points(ascending: &[u128], total: u128) -> Vec<LorenzPoint> {
    let n = ascending.len();
    if n == 0 || total == 0 {
        return vec![
            LorenzPoint { population: 0.0, wealth: 0.0 },
            LorenzPoint { population: 1.0, wealth: 1.0 },
        ];
    }

    let mut prefix: Vec<u128> = Vec::with_capacity(n + 1);
    prefix.push(0);
    let mut running = 0u128;
    for &b in ascending {
        running += b;
        prefix.push(running);
    }

    let steps = LORENZ_RESOLUTION.min(n);
    let mut points = Vec::with_capacity(steps + 1);
    for k in 0..=steps {
        let idx = (k * n) / steps;
        points.push(LorenzPoint {
            population: idx as f64 / n as f64,
            wealth: prefix[idx] as f64 / total as f64,
        });
    }
    points
}
