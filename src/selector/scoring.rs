use crate::index::{Campaign, FileRef};

/// Weighted-sum scoring table. Weights sum to 1.0; all sub-scores are
/// already normalized to `[0, 1]` before weighting, so `score()`'s output
/// is itself in `[0, 1]`.
const WEIGHT_RESOLUTION: f64 = 0.55;
const WEIGHT_RECENCY: f64 = 0.20;
const WEIGHT_PRIORITY: f64 = 0.15;
const WEIGHT_PROVIDER_TRUST: f64 = 0.10;

const RESOLUTION_BEST_M: f64 = 0.25;
const RESOLUTION_WORST_M: f64 = 30.0;

/// Table of known provider trust scores; unknown providers score 0.5.
/// Providers here are the ones the source index's `provider` field
/// actually carries for the two supplied survey programs.
fn provider_trust(provider: &str) -> f64 {
    match provider.to_ascii_lowercase().as_str() {
        "ga" | "geoscience australia" => 0.95,
        "linz" | "land information new zealand" => 0.95,
        "state government" => 0.8,
        _ => 0.5,
    }
}

fn resolution_score(resolution_m: f64) -> f64 {
    if resolution_m <= 0.0 {
        return 1.0;
    }
    let raw = 1.0 - (resolution_m / RESOLUTION_BEST_M).log10() / (RESOLUTION_WORST_M / RESOLUTION_BEST_M).log10();
    raw.clamp(0.0, 1.0)
}

fn recency_score(latest_survey_year: Option<i32>, current_year: i32) -> f64 {
    let Some(year) = latest_survey_year else {
        return 0.0;
    };
    if current_year <= 2000 {
        return 0.0;
    }
    (((year - 2000) as f64) / ((current_year - 2000) as f64)).clamp(0.0, 1.0)
}

fn priority_score(priority: u8) -> f64 {
    ((5 - priority.clamp(1, 4) as i32) as f64) / 4.0
}

/// Weighted score for one `(campaign, file)` candidate pair. Higher is better.
pub fn score(campaign: &Campaign, file: &FileRef, current_year: i32) -> f64 {
    WEIGHT_RESOLUTION * resolution_score(file.resolution_m)
        + WEIGHT_RECENCY * recency_score(campaign.latest_survey_year(), current_year)
        + WEIGHT_PRIORITY * priority_score(campaign.priority)
        + WEIGHT_PROVIDER_TRUST * provider_trust(&campaign.provider)
}
