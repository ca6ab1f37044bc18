//! Risk Scorer
//!
//! Pure function from the traversal output to a score in [0,100], a level
//! and a reason list. No I/O, no clock, no failure path: the same inputs
//! always produce the same output, which the report cache depends on.
//!
//! Scoring model:
//!
//!   raw = sum over flagged nodes of  W(tag) * 0.5^(d-1) * min(1, ln(1+c)/K)
//!
//! W is the signed tag weight, d the hop distance (1 = direct contact),
//! c the value contribution in native units and K the log-damp constant
//! that caps the influence of any single transfer.

use crate::models::types::{FlaggedEntity, RiskLevel, RiskScore};

/// Reason sentences are emitted for nodes with |W * decay| above this
const REASON_VISIBILITY_THRESHOLD: f64 = 0.1;

/// Distance decay: halves per hop beyond the first
pub fn distance_decay(distance: u32) -> f64 {
    0.5f64.powi(distance.saturating_sub(1) as i32)
}

/// Log-damped contribution factor in [0,1]
pub fn contribution_damp(contribution: f64, k: f64) -> f64 {
    (contribution.max(0.0).ln_1p() / k).min(1.0)
}

/// Signed score points (on the 0-100 scale) one flagged node adds
pub fn entity_points(entity: &FlaggedEntity, k: f64) -> f64 {
    entity.tag.weight() * distance_decay(entity.distance) * contribution_damp(entity.contribution, k) * 100.0
}

/// Compute the final score. `extra_notes` are traversal notes (budget
/// bounds, unavailable metadata) appended verbatim after the scoring
/// reasons; `circular_paths` adds its own note.
pub fn score(
    flagged: &[FlaggedEntity],
    circular_paths: u32,
    extra_notes: &[String],
    k: f64,
) -> RiskScore {
    let raw: f64 = flagged
        .iter()
        .map(|e| e.tag.weight() * distance_decay(e.distance) * contribution_damp(e.contribution, k))
        .sum();

    let score = (100.0 * raw.clamp(0.0, 1.0)).round() as u8;
    let level = RiskLevel::from_score(score);

    let mut reasons = Vec::new();

    // per-node sentences, strongest signal first
    let mut visible: Vec<&FlaggedEntity> = flagged
        .iter()
        .filter(|e| (e.tag.weight() * distance_decay(e.distance)).abs() >= REASON_VISIBILITY_THRESHOLD)
        .collect();
    visible.sort_by(|a, b| {
        let wd_a = a.tag.weight() * distance_decay(a.distance);
        let wd_b = b.tag.weight() * distance_decay(b.distance);
        wd_b.partial_cmp(&wd_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.distance.cmp(&b.distance))
    });
    for entity in visible {
        let points = entity_points(entity, k);
        let direction = if points >= 0.0 { "increases" } else { "reduces" };
        reasons.push(format!(
            "Address {} tagged {} at distance {} {} risk by {:.1}",
            short_address(&entity.address),
            entity.tag.as_str(),
            entity.distance,
            direction,
            points.abs()
        ));
    }

    // summary sentence
    if flagged.is_empty() {
        reasons.push("No suspicious entities detected within the trace depth".to_string());
    } else {
        let min_distance = flagged.iter().map(|e| e.distance).min().unwrap_or(0);
        reasons.push(format!(
            "{} flagged {} found, nearest at distance {}",
            flagged.len(),
            if flagged.len() == 1 { "entity" } else { "entities" },
            min_distance
        ));
    }

    if circular_paths > 0 {
        reasons.push(format!(
            "Circular transaction paths detected ({})",
            circular_paths
        ));
    }

    reasons.extend(extra_notes.iter().cloned());

    RiskScore {
        score,
        level,
        reasons,
    }
}

fn short_address(address: &str) -> String {
    if address.len() > 10 {
        format!("{}...", &address[..10])
    } else {
        address.to_string()
    }
}
