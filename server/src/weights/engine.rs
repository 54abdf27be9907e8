//! Per-pool scoring and weight normalization.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use vane_common::{MetricSample, ServerDescriptor, ServerPolicy, WeightAllocation, WeightFactors};

/// Weight assigned when no usable metrics exist for a pool.
pub const DEFAULT_WEIGHT: u32 = 10;

/// Raw scores below this are forced to weight 0 before renormalization.
pub const MIN_VIABLE_SCORE: f64 = 0.1;

/// Compute one pool's allocations from the latest samples.
///
/// `servers` is the pool's membership in render order; `samples` the latest
/// sample per server id; `policies` the operator overrides applied in the
/// final steps. Pure: same inputs and `now` produce identical output.
pub fn compute_pool(
    servers: &[ServerDescriptor],
    samples: &HashMap<String, MetricSample>,
    factors: &WeightFactors,
    policies: &HashMap<String, ServerPolicy>,
    now: DateTime<Utc>,
) -> Vec<WeightAllocation> {
    if servers.is_empty() {
        return Vec::new();
    }

    let alloc = |server: &ServerDescriptor, weight: u32, score: f64, reason: String| {
        WeightAllocation {
            server_id: server.id.clone(),
            address: server.address(),
            weight,
            health_score: score,
            reason,
            calculated_at: now,
        }
    };

    let contributors: Vec<&ServerDescriptor> = servers
        .iter()
        .filter(|s| s.enabled && samples.contains_key(&s.id))
        .collect();

    let mut allocations = Vec::with_capacity(servers.len());
    // Indices of contributor allocations, for the emergency fallback.
    let mut contributor_idx = Vec::with_capacity(contributors.len());

    if contributors.is_empty() {
        // No usable metrics: every enabled server gets the default weight so
        // the proxy still spreads traffic; disabled servers stay dark.
        for server in servers {
            if server.enabled {
                allocations.push(alloc(
                    server,
                    DEFAULT_WEIGHT,
                    0.0,
                    "Default weight - no metrics available".into(),
                ));
            } else if samples.contains_key(&server.id) {
                allocations.push(alloc(server, 0, 0.0, "Server manually disabled".into()));
            }
        }
    } else {
        let raw_total: f64 = contributors
            .iter()
            .map(|s| score_sample(&samples[&s.id], factors).0)
            .sum();

        for server in servers {
            let Some(sample) = samples.get(&server.id) else {
                continue;
            };
            if !server.enabled {
                allocations.push(alloc(server, 0, 0.0, "Server manually disabled".into()));
                continue;
            }

            let (raw, breakdown) = score_sample(sample, factors);
            contributor_idx.push(allocations.len());
            if raw_total <= 0.0 {
                allocations.push(alloc(
                    server,
                    DEFAULT_WEIGHT,
                    raw,
                    "Default weight - all servers unhealthy".into(),
                ));
            } else if breakdown.is_none() {
                allocations.push(alloc(server, 0, 0.0, "Invalid metrics".into()));
            } else if raw < MIN_VIABLE_SCORE {
                allocations.push(alloc(
                    server,
                    0,
                    raw,
                    format!("Unhealthy - score below viable threshold ({})", breakdown.unwrap()),
                ));
            } else {
                let weight = ((raw / raw_total * 100.0).round() as i64).clamp(1, 100) as u32;
                allocations.push(alloc(
                    server,
                    weight,
                    raw,
                    format!("Dynamic weight ({})", breakdown.unwrap()),
                ));
            }
        }
    }

    // Overrides land before the emergency decision: a pinned weight keeps
    // its server active, so the pool renormalizes around it instead of
    // falling back.
    apply_policy_overrides(&mut allocations, policies);
    let fallback_fired = apply_emergency_fallback(&mut allocations, &contributor_idx, policies);
    // An emergency pool intentionally carries a single weight-1 allocation;
    // scaling it to 100 would give a failing server full confidence.
    if !fallback_fired {
        renormalize(&mut allocations, policies);
    }
    allocations
}

/// The five sub-scores of one sample, formatted for allocation reasons.
#[must_use]
pub fn score_breakdown(sample: &MetricSample) -> String {
    format!(
        "rt={:.2} err={:.2} succ={:.2} to={:.2} up={:.2} deg={:.2}",
        score_response_time(sample.effective_latency_ms()),
        score_error_rate(sample.error_rate_pct),
        score_success_rate(sample.success_rate_pct),
        score_timeout_rate(sample.timeout_rate_pct),
        score_uptime(sample.uptime_pct),
        score_degradation(degradation_of(sample)),
    )
}

/// Composite raw score in [0, 1] plus the reason breakdown; `None`
/// breakdown marks a sample with unusable required fields.
fn score_sample(sample: &MetricSample, factors: &WeightFactors) -> (f64, Option<String>) {
    if !sample.has_valid_metrics() {
        return (0.0, None);
    }
    let rt = score_response_time(sample.effective_latency_ms());
    let err = score_error_rate(sample.error_rate_pct);
    let to = score_timeout_rate(sample.timeout_rate_pct);
    let up = score_uptime(sample.uptime_pct);
    let deg = score_degradation(degradation_of(sample));

    let raw = rt * factors.response_time
        + err * factors.error_rate
        + to * factors.timeout_rate
        + up * factors.uptime
        + deg * factors.degradation;
    (raw, Some(score_breakdown(sample)))
}

fn degradation_of(sample: &MetricSample) -> f64 {
    sample.degradation_score.unwrap_or_else(|| sample.degradation())
}

/// Up to 200 ms: 1.0; 200-500: 1.0 down to 0.5; 500-1000: 0.5 down to
/// 0.1; beyond: decays to 0 over the next second.
fn score_response_time(ms: f64) -> f64 {
    if ms <= 200.0 {
        1.0
    } else if ms <= 500.0 {
        1.0 - (ms - 200.0) / 300.0 * 0.5
    } else if ms <= 1000.0 {
        0.5 - (ms - 500.0) / 500.0 * 0.4
    } else {
        (0.1 - (ms - 1000.0) / 1000.0 * 0.1).max(0.0)
    }
}

/// 0 %: 1.0; 10 % or more: 0.0; linear between.
fn score_error_rate(pct: f64) -> f64 {
    (1.0 - pct / 10.0).clamp(0.0, 1.0)
}

/// 100 %: 1.0; 90 % or less: 0.0; linear between.
fn score_success_rate(pct: f64) -> f64 {
    ((pct - 90.0) / 10.0).clamp(0.0, 1.0)
}

/// 0 %: 1.0; 5 % or more: 0.0; linear between.
fn score_timeout_rate(pct: f64) -> f64 {
    (1.0 - pct / 5.0).clamp(0.0, 1.0)
}

/// 99.5 % or better: 1.0; 90 % or less: 0.0; linear between.
fn score_uptime(pct: f64) -> f64 {
    ((pct - 90.0) / 9.5).clamp(0.0, 1.0)
}

/// 0 or less: 1.0; 500 or more: 0.0; linear between.
fn score_degradation(score: f64) -> f64 {
    (1.0 - score / 500.0).clamp(0.0, 1.0)
}

/// If every allocation ended up inactive, put the least-unhealthy
/// contributor back with the minimum weight so the pool keeps serving.
/// Runs after policy overrides, so servers the operator pinned out
/// (removed, or fixed at 0) are never resurrected. Returns whether the
/// fallback fired.
fn apply_emergency_fallback(
    allocations: &mut [WeightAllocation],
    contributor_idx: &[usize],
    policies: &HashMap<String, ServerPolicy>,
) -> bool {
    if allocations.iter().any(WeightAllocation::is_active) {
        return false;
    }
    let best = contributor_idx
        .iter()
        .copied()
        .filter(|&i| !is_policy_pinned(&allocations[i], policies))
        .max_by(|&a, &b| {
            allocations[a]
                .health_score
                .total_cmp(&allocations[b].health_score)
        });
    if let Some(best) = best {
        allocations[best].weight = 1;
        allocations[best].reason = "Emergency fallback - no healthy servers".into();
        return true;
    }
    false
}

/// Whether the operator pinned this allocation's weight, one way or the
/// other: removed from rotation, or held at a fixed value.
fn is_policy_pinned(
    allocation: &WeightAllocation,
    policies: &HashMap<String, ServerPolicy>,
) -> bool {
    policies
        .get(&allocation.server_id)
        .is_some_and(|p| p.manually_removed)
        || is_fixed(allocation, policies)
}

/// Replace each calculated weight with the policy-effective one.
fn apply_policy_overrides(
    allocations: &mut [WeightAllocation],
    policies: &HashMap<String, ServerPolicy>,
) {
    for allocation in allocations.iter_mut() {
        let Some(policy) = policies.get(&allocation.server_id) else {
            continue;
        };
        let effective = policy.effective_weight(allocation.weight);
        if effective != allocation.weight {
            allocation.reason = if policy.manually_removed {
                "Removed by operator policy".into()
            } else {
                format!(
                    "Fixed weight override ({} -> {effective})",
                    allocation.weight
                )
            };
            allocation.weight = effective;
        }
    }
}

/// Whether an allocation is pinned by a fixed-weight policy.
fn is_fixed(allocation: &WeightAllocation, policies: &HashMap<String, ServerPolicy>) -> bool {
    policies
        .get(&allocation.server_id)
        .is_some_and(|p| !p.dynamic_weight_enabled && p.fixed_weight.is_some())
}

/// Bring the pool's active weights to exactly 100.
///
/// Fixed allocations keep their pinned values while they fit; the dynamic
/// remainder is scaled into the leftover budget with the last allocation
/// absorbing rounding residue.
fn renormalize(allocations: &mut [WeightAllocation], policies: &HashMap<String, ServerPolicy>) {
    let active: Vec<usize> = allocations
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_active())
        .map(|(i, _)| i)
        .collect();
    if active.is_empty() {
        return;
    }

    let (fixed, dynamic): (Vec<usize>, Vec<usize>) = active
        .into_iter()
        .partition(|&i| is_fixed(&allocations[i], policies));

    let fixed_sum: u32 = fixed.iter().map(|&i| allocations[i].weight).sum();

    if dynamic.is_empty() {
        if fixed_sum != 100 {
            rescale_proportionally(allocations, &fixed, 100);
        }
        return;
    }

    if fixed_sum >= 100 {
        for &i in &dynamic {
            allocations[i].weight = 0;
            allocations[i].reason = "Normalized to 0: fixed weights exceed capacity".into();
        }
        if fixed_sum != 100 {
            rescale_proportionally(allocations, &fixed, 100);
        }
        return;
    }

    let budget = 100 - fixed_sum;
    let dynamic_sum: u32 = dynamic.iter().map(|&i| allocations[i].weight).sum();
    if dynamic_sum == budget {
        return;
    }
    if dynamic_sum == 0 {
        distribute_evenly(allocations, &dynamic, budget);
        return;
    }

    let mut assigned = 0u32;
    for (pos, &i) in dynamic.iter().enumerate() {
        if pos == dynamic.len() - 1 {
            allocations[i].weight = budget - assigned;
        } else {
            let scaled = (f64::from(allocations[i].weight) * f64::from(budget)
                / f64::from(dynamic_sum))
            .round() as u32;
            let scaled = scaled.min(budget - assigned);
            allocations[i].weight = scaled;
            assigned += scaled;
        }
    }
}

/// Proportional rescale of the allocations at `idx` to sum `target`, each
/// kept at least 1; the last element absorbs the rounding residue.
fn rescale_proportionally(allocations: &mut [WeightAllocation], idx: &[usize], target: u32) {
    let current: u32 = idx.iter().map(|&i| allocations[i].weight).sum();
    if current == 0 {
        distribute_evenly(allocations, idx, target);
        return;
    }
    let mut assigned = 0u32;
    for (pos, &i) in idx.iter().enumerate() {
        if pos == idx.len() - 1 {
            allocations[i].weight = target.saturating_sub(assigned).max(1);
        } else {
            let scaled = ((f64::from(allocations[i].weight) * f64::from(target)
                / f64::from(current))
            .round() as u32)
                .max(1);
            let scaled = scaled.min(target.saturating_sub(assigned + 1).max(1));
            allocations[i].weight = scaled;
            assigned += scaled;
        }
    }
}

/// Even split of `target` over the allocations at `idx`; the remainder goes
/// one apiece to the first `target mod n`.
fn distribute_evenly(allocations: &mut [WeightAllocation], idx: &[usize], target: u32) {
    let n = idx.len() as u32;
    if n == 0 {
        return;
    }
    let base = (target / n).max(1);
    let remainder = if target / n == 0 { 0 } else { target % n };
    for (pos, &i) in idx.iter().enumerate() {
        allocations[i].weight = base + u32::from((pos as u32) < remainder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vane_common::Pool;

    fn server(id: &str) -> ServerDescriptor {
        ServerDescriptor {
            id: id.into(),
            host: format!("{id}.backend.local"),
            port: None,
            name: String::new(),
            enabled: true,
            pool: Pool::Outgoing,
        }
    }

    fn sample(id: &str, rt: f64, err: f64, succ: f64, timeout: f64, uptime: f64) -> MetricSample {
        MetricSample {
            server_id: id.into(),
            avg_response_time_ms: rt,
            error_rate_pct: err,
            success_rate_pct: succ,
            timeout_rate_pct: timeout,
            uptime_pct: uptime,
            latency_p50: None,
            latency_p95: None,
            latency_p99: None,
            requests_per_minute: None,
            window_timestamp: 0,
            created_at: Utc::now(),
            ewma_latency_ms: None,
            degradation_score: None,
        }
    }

    fn healthy_sample(id: &str) -> MetricSample {
        sample(id, 150.0, 0.5, 99.5, 0.1, 99.9)
    }

    fn samples(list: Vec<MetricSample>) -> HashMap<String, MetricSample> {
        list.into_iter().map(|s| (s.server_id.clone(), s)).collect()
    }

    fn fixed_policy(id: &str, weight: i32) -> ServerPolicy {
        let mut policy = ServerPolicy::new(id);
        policy.dynamic_weight_enabled = false;
        policy.fixed_weight = Some(weight);
        policy
    }

    /// Factors that reduce the composite to the response-time map alone,
    /// making raw scores exact in tests.
    const RT_ONLY: WeightFactors = WeightFactors {
        response_time: 1.0,
        error_rate: 0.0,
        timeout_rate: 0.0,
        uptime: 0.0,
        degradation: 0.0,
    };

    fn active_sum(allocations: &[WeightAllocation]) -> u32 {
        allocations.iter().map(|a| a.weight).sum()
    }

    #[test]
    fn sub_score_maps_match_contract() {
        assert!((score_response_time(150.0) - 1.0).abs() < 1e-9);
        assert!((score_response_time(350.0) - 0.75).abs() < 1e-9);
        assert!((score_response_time(750.0) - 0.3).abs() < 1e-9);
        assert!((score_response_time(1500.0) - 0.05).abs() < 1e-9);
        assert!(score_response_time(3000.0).abs() < 1e-9);

        assert!((score_error_rate(0.5) - 0.95).abs() < 1e-9);
        assert!(score_error_rate(15.0).abs() < 1e-9);
        assert!((score_success_rate(99.5) - 0.95).abs() < 1e-9);
        assert!((score_timeout_rate(0.1) - 0.98).abs() < 1e-9);
        assert!((score_uptime(99.9) - 1.0).abs() < 1e-9);
        assert!((score_degradation(162.2) - 0.6756).abs() < 1e-4);
    }

    #[test]
    fn single_healthy_server_takes_full_weight() {
        // A sole contributor ends at weight 100 regardless of its raw score.
        let servers = vec![server("s1")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![healthy_sample("s1")]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].weight, 100);
        assert!((allocations[0].health_score - 0.936).abs() < 0.01);
    }

    #[test]
    fn identical_servers_split_evenly() {
        // Two identical samples split the pool 50/50.
        let servers = vec![server("a"), server("b")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![healthy_sample("a"), healthy_sample("b")]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(allocations.iter().map(|a| a.weight).collect::<Vec<_>>(), [50, 50]);
    }

    #[test]
    fn below_viable_score_is_forced_inactive() {
        // A hopeless third server drops to 0 and the rest share 100.
        let servers = vec![server("a"), server("b"), server("c")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![
                healthy_sample("a"),
                healthy_sample("b"),
                sample("c", 5_000.0, 10.0, 90.0, 5.0, 90.0),
            ]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        let c = allocations.iter().find(|a| a.server_id == "c").unwrap();
        assert_eq!(c.weight, 0);
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn fixed_weight_caps_dynamic_budget() {
        // x pinned at 70; y/z raws 0.6/0.4 take 18/12 of the remaining budget.
        let servers = vec![server("x"), server("y"), server("z")];
        let pool_samples = samples(vec![
            sample("x", 100.0, 0.0, 100.0, 0.0, 100.0), // raw 1.0
            sample("y", 440.0, 0.0, 100.0, 0.0, 100.0), // raw 0.6
            sample("z", 625.0, 0.0, 100.0, 0.0, 100.0), // raw 0.4
        ]);
        let policies = HashMap::from([("x".to_string(), fixed_policy("x", 70))]);
        let allocations = compute_pool(&servers, &pool_samples, &RT_ONLY, &policies, Utc::now());

        let weight = |id: &str| allocations.iter().find(|a| a.server_id == id).unwrap().weight;
        assert_eq!(weight("x"), 70);
        assert_eq!(weight("y"), 18);
        assert_eq!(weight("z"), 12);
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn empty_pool_yields_no_allocations() {
        let allocations = compute_pool(
            &[],
            &HashMap::new(),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        assert!(allocations.is_empty());
    }

    #[test]
    fn emergency_fallback_keeps_one_server_serving() {
        // A single barely-positive score under the viable threshold.
        let servers = vec![server("s1")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![sample("s1", 2_000.0, 10.0, 90.0, 3.0, 90.0)]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].weight, 1);
        assert!(allocations[0].reason.contains("Emergency"));
    }

    #[test]
    fn at_most_one_emergency_fallback_per_pool() {
        let servers = vec![server("a"), server("b")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![
                sample("a", 2_000.0, 10.0, 90.0, 3.0, 90.0),
                sample("b", 2_000.0, 10.0, 90.0, 4.0, 90.0),
            ]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        let fallbacks = allocations
            .iter()
            .filter(|a| a.reason.contains("Emergency"))
            .count();
        assert_eq!(fallbacks, 1);
        assert_eq!(active_sum(&allocations), 1);
    }

    #[test]
    fn oversubscribed_fixed_weights_rescale_to_hundred() {
        // Fixed 70 + 50 with no dynamic servers rescales to 58 + 42.
        let servers = vec![server("a"), server("b")];
        let policies = HashMap::from([
            ("a".to_string(), fixed_policy("a", 70)),
            ("b".to_string(), fixed_policy("b", 50)),
        ]);
        let allocations = compute_pool(
            &servers,
            &samples(vec![healthy_sample("a"), healthy_sample("b")]),
            &WeightFactors::BALANCED,
            &policies,
            Utc::now(),
        );
        assert_eq!(allocations.iter().map(|a| a.weight).collect::<Vec<_>>(), [58, 42]);
    }

    #[test]
    fn fixed_sixty_with_dynamic_split() {
        // Fixed 60; dynamic raws 0.7/0.3 take 28/12 of the remainder.
        let servers = vec![server("x"), server("y"), server("z")];
        let pool_samples = samples(vec![
            sample("x", 100.0, 0.0, 100.0, 0.0, 100.0), // raw 1.0
            sample("y", 380.0, 0.0, 100.0, 0.0, 100.0), // raw 0.7
            sample("z", 750.0, 0.0, 100.0, 0.0, 100.0), // raw 0.3
        ]);
        let policies = HashMap::from([("x".to_string(), fixed_policy("x", 60))]);
        let allocations = compute_pool(&servers, &pool_samples, &RT_ONLY, &policies, Utc::now());

        let weight = |id: &str| allocations.iter().find(|a| a.server_id == id).unwrap().weight;
        assert_eq!(weight("x"), 60);
        assert_eq!(weight("y"), 28);
        assert_eq!(weight("z"), 12);
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn failing_server_gets_zero_next_to_healthy_peer() {
        // Error 100 % and uptime 0 score a server out while a peer is healthy.
        let servers = vec![server("bad"), server("good")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![
                sample("bad", 1_500.0, 100.0, 0.0, 5.0, 0.0),
                healthy_sample("good"),
            ]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        let weight = |id: &str| allocations.iter().find(|a| a.server_id == id).unwrap().weight;
        assert_eq!(weight("bad"), 0);
        assert_eq!(weight("good"), 100);
    }

    #[test]
    fn fixed_weight_carries_an_unhealthy_pool() {
        // Every contributor scores below the viable threshold, but one
        // server is pinned: the pin keeps it active and the pool
        // renormalizes around it instead of falling back.
        let servers = vec![server("a"), server("b")];
        let pool_samples = samples(vec![
            sample("a", 2_000.0, 10.0, 90.0, 3.0, 90.0),
            sample("b", 2_000.0, 10.0, 90.0, 3.0, 90.0),
        ]);
        let policies = HashMap::from([("a".to_string(), fixed_policy("a", 50))]);
        let allocations = compute_pool(
            &servers,
            &pool_samples,
            &WeightFactors::BALANCED,
            &policies,
            Utc::now(),
        );
        let weight = |id: &str| allocations.iter().find(|a| a.server_id == id).unwrap().weight;
        assert_eq!(weight("a"), 100);
        assert_eq!(weight("b"), 0);
        assert_eq!(active_sum(&allocations), 100);
        assert!(!allocations.iter().any(|a| a.reason.contains("Emergency")));
    }

    #[test]
    fn emergency_fallback_never_picks_a_pinned_server() {
        // Both contributors end up inactive; the healthier one is removed
        // by the operator, so the fallback settles on the other.
        let servers = vec![server("a"), server("b")];
        let pool_samples = samples(vec![
            sample("a", 2_000.0, 10.0, 90.0, 2.0, 90.0),
            sample("b", 2_000.0, 10.0, 90.0, 3.0, 90.0),
        ]);
        let mut removed = ServerPolicy::new("a");
        removed.manually_removed = true;
        let policies = HashMap::from([("a".to_string(), removed)]);
        let allocations = compute_pool(
            &servers,
            &pool_samples,
            &WeightFactors::BALANCED,
            &policies,
            Utc::now(),
        );
        let a = allocations.iter().find(|x| x.server_id == "a").unwrap();
        let b = allocations.iter().find(|x| x.server_id == "b").unwrap();
        assert_eq!(a.weight, 0);
        assert_eq!(b.weight, 1);
        assert!(b.reason.contains("Emergency"));
    }

    #[test]
    fn manually_removed_server_is_zero_regardless_of_score() {
        let servers = vec![server("a"), server("b")];
        let mut removed = ServerPolicy::new("a");
        removed.manually_removed = true;
        let policies = HashMap::from([("a".to_string(), removed)]);
        let allocations = compute_pool(
            &servers,
            &samples(vec![healthy_sample("a"), healthy_sample("b")]),
            &WeightFactors::BALANCED,
            &policies,
            Utc::now(),
        );
        let a = allocations.iter().find(|x| x.server_id == "a").unwrap();
        assert_eq!(a.weight, 0);
        assert!(a.reason.contains("Removed"));
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn disabled_server_sample_stays_dark() {
        let mut disabled = server("a");
        disabled.enabled = false;
        let servers = vec![disabled, server("b")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![healthy_sample("a"), healthy_sample("b")]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        let a = allocations.iter().find(|x| x.server_id == "a").unwrap();
        assert_eq!(a.weight, 0);
        assert_eq!(a.reason, "Server manually disabled");
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn no_metrics_spreads_default_weight() {
        let servers = vec![server("a"), server("b"), server("c")];
        let allocations = compute_pool(
            &servers,
            &HashMap::new(),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(allocations.len(), 3);
        assert!(allocations
            .iter()
            .all(|a| a.reason.contains("no metrics available")));
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn all_unhealthy_falls_back_to_default_weights() {
        // Raw total of zero: every contributor gets the default weight.
        let servers = vec![server("a"), server("b")];
        let allocations = compute_pool(
            &servers,
            &samples(vec![
                sample("a", 3_000.0, 10.0, 90.0, 5.0, 90.0),
                sample("b", 3_000.0, 10.0, 90.0, 5.0, 90.0),
            ]),
            &WeightFactors::BALANCED,
            &HashMap::new(),
            Utc::now(),
        );
        assert!(allocations
            .iter()
            .all(|a| a.reason.contains("all servers unhealthy")));
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn fixed_weights_over_capacity_zero_out_dynamic() {
        let servers = vec![server("a"), server("b"), server("c")];
        let policies = HashMap::from([
            ("a".to_string(), fixed_policy("a", 80)),
            ("b".to_string(), fixed_policy("b", 40)),
        ]);
        let allocations = compute_pool(
            &servers,
            &samples(vec![
                healthy_sample("a"),
                healthy_sample("b"),
                healthy_sample("c"),
            ]),
            &WeightFactors::BALANCED,
            &policies,
            Utc::now(),
        );
        let c = allocations.iter().find(|x| x.server_id == "c").unwrap();
        assert_eq!(c.weight, 0);
        assert!(c.reason.contains("fixed weights exceed capacity"));
        assert_eq!(active_sum(&allocations), 100);
    }

    #[test]
    fn recomputation_with_same_inputs_is_deterministic() {
        // Same inputs and pinned timestamp, identical output.
        let servers = vec![server("a"), server("b"), server("c")];
        let pool_samples = samples(vec![
            healthy_sample("a"),
            sample("b", 420.0, 2.0, 98.0, 0.5, 99.0),
            sample("c", 900.0, 6.0, 94.0, 2.0, 95.0),
        ]);
        let now = Utc::now();
        let first = compute_pool(
            &servers,
            &pool_samples,
            &WeightFactors::BALANCED,
            &HashMap::new(),
            now,
        );
        let second = compute_pool(
            &servers,
            &pool_samples,
            &WeightFactors::BALANCED,
            &HashMap::new(),
            now,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn invariants_hold_across_varied_pools() {
        // Sum and bound invariants over a deterministic spread of samples.
        let mut seed = 0x2545_F491_4F6C_DD1Du64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for round in 0..50 {
            let count = 1 + (next() % 6) as usize;
            let servers: Vec<_> = (0..count).map(|i| server(&format!("s{round}-{i}"))).collect();
            let pool_samples = samples(
                servers
                    .iter()
                    .map(|s| {
                        let rt = (next() % 2_500) as f64;
                        let err = (next() % 101) as f64 / 4.0;
                        let timeout = (next() % 101) as f64 / 20.0;
                        let uptime = 85.0 + (next() % 151) as f64 / 10.0;
                        sample(&s.id, rt, err, 100.0 - err, timeout, uptime.min(100.0))
                    })
                    .collect(),
            );
            let allocations = compute_pool(
                &servers,
                &pool_samples,
                &WeightFactors::BALANCED,
                &HashMap::new(),
                Utc::now(),
            );

            assert!(allocations.iter().all(|a| a.weight <= 100), "round {round}");
            let emergencies = allocations
                .iter()
                .filter(|a| a.reason.contains("Emergency"))
                .count();
            assert!(emergencies <= 1, "round {round}");
            if emergencies == 1 {
                assert_eq!(active_sum(&allocations), 1, "round {round}");
            } else if allocations.iter().any(WeightAllocation::is_active) {
                assert_eq!(active_sum(&allocations), 100, "round {round}");
            }
        }
    }
}
