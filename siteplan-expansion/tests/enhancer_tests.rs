//! Cost-tiered enhancement against a shared budget
//!
//! Drives `CostTieredEnhancer` directly with scripted providers so budget
//! timing (slow calls, warm caches) is deterministic.

mod helpers;

use helpers::*;
use siteplan_expansion::config::{CacheConfig, EnhancementConfig, RateLimitConfig};
use siteplan_expansion::models::{
    AttributeQuality, Candidate, DataQuality, DemotionReason, GeoPoint, ScoredCandidate,
    SourceType, Survivor,
};
use siteplan_expansion::services::{
    AiDispatchLimiter, CostLedger, CostTieredEnhancer, EnhanceParams, EnhancementOutcome,
    MemoryCacheStore, ResultCache,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn survivors(count: usize) -> Vec<Survivor> {
    (0..count)
        .map(|i| Survivor {
            scored: ScoredCandidate {
                candidate: Candidate {
                    id: format!("s{:02}", i + 1),
                    location: GeoPoint::new(46.0 + i as f64 * 0.05, 6.5),
                    source_type: SourceType::Grid,
                    sub_region_key: "north".to_string(),
                    estimated_population: 10_000,
                    urban_density_index: 0.5,
                    anchor_counts: BTreeMap::new(),
                    data_quality: AttributeQuality {
                        location: DataQuality::Measured,
                        population: DataQuality::Measured,
                        urban_density: DataQuality::Measured,
                        anchors: DataQuality::Measured,
                    },
                },
                total_score: 1.0 - i as f64 * 0.01,
                breakdown: vec![],
                completeness_score: 1.0,
                region_key: "north".to_string(),
            },
            rank: i + 1,
            fairness_exempt: false,
        })
        .collect()
}

fn enhancer(provider: Arc<ScriptedRationaleProvider>, cache: ResultCache) -> CostTieredEnhancer {
    CostTieredEnhancer::new(
        provider,
        cache,
        Arc::new(AiDispatchLimiter::new(&RateLimitConfig::default())),
        EnhancementConfig::default(),
        &CacheConfig::default(),
    )
}

fn params(ai_fraction: f64, ai_hard_cap: usize) -> EnhanceParams {
    EnhanceParams {
        job_id: Uuid::new_v4(),
        ai_enabled: true,
        ai_fraction,
        ai_hard_cap,
    }
}

async fn run(
    enhancer: &CostTieredEnhancer,
    survivors: Vec<Survivor>,
    params: &EnhanceParams,
    ledger: Arc<CostLedger>,
) -> EnhancementOutcome {
    enhancer
        .enhance(survivors, params, ledger, &CancellationToken::new(), None)
        .await
}

#[tokio::test]
async fn test_slow_calls_under_roomy_cap_all_get_ai() {
    // Ten 0.01 calls fit a 0.20 cap even though worst-case
    // reservations for all of them would not fit at once
    let provider = Arc::new(ScriptedRationaleProvider::new(0.01).with_delay(Duration::from_millis(50)));
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), 90);
    let enhancer = enhancer(provider.clone(), cache);
    let ledger = Arc::new(CostLedger::new(0.20));

    let outcome = run(&enhancer, survivors(10), &params(1.0, 10), ledger.clone()).await;

    assert_eq!(outcome.intended_ai_tier, 10);
    assert_eq!(outcome.ai_count(), 10);
    assert_eq!(outcome.cost_capped, 0);
    assert_eq!(outcome.demoted_count(), 0);
    assert_eq!(provider.calls(), 10);
    assert!((ledger.accumulated() - 0.10).abs() < 1e-9);
    assert!(!ledger.is_exhausted());
    assert_eq!(ledger.in_flight(), 0);
}

#[tokio::test]
async fn test_slow_calls_stop_exactly_at_cap() {
    let provider = Arc::new(ScriptedRationaleProvider::new(0.04).with_delay(Duration::from_millis(30)));
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), 90);
    let enhancer = enhancer(provider.clone(), cache);
    let ledger = Arc::new(CostLedger::new(0.12));

    let outcome = run(&enhancer, survivors(10), &params(1.0, 10), ledger.clone()).await;

    // 0.08 settled leaves less than one 0.05 reservation
    assert_eq!(outcome.ai_count(), 2);
    assert_eq!(outcome.cost_capped, 8);
    assert!((ledger.accumulated() - 0.08).abs() < 1e-9);
    for (i, suggestion) in outcome.suggestions.iter().enumerate() {
        assert_eq!(suggestion.is_ai(), i < 2, "rank {}", i + 1);
        if i >= 2 {
            assert_eq!(suggestion.demoted, Some(DemotionReason::CostCapExceeded));
        }
    }
}

#[tokio::test]
async fn test_warm_cache_does_not_bypass_exhausted_budget() {
    let provider = Arc::new(ScriptedRationaleProvider::new(0.01));
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), 90);
    let enhancer = enhancer(provider.clone(), cache);
    let all = survivors(5);

    // Warm the cache for rank 4 only
    let warmed = run(
        &enhancer,
        vec![all[3].clone()],
        &params(1.0, 1),
        Arc::new(CostLedger::new(1.0)),
    )
    .await;
    assert_eq!(warmed.ai_count(), 1);
    assert_eq!(provider.calls(), 1);

    let ledger = Arc::new(CostLedger::new(0.0));
    let outcome = run(&enhancer, all, &params(1.0, 5), ledger.clone()).await;

    assert_eq!(outcome.intended_ai_tier, 5);
    assert_eq!(outcome.ai_count(), 0);
    assert_eq!(outcome.cache_hits, 0);
    assert_eq!(outcome.demoted_count(), 5);
    assert!(outcome
        .suggestions
        .iter()
        .all(|s| s.demoted == Some(DemotionReason::CostCapExceeded)));
    assert_eq!(provider.calls(), 1);
    assert_eq!(ledger.accumulated(), 0.0);
}

#[tokio::test]
async fn test_cache_hit_after_refusal_is_demoted() {
    let provider = Arc::new(ScriptedRationaleProvider::new(0.04));
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), 90);
    let enhancer = enhancer(provider.clone(), cache);
    let all = survivors(6);

    run(
        &enhancer,
        vec![all[5].clone()],
        &params(1.0, 1),
        Arc::new(CostLedger::new(1.0)),
    )
    .await;

    // Two calls fit 0.12, rank 3 is refused, rank 6 is cached but past the cut
    let outcome = run(&enhancer, all, &params(1.0, 6), Arc::new(CostLedger::new(0.12))).await;

    assert_eq!(outcome.ai_count(), 2);
    assert_eq!(outcome.cost_capped, 4);
    assert_eq!(outcome.cache_hits, 0);
    assert_eq!(outcome.suggestions[5].demoted, Some(DemotionReason::CostCapExceeded));
    assert!(!outcome.suggestions[5].is_ai());
}

#[tokio::test]
async fn test_cache_hit_before_exhaustion_is_free_ai() {
    let provider = Arc::new(ScriptedRationaleProvider::new(0.01));
    let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), 90);
    let enhancer = enhancer(provider.clone(), cache);
    let all = survivors(4);

    run(&enhancer, all.clone(), &params(1.0, 4), Arc::new(CostLedger::new(1.0))).await;
    assert_eq!(provider.calls(), 4);

    let ledger = Arc::new(CostLedger::new(0.5));
    let outcome = run(&enhancer, all, &params(1.0, 4), ledger.clone()).await;

    assert_eq!(outcome.ai_count(), 4);
    assert_eq!(outcome.cache_hits, 4);
    assert_eq!(provider.calls(), 4);
    assert_eq!(ledger.accumulated(), 0.0);
}
