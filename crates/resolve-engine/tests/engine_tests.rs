use pretty_assertions::assert_eq;
use resolve_core::{
    ErrorCode, FailureMode, FailurePolicy, PolicyError, ResolverContext, ResolverKey,
    TokenType,
};
use resolve_engine::{EngineConfig, EngineError, EngineEvent, ResolutionEngine};
use resolve_resilience::CircuitState;
use resolve_test_utils::{
    init_test_tracing, DependentResolver, FailingResolver, PanickingResolver, SlowResolver,
    StaticResolver,
};
use std::sync::Arc;
use std::time::Duration;

const TEXT: &str = "Use {DATA:artifact:v1:req}";

fn engine(config: EngineConfig) -> ResolutionEngine {
    init_test_tracing();
    ResolutionEngine::new(config).unwrap()
}

fn no_retry(mode: FailureMode) -> FailurePolicy {
    FailurePolicy::with_mode(mode).max_retries(0)
}

#[tokio::test]
async fn test_resolves_single_placeholder() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(StaticResolver::new(TokenType::Data, "artifact", "42")));

    let result = engine
        .process_text(TEXT, &ResolverContext::new(), None)
        .await
        .unwrap();

    assert_eq!(result.text, "Use 42");
    assert_eq!(result.tokens_processed, 1);
    assert_eq!(result.successful_resolutions, 1);
    assert!(result.errors.is_empty());
    assert_eq!(result.analytics.sessions, 1);
}

#[tokio::test]
async fn test_graceful_degradation_keeps_placeholder() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "artifact")));

    let policy = FailurePolicy::with_mode(FailureMode::GracefulDegradation);
    let result = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&policy))
        .await
        .unwrap();

    assert_eq!(result.text, TEXT);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, ErrorCode::ResolutionError);
    assert_eq!(result.successful_resolutions, 0);
}

#[tokio::test]
async fn test_graceful_degradation_uses_default_value() {
    let engine = engine(EngineConfig::default().with_default_value("DATA:artifact", "n/a"));
    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "artifact")));

    let policy = FailurePolicy::with_mode(FailureMode::GracefulDegradation);
    let result = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&policy))
        .await
        .unwrap();

    assert_eq!(result.text, "Use n/a");
    assert_eq!(result.fallback_resolutions, 1);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_breaker_rejects_after_threshold_without_calling_resolver() {
    let engine = engine(EngineConfig::default().with_circuit_breaker_threshold(3));
    let resolver = FailingResolver::new(TokenType::Data, "artifact");
    let calls = resolver.calls();
    engine.register_resolver(Arc::new(resolver));

    let policy = no_retry(FailureMode::ErrorPropagation);
    let ctx = ResolverContext::new();
    for _ in 0..3 {
        let result = engine.process_text(TEXT, &ctx, Some(&policy)).await.unwrap();
        assert_eq!(result.errors[0].code, ErrorCode::ResolutionError);
    }

    let key = ResolverKey::new(TokenType::Data, "artifact");
    assert_eq!(engine.circuit_status(&key).unwrap().state, CircuitState::Open);

    let fourth = engine.process_text(TEXT, &ctx, Some(&policy)).await.unwrap();
    assert_eq!(fourth.errors[0].code, ErrorCode::CircuitBreakerOpen);
    assert_eq!(fourth.text, TEXT);
    assert_eq!(calls.count(), 3);
}

#[tokio::test]
async fn test_dependency_skip_unblocks_dependents() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "broken")));
    engine.register_resolver(Arc::new(DependentResolver::new(
        TokenType::State,
        "report",
        &["DATA:broken:v1:src"],
    )));

    let text = "{DATA:broken:v1:src} | {STATE:report:v1:a} | {STATE:report:v1:b}";
    let policy = FailurePolicy::with_mode(FailureMode::DependencySkip);
    let result = engine
        .process_text(text, &ResolverContext::new(), Some(&policy))
        .await
        .unwrap();

    let marker = "[SKIPPED:DATA:broken:v1:src]";
    assert_eq!(result.text, format!("{marker} | {marker} | {marker}"));
    assert_eq!(result.successful_resolutions, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.reports[0].dependencies.is_empty());
}

#[tokio::test]
async fn test_failed_dependency_cascades() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "broken")));
    let dependent = DependentResolver::new(TokenType::State, "report", &["DATA:broken:v1:src"]);
    let dependent_calls = dependent.calls();
    engine.register_resolver(Arc::new(dependent));

    let text = "{STATE:report:v1:a} needs {DATA:broken:v1:src}";
    let result = engine
        .process_text(text, &ResolverContext::new(), Some(&no_retry(FailureMode::ErrorPropagation)))
        .await
        .unwrap();

    assert_eq!(result.text, text);
    let codes: Vec<ErrorCode> = result.errors.iter().map(|e| e.code).collect();
    // errors follow first appearance in the text
    assert_eq!(codes, vec![ErrorCode::DependencyFailed, ErrorCode::ResolutionError]);
    assert_eq!(dependent_calls.count(), 0);
}

#[tokio::test]
async fn test_dependents_see_resolved_values() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(
        StaticResolver::new(TokenType::Data, "src", "x").with_value("b", "y"),
    ));
    engine.register_resolver(Arc::new(DependentResolver::new(
        TokenType::State,
        "join",
        &["DATA:src:v1:a", "DATA:src:v1:b"],
    )));

    let text = "{STATE:join:v1:ab} from {DATA:src:v1:a} and {DATA:src:v1:b}";
    let result = engine
        .process_text(text, &ResolverContext::new(), None)
        .await
        .unwrap();

    assert_eq!(result.text, "x+y from x and y");
    assert_eq!(result.successful_resolutions, 3);
}

#[tokio::test]
async fn test_processing_is_idempotent() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(
        StaticResolver::new(TokenType::Data, "artifact", "42").with_value("name", "report"),
    ));
    engine.register_resolver(Arc::new(StaticResolver::new(
        TokenType::Context,
        "user",
        serde_json::json!({"id": 7}),
    )));

    let text = "{DATA:artifact:v1:name} for {CONTEXT:user:v1:profile}, {DATA:artifact:v1:name} again, {STATE:none:v1:x}";
    let ctx = ResolverContext::new();
    let first = engine.process_text(text, &ctx, None).await.unwrap();
    let second = engine.process_text(text, &ctx, None).await.unwrap();

    assert_eq!(first.text, second.text);
    assert_eq!(
        first.text,
        "report for {\"id\":7}, report again, {STATE:none:v1:x}"
    );
    assert_eq!(first.tokens_processed, 3);
}

#[tokio::test]
async fn test_cache_hit_skips_resolver() {
    let engine = engine(EngineConfig::default());
    let resolver = StaticResolver::new(TokenType::Data, "artifact", "42");
    let calls = resolver.calls();
    engine.register_resolver(Arc::new(resolver));

    let ctx = ResolverContext::new();
    let first = engine.process_text(TEXT, &ctx, None).await.unwrap();
    let second = engine.process_text(TEXT, &ctx, None).await.unwrap();

    assert_eq!(first.cache_hits, 0);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.text, "Use 42");
    assert_eq!(calls.count(), 1);

    let stats = engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.writes, 1);
}

#[tokio::test]
async fn test_invalidate_forces_resolver_call() {
    let engine = engine(EngineConfig::default());
    let resolver = StaticResolver::new(TokenType::Data, "artifact", "42");
    let calls = resolver.calls();
    engine.register_resolver(Arc::new(resolver));

    let ctx = ResolverContext::new();
    engine.process_text(TEXT, &ctx, None).await.unwrap();
    engine
        .invalidate(&"DATA:artifact:v1:req".parse().unwrap())
        .await;
    engine.process_text(TEXT, &ctx, None).await.unwrap();

    assert_eq!(calls.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_abandons_slow_resolver() {
    let engine = engine(EngineConfig::default());
    let resolver = SlowResolver::new(TokenType::Data, "artifact", Duration::from_secs(10), "late");
    let completed = resolver.completed();
    engine.register_resolver(Arc::new(resolver));

    let policy = no_retry(FailureMode::ErrorPropagation).timeout(Duration::from_millis(50));
    let result = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&policy))
        .await
        .unwrap();

    assert_eq!(result.errors[0].code, ErrorCode::Timeout);
    assert_eq!(result.text, TEXT);
    assert_eq!(completed.count(), 0);

    // the abandoned call still runs to completion in the background
    tokio::time::sleep(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;
    assert_eq!(completed.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_resolver_does_not_starve_other_keys() {
    let engine = engine(EngineConfig::default().with_max_concurrent(1));
    engine.register_resolver(Arc::new(SlowResolver::new(
        TokenType::Data,
        "slow",
        Duration::from_secs(3600),
        "never",
    )));
    engine.register_resolver(Arc::new(StaticResolver::new(TokenType::Data, "fast", "ok")));

    let policy = no_retry(FailureMode::ErrorPropagation).timeout(Duration::from_millis(50));
    let ctx = ResolverContext::new();
    let hung = engine
        .process_text("{DATA:slow:v1:a}", &ctx, Some(&policy))
        .await
        .unwrap();
    assert_eq!(hung.errors[0].code, ErrorCode::Timeout);

    let healthy = tokio::time::timeout(
        Duration::from_secs(3),
        engine.process_text("{DATA:fast:v1:b}", &ctx, Some(&policy)),
    )
    .await
    .expect("healthy resolver must not wait on the abandoned call")
    .unwrap();
    assert_eq!(healthy.text, "ok");
}

#[tokio::test(start_paused = true)]
async fn test_admission_wait_is_bounded_by_policy_timeout() {
    let engine = engine(EngineConfig::default().with_max_concurrent(1));
    engine.register_resolver(Arc::new(SlowResolver::new(
        TokenType::Data,
        "slow",
        Duration::from_secs(5),
        "done",
    )));
    engine.register_resolver(Arc::new(StaticResolver::new(TokenType::Data, "fast", "ok")));

    let patient = no_retry(FailureMode::ErrorPropagation).timeout(Duration::from_secs(10));
    let hasty = no_retry(FailureMode::ErrorPropagation).timeout(Duration::from_millis(50));
    let ctx = ResolverContext::new();
    let (slow, fast) = tokio::join!(
        engine.process_text("{DATA:slow:v1:a}", &ctx, Some(&patient)),
        async {
            // let the slow call take the only slot first
            tokio::time::sleep(Duration::from_millis(1)).await;
            engine.process_text("{DATA:fast:v1:b}", &ctx, Some(&hasty)).await
        }
    );

    assert_eq!(slow.unwrap().text, "done");
    let fast = fast.unwrap();
    assert_eq!(fast.errors[0].code, ErrorCode::Timeout);
    // waiting for capacity is not held against the resolver
    let key = ResolverKey::new(TokenType::Data, "fast");
    assert!(engine.circuit_status(&key).is_none());
}

#[tokio::test]
async fn test_resolver_panic_is_resolution_error() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(PanickingResolver::new(TokenType::Data, "artifact")));

    let result = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&no_retry(FailureMode::ErrorPropagation)))
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, ErrorCode::ResolutionError);
    assert!(result.errors[0].message.contains("panicked"));
}

#[tokio::test]
async fn test_cycle_fails_only_its_members() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(
        StaticResolver::new(TokenType::Data, "d", "ok")
            .with_dependencies("a", &["DATA:d:v1:b"])
            .with_dependencies("b", &["DATA:d:v1:a"]),
    ));

    let text = "{DATA:d:v1:a} {DATA:d:v1:b} {DATA:d:v1:c}";
    let result = engine
        .process_text(text, &ResolverContext::new(), None)
        .await
        .unwrap();

    assert_eq!(result.text, "{DATA:d:v1:a} {DATA:d:v1:b} ok");
    assert_eq!(result.errors.len(), 2);
    assert!(result
        .errors
        .iter()
        .all(|e| e.code == ErrorCode::CyclicDependency));
}

#[tokio::test]
async fn test_missing_resolver_reported() {
    let engine = engine(EngineConfig::default());
    let result = engine
        .process_text(TEXT, &ResolverContext::new(), None)
        .await
        .unwrap();

    assert_eq!(result.text, TEXT);
    assert_eq!(result.errors[0].code, ErrorCode::NoResolver);
}

#[tokio::test]
async fn test_fallback_resolver_uses_static_table() {
    let engine = engine(EngineConfig::default().with_static_fallback("artifact", "cached copy"));
    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "artifact")));

    let result = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&no_retry(FailureMode::FallbackResolver)))
        .await
        .unwrap();

    assert_eq!(result.text, "Use cached copy");
    assert_eq!(result.fallback_resolutions, 1);
}

#[tokio::test]
async fn test_fallback_exhaustion_reports_all_fallbacks_failed() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "artifact")));

    let result = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&no_retry(FailureMode::FallbackResolver)))
        .await
        .unwrap();

    assert_eq!(result.errors[0].code, ErrorCode::AllFallbacksFailed);
    assert_eq!(result.text, TEXT);
}

#[tokio::test]
async fn test_similarity_fallback_learns_from_live_traffic() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(StaticResolver::new(TokenType::Data, "artifact", "spec v3")));
    engine
        .process_text("{DATA:artifact:v1:user-requirements-spec-doc}", &ResolverContext::new(), None)
        .await
        .unwrap();

    engine.register_resolver(Arc::new(FailingResolver::new(TokenType::Data, "artifact")));
    let policy = no_retry(FailureMode::FallbackResolver).fallback_resolvers(["similarity"]);
    let result = engine
        .process_text(
            "{DATA:artifact:v1:user-requirements-spec-draft}",
            &ResolverContext::new(),
            Some(&policy),
        )
        .await
        .unwrap();

    assert_eq!(result.text, "spec v3");
    assert!(result.reports[0].fallback_used);
}

#[tokio::test]
async fn test_input_too_large_is_rejected() {
    let engine = engine(EngineConfig::default().with_max_text_bytes(8));
    let mut events = engine.subscribe();

    let err = engine
        .process_text(TEXT, &ResolverContext::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InputTooLarge { size: 26, limit: 8 }));
    assert!(matches!(
        events.recv().await.unwrap(),
        EngineEvent::ProcessingFailed { .. }
    ));
}

#[tokio::test]
async fn test_zero_timeout_policy_is_rejected_before_resolving() {
    let engine = engine(EngineConfig::default());
    let resolver = StaticResolver::new(TokenType::Data, "artifact", "42");
    let calls = resolver.calls();
    engine.register_resolver(Arc::new(resolver));
    let policy = no_retry(FailureMode::ErrorPropagation).timeout(Duration::ZERO);

    let err = engine
        .process_text(TEXT, &ResolverContext::new(), Some(&policy))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Policy(PolicyError::ZeroTimeout)));
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_policy_for_mode_inherits_engine_retry_settings() {
    let engine = engine(EngineConfig::default().with_timeout(Duration::from_millis(300)));
    let policy = engine.policy(FailureMode::GracefulDegradation);

    assert_eq!(policy.mode, FailureMode::GracefulDegradation);
    assert_eq!(policy.timeout_ms, 300);
    assert_eq!(policy.max_retries, engine.default_policy().max_retries);
}

#[tokio::test]
async fn test_events_trace_processing() {
    let engine = engine(EngineConfig::default());
    let mut events = engine.subscribe();
    engine.register_resolver(Arc::new(StaticResolver::new(TokenType::Data, "artifact", "42")));
    engine.process_text(TEXT, &ResolverContext::new(), None).await.unwrap();

    let names: Vec<&str> = (0..3)
        .map(|_| events.try_recv().unwrap().name())
        .collect();
    assert_eq!(
        names,
        vec!["resolver_registered", "processing_started", "processing_completed"]
    );
}

#[tokio::test]
async fn test_maintenance_publishes_breaker_snapshot() {
    let engine = engine(EngineConfig::default());
    let key = ResolverKey::new(TokenType::Data, "artifact");
    engine.force_open(&key);
    let mut events = engine.subscribe();

    let report = engine.run_maintenance();
    assert_eq!(report.breakers_tracked, 1);
    assert_eq!(report.breakers_reset, 0);

    match events.recv().await.unwrap() {
        EngineEvent::CircuitBreakerSnapshot { breakers, .. } => {
            assert_eq!(breakers[0].state, CircuitState::Open);
        }
        other => panic!("unexpected event {other:?}"),
    }

    assert!(engine.reset_circuit(&key));
    assert_eq!(engine.circuit_snapshot()[0].state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_maintenance_sweeps_idle_breakers() {
    let config = EngineConfig::from_toml_str(
        "[resilience]\nmaintenance_window_ms = 1000\ncircuit_breaker_cooldown_ms = 600000\n",
    )
    .unwrap();
    let engine = Arc::new(engine(config));
    let key = ResolverKey::new(TokenType::Data, "artifact");
    engine.force_open(&key);

    let handle = engine.spawn_maintenance(Duration::from_millis(500));
    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert_eq!(engine.circuit_status(&key).unwrap().state, CircuitState::Closed);
    handle.abort();
}

#[tokio::test]
async fn test_unregister_resolver() {
    let engine = engine(EngineConfig::default());
    engine.register_resolver(Arc::new(StaticResolver::new(TokenType::Data, "artifact", "42")));
    let key = ResolverKey::new(TokenType::Data, "artifact");

    assert!(engine.unregister_resolver(&key));
    assert!(!engine.unregister_resolver(&key));
    assert!(engine.resolver_keys().is_empty());
}
