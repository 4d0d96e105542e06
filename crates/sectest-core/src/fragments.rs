//! Integration fragment resolution
//!
//! Each configured integration is asked, by name, for its piece of the
//! execution config. Integrations without a provider are left out.

use crate::types::{Category, CategorySettings, SecurityTest};
use futures::future::join_all;
use sectest_bus::{names, CapabilityBus};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Fragments keyed by the output key their provider chose
pub type FragmentMap = Map<String, Value>;

/// Resolved fragments of all three categories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFragments {
    /// Scanner fragments
    pub scanners: FragmentMap,
    /// Processor fragments
    pub processing: FragmentMap,
    /// Reporter fragments
    pub reporters: FragmentMap,
}

#[derive(Serialize)]
struct FragmentRequest<'a> {
    test_params: &'a SecurityTest,
    scanner_params: &'a Value,
}

/// Requests configuration fragments from integration providers
#[derive(Debug, Clone)]
pub struct FragmentResolver {
    bus: CapabilityBus,
    timeout: Duration,
}

impl FragmentResolver {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(bus: CapabilityBus, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Resolve every integration of one category
    ///
    /// Providers are called concurrently, each bounded by its own timeout.
    /// Results are merged in integration name order; when two providers pick
    /// the same output key the later one wins.
    pub async fn resolve_category(
        &self,
        category: Category,
        settings: &CategorySettings,
        test: &SecurityTest,
    ) -> FragmentMap {
        let calls = settings
            .iter()
            .map(|(name, params)| async move {
                (name, self.resolve_one(category, name, params, test).await)
            });

        let mut merged = FragmentMap::new();
        for (name, resolved) in join_all(calls).await {
            let Some((key, fragment)) = resolved else {
                continue;
            };
            if merged.insert(key.clone(), fragment).is_some() {
                tracing::warn!(
                    category = category.as_str(),
                    integration = %name,
                    output_key = %key,
                    "fragment output key collision, keeping the later one"
                );
            }
        }
        merged
    }

    /// Resolve all categories of a test
    pub async fn resolve_all(&self, test: &SecurityTest) -> ResolvedFragments {
        let integrations = &test.integrations;
        let (scanners, processing, reporters) = futures::join!(
            self.resolve_category(Category::Scanners, integrations.category(Category::Scanners), test),
            self.resolve_category(Category::Processing, integrations.category(Category::Processing), test),
            self.resolve_category(Category::Reporters, integrations.category(Category::Reporters), test),
        );

        ResolvedFragments {
            scanners,
            processing,
            reporters,
        }
    }

    async fn resolve_one(
        &self,
        category: Category,
        integration: &str,
        params: &Value,
        test: &SecurityTest,
    ) -> Option<(String, Value)> {
        let capability = names::config_fragment(category.as_str(), integration);
        let request = FragmentRequest {
            test_params: test,
            scanner_params: params,
        };

        match self
            .bus
            .call_typed::<_, (String, Value)>(&capability, self.timeout, &request)
            .await
        {
            Ok(pair) => Some(pair),
            Err(e) if e.is_absent() => {
                tracing::warn!(
                    category = category.as_str(),
                    integration,
                    "cannot find config provider: {}",
                    e
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    category = category.as_str(),
                    integration,
                    "config provider failed: {}",
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Integrations, NewTest, ProjectId, TestId};
    use sectest_bus::ProviderError;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn test_with(integrations: Integrations) -> SecurityTest {
        NewTest::new(ProjectId(1), "demo", "nightly", "default")
            .with_integrations(integrations)
            .into_test(TestId(1))
    }

    fn provide(bus: &CapabilityBus, category: &str, name: &str, key: &'static str) {
        bus.register_fn(names::config_fragment(category, name), move |payload| async move {
            Ok(json!([key, { "params": payload["scanner_params"].clone() }]))
        });
    }

    #[tokio::test]
    async fn resolves_registered_and_skips_missing() {
        let bus = CapabilityBus::new();
        provide(&bus, "scanners", "semgrep", "semgrep");

        let test = test_with(
            Integrations::new()
                .with(Category::Scanners, "semgrep", json!({ "ruleset": "p/ci" }))
                .with(Category::Scanners, "bandit", json!({})),
        );
        let resolver = FragmentResolver::new(bus, TIMEOUT);
        let fragments = resolver
            .resolve_category(Category::Scanners, test.integrations.category(Category::Scanners), &test)
            .await;

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments["semgrep"], json!({ "params": { "ruleset": "p/ci" } }));
    }

    #[tokio::test]
    async fn provider_receives_test_snapshot() {
        let bus = CapabilityBus::new();
        bus.register_fn(names::config_fragment("reporters", "jira"), |payload| async move {
            Ok(json!(["jira", { "uid": payload["test_params"]["test_uid"].clone() }]))
        });

        let test = test_with(Integrations::new().with(Category::Reporters, "jira", json!({})));
        let fragments = FragmentResolver::new(bus, TIMEOUT).resolve_all(&test).await;

        assert_eq!(fragments.reporters["jira"]["uid"], json!(test.test_uid));
        assert!(fragments.scanners.is_empty());
    }

    #[tokio::test]
    async fn collision_keeps_later_integration() {
        let bus = CapabilityBus::new();
        provide(&bus, "processing", "alpha", "shared");
        bus.register_fn(names::config_fragment("processing", "beta"), |_| async {
            Ok(json!(["shared", "from-beta"]))
        });

        let test = test_with(
            Integrations::new()
                .with(Category::Processing, "alpha", json!({}))
                .with(Category::Processing, "beta", json!({})),
        );
        let fragments = FragmentResolver::new(bus, TIMEOUT).resolve_all(&test).await;

        assert_eq!(fragments.processing["shared"], json!("from-beta"));
    }

    #[tokio::test]
    async fn failing_and_malformed_providers_are_omitted() {
        let bus = CapabilityBus::new();
        bus.register_fn(names::config_fragment("scanners", "broken"), |_| async {
            Err(ProviderError::new("bad settings"))
        });
        bus.register_fn(names::config_fragment("scanners", "odd"), |_| async {
            Ok(json!({ "not": "a pair" }))
        });
        provide(&bus, "scanners", "ok", "ok");

        let test = test_with(
            Integrations::new()
                .with(Category::Scanners, "broken", json!({}))
                .with(Category::Scanners, "odd", json!({}))
                .with(Category::Scanners, "ok", json!({})),
        );
        let fragments = FragmentResolver::new(bus, TIMEOUT).resolve_all(&test).await;

        assert_eq!(fragments.scanners.keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_does_not_block_siblings() {
        let bus = CapabilityBus::new();
        bus.register_fn(names::config_fragment("scanners", "slow"), |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!(["slow", {}]))
        });
        provide(&bus, "scanners", "fast", "fast");

        let test = test_with(
            Integrations::new()
                .with(Category::Scanners, "slow", json!({}))
                .with(Category::Scanners, "fast", json!({})),
        );
        let fragments = FragmentResolver::new(bus, TIMEOUT).resolve_all(&test).await;

        assert!(fragments.scanners.contains_key("fast"));
        assert!(!fragments.scanners.contains_key("slow"));
    }
}
