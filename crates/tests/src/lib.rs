//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 配置 -> 引擎 -> destination 端到端测试
//! - 并发与生命周期语义

#[cfg(test)]
mod contract_tests {
    use contracts::{ChangeOperation, ChangeRecord, ConfigVersion, MetadataValue};

    #[test]
    fn test_contracts_compile() {
        let _ = ConfigVersion::V1;
    }

    #[test]
    fn test_change_record_json_snapshot() {
        let json = r#"{
            "id": "c-42",
            "operation": "update",
            "timestamp": "2024-03-04T10:00:00Z",
            "position": "0/16B3748",
            "metadata": {"customer": "acme", "amount": 12, "vip": true}
        }"#;

        let change: ChangeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(change.operation, ChangeOperation::Update);
        assert_eq!(change.position, "0/16B3748");
        assert_eq!(
            change.metadata.get("customer"),
            Some(&MetadataValue::from("acme"))
        );

        let back = serde_json::to_value(&change).unwrap();
        assert_eq!(back["operation"], "update");
        assert_eq!(back["id"], "c-42");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ChangeOperation, ChangeRecord};
    use routing::{create_engine, create_engine_with_clock, ManualClock, RoutingError, RoutingEvent};

    fn router_toml(base_path: &std::path::Path) -> String {
        format!(
            r#"
version = "V1"

[engine]
max_concurrent_changes = 8

[[destinations]]
name = "archive"
destination_type = "file"
params = {{ base_path = "{}" }}

[[destinations]]
name = "audit"
destination_type = "log"

[[rules]]
name = "orders-to-archive"
kind = "table"
tables = ["orders"]
destinations = ["archive"]

[[rules]]
name = "deletes-to-audit"
kind = "operation"
operations = ["delete"]
destinations = ["audit"]
"#,
            base_path.display().to_string().replace('\\', "/")
        )
    }

    fn change(id: &str, operation: ChangeOperation) -> ChangeRecord {
        ChangeRecord::new(id, operation, "0/1").with_metadata("amount", 10)
    }

    /// Config file -> ConfigLoader -> engine -> FileDestination output
    #[tokio::test]
    async fn test_e2e_config_to_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load_from_str(&router_toml(dir.path()), ConfigFormat::Toml)
            .unwrap();

        let engine = create_engine(&config).await.unwrap();
        let mut events = engine.subscribe();

        let inserted = engine
            .route_change(&change("c1", ChangeOperation::Insert), "orders")
            .await
            .unwrap();
        assert!(inserted.success);
        assert_eq!(inserted.routed_destinations, vec!["archive"]);

        let deleted = engine
            .route_change(&change("c2", ChangeOperation::Delete), "orders")
            .await
            .unwrap();
        assert_eq!(deleted.routed_destinations, vec!["archive", "audit"]);

        let unrelated = engine
            .route_change(&change("c3", ChangeOperation::Insert), "users")
            .await
            .unwrap();
        assert!(unrelated.success);
        assert!(unrelated.routed_destinations.is_empty());

        match events.recv().await.unwrap() {
            RoutingEvent::ChangeRouted(result) => assert_eq!(result.change_id, "c1"),
            other => panic!("unexpected event: {other:?}"),
        }

        let overall = engine.get_overall_stats();
        assert_eq!(overall.changes_processed, 3);
        assert_eq!(overall.successful_deliveries, 3);
        assert_eq!(overall.destination_count, 2);

        engine.dispose().await;

        let content = std::fs::read_to_string(dir.path().join("orders.jsonl")).unwrap();
        let ids: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                assert_eq!(v["table"], "orders");
                v["id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    /// Undeclared and disabled destinations surface as per-destination errors
    #[tokio::test]
    async fn test_e2e_partial_failure() {
        let mut config = ConfigLoader::load_from_str(
            r#"
[[destinations]]
name = "audit"
destination_type = "log"

[[destinations]]
name = "paused"
destination_type = "log"
enabled = false

[[rules]]
name = "all-orders"
kind = "table"
tables = ["order"]
match_mode = "contains"
destinations = ["audit", "paused"]
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        // Bypasses validation on purpose
        if let contracts::RuleKind::Table { destinations, .. } = &mut config.rules[0].kind {
            destinations.push("ghost".to_string());
        }

        let engine = create_engine(&config).await.unwrap();
        let result = engine
            .route_change(&change("c1", ChangeOperation::Update), "public.ORDERS")
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.is_partial_failure());
        assert_eq!(result.routed_destinations, vec!["audit"]);
        assert_eq!(
            result.errors,
            vec![
                "Delivery to paused failed: Destination is disabled".to_string(),
                "Destination not found: ghost".to_string(),
            ]
        );

        let paused = engine.get_destination_stats("paused").unwrap();
        assert_eq!(paused.failed_deliveries, 1);
        assert!(engine.get_destination_stats("ghost").is_none());

        engine.dispose().await;
    }

    /// The frequency limit holds under concurrent batch routing
    #[tokio::test]
    async fn test_e2e_frequency_limit_under_concurrency() {
        let config = ConfigLoader::load_from_str(
            r#"
[engine]
max_concurrent_changes = 16

[[destinations]]
name = "audit"
destination_type = "log"

[[rules]]
name = "throttle"
kind = "frequency"
max_per_window = 3
window_secs = 3600
destinations = ["audit"]
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        let engine = create_engine(&config).await.unwrap();

        let changes: Vec<ChangeRecord> = (0..20)
            .map(|i| change(&format!("c{i}"), ChangeOperation::Insert))
            .collect();
        let results = engine.route_changes(&changes, "orders").await.unwrap();

        assert_eq!(results.len(), 20);
        let routed = results
            .iter()
            .filter(|r| !r.routed_destinations.is_empty())
            .count();
        assert_eq!(routed, 3);
        for (result, change) in results.iter().zip(&changes) {
            assert_eq!(result.change_id, change.id);
        }

        // Another table has its own window
        let other = engine
            .route_change(&changes[0], "users")
            .await
            .unwrap();
        assert_eq!(other.routed_destinations, vec!["audit"]);

        engine.dispose().await;
    }

    /// Business hours switch destinations as the clock moves
    #[tokio::test]
    async fn test_e2e_business_hours_with_clock() {
        let config = ConfigLoader::load_from_str(
            r#"
[[destinations]]
name = "ops"
destination_type = "log"

[[destinations]]
name = "pager"
destination_type = "log"

[[rules]]
name = "office"
kind = "business_hours"
start = "09:00:00"
end = "17:00:00"
destinations = ["ops"]
after_hours_destinations = ["pager"]
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        // 2024-03-04 is a Monday
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let engine = create_engine_with_clock(&config, clock.clone())
            .await
            .unwrap();
        let c = change("c1", ChangeOperation::Insert);

        let open = engine.route_change(&c, "orders").await.unwrap();
        assert_eq!(open.routed_destinations, vec!["ops"]);

        clock.set(Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap());
        let weekend = engine.route_change(&c, "orders").await.unwrap();
        assert_eq!(weekend.routed_destinations, vec!["pager"]);

        engine.dispose().await;
    }

    /// Dispose is idempotent and rejects later routing
    #[tokio::test]
    async fn test_e2e_dispose_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load_from_str(&router_toml(dir.path()), ConfigFormat::Toml)
            .unwrap();
        let engine = create_engine(&config).await.unwrap();
        let clone = engine.clone();

        engine.dispose().await;
        clone.dispose().await;

        assert!(clone.is_disposed());
        assert!(engine.destination_names().is_empty());
        assert!(engine.rule_names().is_empty());

        let err = clone
            .route_change(&change("c1", ChangeOperation::Insert), "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Disposed));
    }

    /// Loaded configuration round-trips through TOML
    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load_from_str(&router_toml(dir.path()), ConfigFormat::Toml)
            .unwrap();

        let toml = ConfigLoader::to_toml(&config).unwrap();
        let reloaded = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();

        assert_eq!(reloaded.destinations.len(), 2);
        assert_eq!(reloaded.rules.len(), 2);
        assert_eq!(reloaded.engine.max_concurrent_changes, 8);
    }
}
