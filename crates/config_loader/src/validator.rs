//! 配置校验模块
//!
//! 校验规则：
//! - 字段取值范围 (derive 校验)
//! - destination 名称唯一且非空
//! - rule 名称非空
//! - rule 引用的 destination 必须已声明
//! - frequency 规则 max_per_window > 0
//! - table / operation / priority / weekday 集合非空
//! - composite 子规则递归校验

use std::collections::HashSet;

use ::validator::Validate;
use contracts::{ContractError, RoutingConfig, RuleConfig, RuleKind};

/// 校验 RoutingConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &RoutingConfig) -> Result<(), ContractError> {
    validate_fields(config)?;
    let declared = validate_destinations(config)?;
    for (idx, rule) in config.rules.iter().enumerate() {
        validate_rule(rule, &format!("rules[{idx}]"), &declared)?;
    }
    Ok(())
}

/// derive 声明的范围校验
fn validate_fields(config: &RoutingConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|e| ContractError::config_validation("config", e.to_string()))
}

/// 校验 destination 名称唯一性，返回已声明名称集合
fn validate_destinations(config: &RoutingConfig) -> Result<HashSet<&str>, ContractError> {
    let mut seen = HashSet::new();
    for (idx, destination) in config.destinations.iter().enumerate() {
        if destination.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("destinations[{idx}].name"),
                "destination name cannot be empty",
            ));
        }
        if !seen.insert(destination.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("destinations[name={}]", destination.name),
                "duplicate destination name",
            ));
        }
    }
    Ok(seen)
}

/// 校验单条规则 (composite 递归)
fn validate_rule(
    rule: &RuleConfig,
    path: &str,
    declared: &HashSet<&str>,
) -> Result<(), ContractError> {
    if rule.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            format!("{path}.name"),
            "rule name cannot be empty",
        ));
    }

    let field = |name: &str| format!("{path}({}).{name}", rule.name);

    match &rule.kind {
        RuleKind::Table { tables, .. } if tables.is_empty() => {
            return Err(ContractError::config_validation(
                field("tables"),
                "at least one table is required",
            ));
        }
        RuleKind::Operation { operations, .. } if operations.is_empty() => {
            return Err(ContractError::config_validation(
                field("operations"),
                "at least one operation is required",
            ));
        }
        RuleKind::Priority { priorities, .. } if priorities.is_empty() => {
            return Err(ContractError::config_validation(
                field("priorities"),
                "at least one priority is required",
            ));
        }
        RuleKind::Frequency { max_per_window, .. } if *max_per_window == 0 => {
            return Err(ContractError::config_validation(
                field("max_per_window"),
                "max_per_window must be > 0",
            ));
        }
        RuleKind::Frequency { window_secs, .. } if *window_secs == 0 => {
            return Err(ContractError::config_validation(
                field("window_secs"),
                "window_secs must be > 0",
            ));
        }
        RuleKind::ColumnValue { column, .. } if column.is_empty() => {
            return Err(ContractError::config_validation(
                field("column"),
                "column cannot be empty",
            ));
        }
        RuleKind::BusinessHours { weekdays, .. } if weekdays.is_empty() => {
            return Err(ContractError::config_validation(
                field("weekdays"),
                "at least one weekday is required",
            ));
        }
        RuleKind::Composite { rules, .. } => {
            for (idx, child) in rules.iter().enumerate() {
                validate_rule(child, &format!("{path}.rules[{idx}]"), declared)?;
            }
        }
        _ => {}
    }

    validate_references(rule, path, declared)
}

/// 校验规则引用的 destination 已声明
fn validate_references(
    rule: &RuleConfig,
    path: &str,
    declared: &HashSet<&str>,
) -> Result<(), ContractError> {
    if let Some(missing) = rule
        .referenced_destinations()
        .into_iter()
        .find(|name| !declared.contains(name))
    {
        return Err(ContractError::config_validation(
            format!("{path}({}).destinations", rule.name),
            format!("destination '{missing}' is not declared"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ChangeOperation, CompositeLogic, DestinationConfig, DestinationKind, EngineSettings,
        TableMatchMode,
    };

    fn destination(name: &str) -> DestinationConfig {
        DestinationConfig {
            name: name.into(),
            destination_type: DestinationKind::Log,
            enabled: true,
            queue_capacity: 100,
            params: Default::default(),
        }
    }

    fn table_rule(name: &str, destinations: &[&str]) -> RuleConfig {
        RuleConfig {
            name: name.into(),
            priority: 0,
            kind: RuleKind::Table {
                tables: vec!["orders".into()],
                match_mode: TableMatchMode::Exact,
                destinations: destinations.iter().map(|d| d.to_string()).collect(),
            },
        }
    }

    fn minimal_config() -> RoutingConfig {
        RoutingConfig {
            destinations: vec![destination("audit"), destination("webhook-1")],
            rules: vec![table_rule("orders", &["webhook-1"])],
            ..RoutingConfig::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
        assert!(validate(&RoutingConfig::default()).is_ok());
    }

    #[test]
    fn test_duplicate_destination_name() {
        let mut config = minimal_config();
        config.destinations.push(destination("audit"));

        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate destination name"));
    }

    #[test]
    fn test_empty_rule_name() {
        let mut config = minimal_config();
        config.rules.push(table_rule("  ", &["audit"]));

        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("rules[1].name"));
    }

    #[test]
    fn test_undeclared_destination() {
        let mut config = minimal_config();
        config.rules.push(table_rule("users", &["audit", "d-missing"]));

        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("'d-missing' is not declared"));
    }

    #[test]
    fn test_frequency_requires_positive_limit() {
        let mut config = minimal_config();
        config.rules.push(RuleConfig {
            name: "throttle".into(),
            priority: 0,
            kind: RuleKind::Frequency {
                max_per_window: 0,
                window_secs: 60,
                max_tracked_tables: 100,
                destinations: vec!["audit".into()],
            },
        });

        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_per_window"));
    }

    #[test]
    fn test_empty_operation_set() {
        let mut config = minimal_config();
        config.rules.push(RuleConfig {
            name: "ops".into(),
            priority: 0,
            kind: RuleKind::Operation {
                operations: Vec::<ChangeOperation>::new(),
                destinations: vec!["audit".into()],
            },
        });

        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_composite_children_are_validated() {
        let mut config = minimal_config();
        config.rules.push(RuleConfig {
            name: "combo".into(),
            priority: 0,
            kind: RuleKind::Composite {
                logic: CompositeLogic::Any,
                rules: vec![RuleConfig {
                    name: "inner".into(),
                    priority: 0,
                    kind: RuleKind::Table {
                        tables: Vec::new(),
                        match_mode: TableMatchMode::Contains,
                        destinations: Vec::new(),
                    },
                }],
                destinations: vec!["audit".into()],
            },
        });

        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("rules[1].rules[0]"));
    }

    #[test]
    fn test_engine_ranges() {
        let mut config = minimal_config();
        config.engine = EngineSettings {
            max_concurrent_changes: 0,
            ..EngineSettings::default()
        };
        assert!(validate(&config).is_err());

        let mut config = minimal_config();
        config.engine.shutdown_timeout_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = minimal_config();
        config.destinations[0].queue_capacity = 0;
        assert!(validate(&config).is_err());
    }
}
