//! Field validation for SV and GOOSE simulator configurations.
//!
//! Validators are pure: they take the JSON body the UI posted and return
//! every rule violation as a human-readable message. They never talk to the
//! worker.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("valid regex pattern")
});
static ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex pattern"));
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex pattern"));
static OBJECT_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_/$]+$").expect("valid regex pattern"));
static SCENARIO_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+\.[tT][xX][tT]$").expect("valid regex pattern")
});
static HEX_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0[xX][0-9A-Fa-f]{1,4}$").expect("valid regex pattern"));

pub const VALID_MESSAGE: &str = "Configuration is valid";

const MAC_FORMAT: &str = "must be in format XX:XX:XX:XX:XX:XX or XX-XX-XX-XX-XX-XX";

/// Text form of a scalar field. Numbers are accepted where the UI may send them unquoted.
fn text_field<'a>(config: &'a Value, name: &str) -> Option<std::borrow::Cow<'a, str>> {
    match config.get(name)? {
        Value::String(s) if !s.is_empty() => Some(std::borrow::Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(std::borrow::Cow::Owned(n.to_string())),
        _ => None,
    }
}

fn matches(config: &Value, name: &str, pattern: &Regex) -> bool {
    text_field(config, name).is_some_and(|v| pattern.is_match(&v))
}

fn integer_in_range(config: &Value, name: &str, min: i64, max: i64) -> bool {
    let value = match config.get(name) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    value.is_some_and(|v| (min..=max).contains(&v))
}

/// Validate one SV publisher instance, returning its violations unprefixed.
pub fn validate_sv_instance(config: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, message: &str| {
        if !ok {
            errors.push(message.to_string());
        }
    };

    check(
        integer_in_range(config, "appId", 1, 999_999),
        "appId must be a number between 1 and 999999",
    );
    check(
        matches(config, "dstMac", &MAC_ADDRESS),
        &format!("dstMac {MAC_FORMAT}"),
    );
    check(
        matches(config, "svInterface", &ALPHANUMERIC),
        "svInterface must be alphanumeric (e.g., enp0s31f6)",
    );
    check(
        matches(config, "scenarioConfigFile", &SCENARIO_FILE),
        "scenarioConfigFile must be a valid TXT filename (e.g., scenario.txt)",
    );
    check(
        matches(config, "svIDs", &ALPHANUMERIC),
        "svIDs must be alphanumeric (e.g., sv2004)",
    );
    check(
        matches(config, "GoCBRef", &OBJECT_REFERENCE),
        "GoCBRef must be alphanumeric and can contain '_', '/' or '$' (e.g., \"IEDName/LLN0$GO$gcbName\")",
    );
    check(
        matches(config, "DatSet", &OBJECT_REFERENCE),
        "DatSet must be alphanumeric and can contain '_', '/' or '$' (e.g., \"IEDName/LLN0$DS$AnalogValues\")",
    );
    check(
        matches(config, "GoID", &IDENTIFIER),
        "GoID must be alphanumeric and can contain '_' (e.g., \"MyGooseID\")",
    );
    check(
        matches(config, "MACAddress", &MAC_ADDRESS),
        &format!("MACAddress {MAC_FORMAT}"),
    );
    check(
        integer_in_range(config, "AppID", 1, 65_535),
        "AppID must be a number between 1 and 65535",
    );
    check(
        matches(config, "Interface", &ALPHANUMERIC),
        "Interface must be alphanumeric (e.g., enp0s31f6)",
    );

    errors
}

/// Validate the `/api/verify-config` body: an array of SV instances.
///
/// Each violation is prefixed with `Instance <index>:`.
pub fn validate_sv_configs(body: &Value) -> Result<(), Vec<String>> {
    let Some(instances) = body.as_array() else {
        return Err(vec![
            "Request body must be an array of configurations.".to_string(),
        ]);
    };

    let errors: Vec<String> = instances
        .iter()
        .enumerate()
        .flat_map(|(index, instance)| {
            validate_sv_instance(instance)
                .into_iter()
                .map(move |e| format!("Instance {index}: {e}"))
        })
        .collect();

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate the `/api/verify-goose-config` body.
pub fn validate_goose_config(config: &Value) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, message: &str| {
        if !ok {
            errors.push(message.to_string());
        }
    };

    check(
        matches(config, "gocbRef", &IDENTIFIER),
        "gocbRef must be alphanumeric with underscores",
    );
    check(
        matches(config, "datSet", &IDENTIFIER),
        "datSet must be alphanumeric with underscores",
    );
    check(
        matches(config, "goID", &HEX_ID),
        "goID must be a hexadecimal value (e.g., 0x1000 or 0X1000)",
    );
    check(
        matches(config, "macAddress", &MAC_ADDRESS),
        &format!("macAddress {MAC_FORMAT}"),
    );
    check(
        matches(config, "appID", &IDENTIFIER),
        "appID must be alphanumeric with underscores",
    );
    check(
        matches(config, "interface", &ALPHANUMERIC),
        "interface must be alphanumeric (e.g., eth0)",
    );

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sv_instance() -> Value {
        json!({
            "appId": "4000",
            "dstMac": "01:0C:CD:04:00:01",
            "svInterface": "enp0s31f6",
            "scenarioConfigFile": "fault_scenario.TXT",
            "svIDs": "sv2004",
            "GoCBRef": "IEDName/LLN0$GO$gcbName",
            "DatSet": "IEDName/LLN0$DS$AnalogValues",
            "GoID": "My_GooseID",
            "MACAddress": "01-0C-CD-01-00-01",
            "AppID": 4096,
            "Interface": "eth0"
        })
    }

    fn goose_config() -> Value {
        json!({
            "gocbRef": "gcb01",
            "datSet": "Dataset_1",
            "goID": "0x1000",
            "macAddress": "01:0c:cd:01:00:01",
            "appID": "app_1",
            "interface": "eth0"
        })
    }

    #[test]
    fn valid_sv_instances_pass() {
        assert_eq!(validate_sv_configs(&json!([sv_instance(), sv_instance()])), Ok(()));
        assert_eq!(validate_sv_configs(&json!([])), Ok(()));
    }

    #[test]
    fn sv_body_must_be_array() {
        let errors = validate_sv_configs(&sv_instance()).unwrap_err();
        assert_eq!(errors, vec!["Request body must be an array of configurations."]);
    }

    #[test]
    fn sv_errors_are_prefixed_by_instance() {
        let mut bad = sv_instance();
        bad["appId"] = json!(0);
        bad["dstMac"] = json!("01:0C:CD:04:00");
        let errors = validate_sv_configs(&json!([sv_instance(), bad])).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "Instance 1: appId must be a number between 1 and 999999",
                "Instance 1: dstMac must be in format XX:XX:XX:XX:XX:XX or XX-XX-XX-XX-XX-XX",
            ]
        );
    }

    #[test]
    fn empty_sv_instance_reports_every_field() {
        let errors = validate_sv_instance(&json!({}));
        assert_eq!(errors.len(), 11);
    }

    #[test]
    fn sv_field_rules() {
        let cases = [
            ("appId", json!("1000000"), "appId"),
            ("appId", json!("abc"), "appId"),
            ("svInterface", json!("enp0s31f6:1"), "svInterface"),
            ("scenarioConfigFile", json!("scenario.xml"), "scenarioConfigFile"),
            ("scenarioConfigFile", json!("../etc/passwd.txt"), "scenarioConfigFile"),
            ("svIDs", json!("sv_2004"), "svIDs"),
            ("GoCBRef", json!("IED Name"), "GoCBRef"),
            ("GoID", json!("My/Goose"), "GoID"),
            ("MACAddress", json!("01:0C:CD:01:00:0G"), "MACAddress"),
            ("AppID", json!(65536), "AppID"),
            ("Interface", json!(""), "Interface"),
        ];
        for (field, value, expected) in cases {
            let mut config = sv_instance();
            config[field] = value;
            let errors = validate_sv_instance(&config);
            assert_eq!(errors.len(), 1, "{field}: {errors:?}");
            assert!(errors[0].starts_with(expected), "{field}: {errors:?}");
        }
    }

    #[test]
    fn valid_goose_config_passes() {
        assert_eq!(validate_goose_config(&goose_config()), Ok(()));
    }

    #[test]
    fn goose_hex_id_rules() {
        for (value, ok) in [
            ("0x1", true),
            ("0XBEEF", true),
            ("0x12345", false),
            ("1000", false),
            ("0x", false),
        ] {
            let mut config = goose_config();
            config["goID"] = json!(value);
            assert_eq!(validate_goose_config(&config).is_ok(), ok, "goID {value}");
        }
    }

    #[test]
    fn goose_errors_list_every_violation() {
        let errors = validate_goose_config(&json!({"interface": "eth-0"})).unwrap_err();
        insta::assert_json_snapshot!(errors, @r#"
        [
          "gocbRef must be alphanumeric with underscores",
          "datSet must be alphanumeric with underscores",
          "goID must be a hexadecimal value (e.g., 0x1000 or 0X1000)",
          "macAddress must be in format XX:XX:XX:XX:XX:XX or XX-XX-XX-XX-XX-XX",
          "appID must be alphanumeric with underscores",
          "interface must be alphanumeric (e.g., eth0)"
        ]
        "#);
    }
}
