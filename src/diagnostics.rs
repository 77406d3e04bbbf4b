//! Redacted diagnostics export

use crate::config::Config;
use crate::coordinator::CoordinatorStatus;
use crate::error::Result;
use crate::snapshot::DeviceSnapshot;
use serde_json::{Map, Value, json};

/// Keys whose values never leave the process
pub const TO_REDACT: [&str; 4] = ["host", "sn", "serial_number", "ip"];

pub const REDACTED: &str = "**REDACTED**";

/// Replace the value of every [`TO_REDACT`] key, at any depth
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if TO_REDACT.contains(&k.as_str()) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, redact(v))
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

/// Build the diagnostics document for one device
pub fn build_diagnostics(
    config: &Config,
    snapshot: &DeviceSnapshot,
    status: &CoordinatorStatus,
) -> Result<Value> {
    let config_data = json!({
        "integration_version": crate::VERSION,
        "device": redact(serde_json::to_value(&config.device)?),
        "polling": serde_json::to_value(&config.polling)?,
    });

    let device_data = json!({
        "name": config.device.name,
        "port": config.device.port,
        "manufacturer": snapshot.manufact,
        "model": snapshot.model,
        "serial_number": REDACTED,
    });

    let coordinator_data = json!({
        "last_update_success": status.last_update_success,
        "last_update_time": status.last_update_time,
        "update_interval_seconds": status.update_interval_secs,
        "consecutive_failures": status.consecutive_failures,
        "last_error_kind": status.last_error_kind,
        "issue_active": status.issue_active,
    });

    let sensors = redact(serde_json::to_value(snapshot)?);

    Ok(json!({
        "config": config_data,
        "device": device_data,
        "coordinator": coordinator_data,
        "sensors": sensors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Reading;

    #[test]
    fn test_redact_nested_keys() {
        let value = json!({
            "host": "192.168.1.50",
            "nested": { "ip": "10.0.0.1", "keep": 1 },
            "list": [{ "serial_number": "X" }],
        });
        let redacted = redact(value);
        assert_eq!(redacted["host"], REDACTED);
        assert_eq!(redacted["nested"]["ip"], REDACTED);
        assert_eq!(redacted["nested"]["keep"], 1);
        assert_eq!(redacted["list"][0]["serial_number"], REDACTED);
    }

    #[test]
    fn test_diagnostics_hide_identity() {
        let mut config = Config::default();
        config.device.host = "192.168.1.50".to_string();
        let mut snapshot = DeviceSnapshot::default();
        snapshot.sn = "E4U-SECRET".to_string();
        snapshot.set("ip", Reading::Text("192.168.1.50".to_string()));
        snapshot.produced_power = 1.25;

        let doc = build_diagnostics(&config, &snapshot, &CoordinatorStatus::default()).unwrap();
        let text = doc.to_string();
        assert!(!text.contains("E4U-SECRET"));
        assert!(!text.contains("192.168.1.50"));
        assert_eq!(doc["config"]["device"]["host"], REDACTED);
        assert_eq!(doc["device"]["serial_number"], REDACTED);
        assert_eq!(doc["device"]["port"], 5001);
        assert_eq!(doc["sensors"]["sn"], REDACTED);
        assert_eq!(doc["sensors"]["produced_power"], 1.25);
    }
}
