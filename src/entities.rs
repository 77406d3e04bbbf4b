//! Sensor and switch descriptors for presenting a snapshot
//!
//! Descriptors without a state class are diagnostic entities (status codes
//! and identity strings); the relay switch is a configuration entity.

use crate::snapshot::{DeviceSnapshot, Reading};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Power,
    Energy,
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
    Config,
}

pub const UNIT_KILO_WATT: &str = "kW";
pub const UNIT_KILO_WATT_HOUR: &str = "kWh";

/// Static description of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
}

impl SensorDescriptor {
    const fn power(key: &'static str, name: &'static str, icon: &'static str) -> Self {
        Self {
            key,
            name,
            icon,
            unit: Some(UNIT_KILO_WATT),
            device_class: Some(DeviceClass::Power),
            state_class: Some(StateClass::Measurement),
        }
    }

    const fn energy(key: &'static str, name: &'static str, icon: &'static str) -> Self {
        Self {
            key,
            name,
            icon,
            unit: Some(UNIT_KILO_WATT_HOUR),
            device_class: Some(DeviceClass::Energy),
            state_class: Some(StateClass::TotalIncreasing),
        }
    }

    const fn diagnostic(key: &'static str, name: &'static str, icon: &'static str) -> Self {
        Self {
            key,
            name,
            icon,
            unit: None,
            device_class: None,
            state_class: None,
        }
    }

    pub fn entity_category(&self) -> Option<EntityCategory> {
        match self.state_class {
            None => Some(EntityCategory::Diagnostic),
            Some(_) => None,
        }
    }
}

const ICON_SOLAR: &str = "mdi:solar-power-variant-outline";
const ICON_HOME: &str = "mdi:home-lightning-bolt-outline";
const ICON_EXPORT: &str = "mdi:transmission-tower-export";
const ICON_IMPORT: &str = "mdi:transmission-tower-import";
const ICON_ALARM: &str = "mdi:alarm-light-outline";
const ICON_INFO: &str = "mdi:information-outline";
const ICON_TOGGLE: &str = "mdi:toggle-switch-outline";

pub const SENSORS: &[SensorDescriptor] = &[
    SensorDescriptor::power("produced_power", "Produced Power", ICON_SOLAR),
    SensorDescriptor::power("consumed_power", "Consumed Power", ICON_HOME),
    SensorDescriptor::power("self_consumed_power", "Self Consumed Power", ICON_HOME),
    SensorDescriptor::power("bought_power", "Bought Power", ICON_EXPORT),
    SensorDescriptor::power("sold_power", "Sold Power", ICON_IMPORT),
    SensorDescriptor::power("daily_peak", "Daily Peak", ICON_SOLAR),
    SensorDescriptor::power("monthly_peak", "Monthly Peak", ICON_SOLAR),
    SensorDescriptor::energy("produced_energy", "Produced Energy", ICON_SOLAR),
    SensorDescriptor::energy("produced_energy_f1", "Produced Energy F1", ICON_SOLAR),
    SensorDescriptor::energy("produced_energy_f2", "Produced Energy F2", ICON_SOLAR),
    SensorDescriptor::energy("produced_energy_f3", "Produced Energy F3", ICON_SOLAR),
    SensorDescriptor::energy("consumed_energy", "Consumed Energy", ICON_HOME),
    SensorDescriptor::energy("consumed_energy_f1", "Consumed Energy F1", ICON_HOME),
    SensorDescriptor::energy("consumed_energy_f2", "Consumed Energy F2", ICON_HOME),
    SensorDescriptor::energy("consumed_energy_f3", "Consumed Energy F3", ICON_HOME),
    SensorDescriptor::energy("self_consumed_energy", "Self Consumed Energy", ICON_HOME),
    SensorDescriptor::energy("self_consumed_energy_f1", "Self Consumed Energy F1", ICON_HOME),
    SensorDescriptor::energy("self_consumed_energy_f2", "Self Consumed Energy F2", ICON_HOME),
    SensorDescriptor::energy("self_consumed_energy_f3", "Self Consumed Energy F3", ICON_HOME),
    SensorDescriptor::energy("bought_energy", "Bought Energy", ICON_EXPORT),
    SensorDescriptor::energy("bought_energy_f1", "Bought Energy F1", ICON_EXPORT),
    SensorDescriptor::energy("bought_energy_f2", "Bought Energy F2", ICON_EXPORT),
    SensorDescriptor::energy("bought_energy_f3", "Bought Energy F3", ICON_EXPORT),
    SensorDescriptor::energy("sold_energy", "Sold Energy", ICON_IMPORT),
    SensorDescriptor::energy("sold_energy_f1", "Sold Energy F1", ICON_IMPORT),
    SensorDescriptor::energy("sold_energy_f2", "Sold Energy F2", ICON_IMPORT),
    SensorDescriptor::energy("sold_energy_f3", "Sold Energy F3", ICON_IMPORT),
    SensorDescriptor::diagnostic("alarm_1", "Alarm 1", ICON_ALARM),
    SensorDescriptor::diagnostic("alarm_2", "Alarm 2", ICON_ALARM),
    SensorDescriptor::diagnostic("power_alarm", "Power Alarm", ICON_ALARM),
    SensorDescriptor::diagnostic("pwm_mode", "PWM Mode", ICON_INFO),
    SensorDescriptor::diagnostic("pr_ssv", "Power Reducer Ssv", ICON_INFO),
    SensorDescriptor::diagnostic("rel_ssv", "Relay Ssv", ICON_TOGGLE),
    SensorDescriptor::diagnostic("rel_mode", "Relay Mode", ICON_TOGGLE),
    SensorDescriptor::diagnostic("rel_warning", "Relay Warning", ICON_ALARM),
    SensorDescriptor::diagnostic("rcap", "RedCap", ICON_INFO),
    SensorDescriptor::diagnostic("fwtop", "Firmware TOP Version", ICON_INFO),
    SensorDescriptor::diagnostic("fwbtm", "Firmware BOTTOM Version", ICON_INFO),
    SensorDescriptor::diagnostic("sn", "Serial Number", ICON_INFO),
    SensorDescriptor::diagnostic("hwver", "Hardware Version", ICON_INFO),
    SensorDescriptor::diagnostic("btver", "BT Version", ICON_INFO),
    SensorDescriptor::diagnostic("hw_wifi", "Wifi HW Version", ICON_INFO),
    SensorDescriptor::diagnostic("s2w_app_version", "Wifi App Version", ICON_INFO),
    SensorDescriptor::diagnostic("s2w_geps_version", "Wifi Geps Version", ICON_INFO),
    SensorDescriptor::diagnostic("s2w_wlan_version", "Wifi Wlan Version", ICON_INFO),
];

/// Static description of the relay switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub device_class: DeviceClass,
}

pub const RELAY_SWITCH: SwitchDescriptor = SwitchDescriptor {
    key: "relay_state",
    name: "Relay",
    icon: ICON_TOGGLE,
    device_class: DeviceClass::Switch,
};

/// Stable identifier for an entity of the device with serial `sn`
pub fn unique_id(sn: &str, key: &str) -> String {
    format!("elios4you_{}_{}", sn, key)
}

/// A sensor with its current value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorValue {
    pub key: &'static str,
    pub name: &'static str,
    pub unique_id: String,
    pub value: Option<Reading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub icon: &'static str,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub entity_category: Option<EntityCategory>,
}

/// The relay switch with its current state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchValue {
    pub key: &'static str,
    pub name: &'static str,
    pub unique_id: String,
    pub is_on: bool,
    pub icon: &'static str,
    pub device_class: DeviceClass,
    pub entity_category: EntityCategory,
}

/// Device registry style identity block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub sw_version: String,
    pub hw_version: String,
}

pub fn render_sensors(snapshot: &DeviceSnapshot) -> Vec<SensorValue> {
    SENSORS
        .iter()
        .map(|d| SensorValue {
            key: d.key,
            name: d.name,
            unique_id: unique_id(&snapshot.sn, d.key),
            value: snapshot.get(d.key),
            unit: d.unit,
            icon: d.icon,
            device_class: d.device_class,
            state_class: d.state_class,
            entity_category: d.entity_category(),
        })
        .collect()
}

pub fn render_relay(snapshot: &DeviceSnapshot) -> SwitchValue {
    SwitchValue {
        key: RELAY_SWITCH.key,
        name: RELAY_SWITCH.name,
        unique_id: unique_id(&snapshot.sn, RELAY_SWITCH.key),
        is_on: snapshot.relay_is_on(),
        icon: RELAY_SWITCH.icon,
        device_class: RELAY_SWITCH.device_class,
        entity_category: EntityCategory::Config,
    }
}

pub fn device_info(name: &str, snapshot: &DeviceSnapshot) -> DeviceInfo {
    DeviceInfo {
        name: name.to_string(),
        manufacturer: snapshot.manufact.clone(),
        model: snapshot.model.clone(),
        serial_number: snapshot.sn.clone(),
        sw_version: snapshot.swver.clone(),
        hw_version: snapshot.hwver.clone(),
    }
}
