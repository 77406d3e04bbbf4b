//! Last-known device state
//!
//! [`DeviceSnapshot`] is seeded with sentinel values (`1` for numbers, empty
//! strings) and updated field by field after each successful poll cycle. It
//! is never replaced wholesale, so a field that fails to parse keeps its
//! previous value.

use crate::logging::{StructuredLogger, get_logger};
use crate::protocol::ParsedResponse;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const MANUFACTURER: &str = "4-noks";
pub const MODEL: &str = "Elios4you";

/// Seed value for numeric fields before the first successful fetch
pub const SENTINEL: i64 = 1;

static LOGGER: Lazy<StructuredLogger> = Lazy::new(|| get_logger("snapshot"));

/// A single typed value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Float(f64),
    Int(i64),
    Text(String),
}

impl Reading {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Float(v) => Some(*v),
            Reading::Int(v) => Some(*v as f64),
            Reading::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Float(v) => write!(f, "{}", v),
            Reading::Int(v) => write!(f, "{}", v),
            Reading::Text(s) => f.write_str(s),
        }
    }
}

enum Slot<'a> {
    Float(&'a mut f64),
    Int(&'a mut i64),
    Text(&'a mut String),
}

macro_rules! device_snapshot {
    (
        floats { $($float:ident),* $(,)? }
        ints { $($int:ident),* $(,)? }
        texts { $($text:ident),* $(,)? }
    ) => {
        /// Typed measurements and identity of one monitor
        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct DeviceSnapshot {
            $(pub $float: f64,)*
            $(pub $int: i64,)*
            $(pub $text: String,)*
            /// Keys reported by the device that have no typed field
            #[serde(flatten)]
            pub extra: BTreeMap<String, String>,
        }

        impl Default for DeviceSnapshot {
            fn default() -> Self {
                let mut snapshot = Self {
                    $($float: SENTINEL as f64,)*
                    $($int: SENTINEL,)*
                    $($text: String::new(),)*
                    extra: BTreeMap::new(),
                };
                snapshot.manufact = MANUFACTURER.to_string();
                snapshot.model = MODEL.to_string();
                snapshot
            }
        }

        impl DeviceSnapshot {
            /// Every typed key, in declaration order
            pub const KEYS: &'static [&'static str] = &[
                $(stringify!($float),)*
                $(stringify!($int),)*
                $(stringify!($text),)*
            ];

            fn slot_mut(&mut self, key: &str) -> Option<Slot<'_>> {
                match key {
                    $(stringify!($float) => Some(Slot::Float(&mut self.$float)),)*
                    $(stringify!($int) => Some(Slot::Int(&mut self.$int)),)*
                    $(stringify!($text) => Some(Slot::Text(&mut self.$text)),)*
                    _ => None,
                }
            }

            /// Read a field by key; unknown keys fall back to `extra`
            pub fn get(&self, key: &str) -> Option<Reading> {
                match key {
                    $(stringify!($float) => Some(Reading::Float(self.$float)),)*
                    $(stringify!($int) => Some(Reading::Int(self.$int)),)*
                    $(stringify!($text) => Some(Reading::Text(self.$text.clone())),)*
                    other => self.extra.get(other).map(|v| Reading::Text(v.clone())),
                }
            }
        }
    };
}

device_snapshot! {
    floats {
        produced_power,
        consumed_power,
        self_consumed_power,
        bought_power,
        sold_power,
        daily_peak,
        monthly_peak,
        produced_energy,
        produced_energy_f1,
        produced_energy_f2,
        produced_energy_f3,
        consumed_energy,
        consumed_energy_f1,
        consumed_energy_f2,
        consumed_energy_f3,
        self_consumed_energy,
        self_consumed_energy_f1,
        self_consumed_energy_f2,
        self_consumed_energy_f3,
        bought_energy,
        bought_energy_f1,
        bought_energy_f2,
        bought_energy_f3,
        sold_energy,
        sold_energy_f1,
        sold_energy_f2,
        sold_energy_f3,
    }
    ints {
        alarm_1,
        alarm_2,
        power_alarm,
        relay_state,
        pwm_mode,
        pr_ssv,
        rel_ssv,
        rel_mode,
        rel_warning,
        rcap,
    }
    texts {
        utc_time,
        fwtop,
        fwbtm,
        sn,
        hwver,
        btver,
        hw_wifi,
        s2w_app_version,
        s2w_geps_version,
        s2w_wlan_version,
        swver,
        manufact,
        model,
    }
}

/// Round half away from zero to two decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl DeviceSnapshot {
    /// Store `reading` under `key`, coercing to the field's type.
    ///
    /// Returns `false` when the value cannot be represented in the field
    /// (text that is not a number for a numeric field). Keys without a typed
    /// field are kept in `extra`.
    pub fn set(&mut self, key: &str, reading: Reading) -> bool {
        let Some(slot) = self.slot_mut(key) else {
            self.extra.insert(key.to_string(), reading.to_string());
            return true;
        };
        match (slot, reading) {
            (Slot::Float(field), reading) => match reading.as_f64() {
                Some(v) => {
                    *field = v;
                    true
                }
                None => false,
            },
            (Slot::Int(field), Reading::Int(v)) => {
                *field = v;
                true
            }
            (Slot::Int(field), Reading::Float(v)) if v.is_finite() => {
                *field = v.round() as i64;
                true
            }
            (Slot::Int(_), Reading::Float(_)) => false,
            (Slot::Int(field), Reading::Text(s)) => match s.trim().parse() {
                Ok(v) => {
                    *field = v;
                    true
                }
                Err(_) => false,
            },
            (Slot::Text(field), reading) => {
                *field = reading.to_string();
                true
            }
        }
    }

    /// Apply an `@dat` answer: power and energy keys as two-decimal floats,
    /// everything else as integers. `utc_time` is never stored.
    pub fn apply_dat(&mut self, parsed: &ParsedResponse) {
        for (key, value) in parsed {
            if key == "utc_time" {
                continue;
            }
            let reading = if key.contains("energy") || key.contains("power") {
                value.parse::<f64>().ok().map(|v| Reading::Float(round2(v)))
            } else {
                value.parse::<i64>().ok().map(Reading::Int)
            };
            self.store_numeric(key, value, reading);
        }
    }

    /// Apply an `@sta` answer: every key as a two-decimal float
    pub fn apply_sta(&mut self, parsed: &ParsedResponse) {
        for (key, value) in parsed {
            let reading = value.parse::<f64>().ok().map(|v| Reading::Float(round2(v)));
            self.store_numeric(key, value, reading);
        }
    }

    /// Apply an `@inf` answer: every key offered verbatim as text. Numeric
    /// fields still have to parse, otherwise they keep their value.
    pub fn apply_inf(&mut self, parsed: &ParsedResponse) {
        for (key, value) in parsed {
            self.store_numeric(key, value, Some(Reading::Text(value.clone())));
        }
    }

    fn store_numeric(&mut self, key: &str, raw: &str, reading: Option<Reading>) {
        let stored = match reading {
            Some(reading) => self.set(key, reading),
            None => false,
        };
        if !stored {
            LOGGER.debug(&format!(
                "Value could not be parsed, key={} value={:?}",
                key, raw
            ));
        }
    }

    /// Recompute the combined firmware string and the self-consumption
    /// fields from their sources
    pub fn recompute_derived(&mut self) {
        self.swver = format!("{} / {}", self.fwtop, self.fwbtm);
        self.self_consumed_power = round2(self.produced_power - self.sold_power);
        self.self_consumed_energy = round2(self.produced_energy - self.sold_energy);
        self.self_consumed_energy_f1 = round2(self.produced_energy_f1 - self.sold_energy_f1);
        self.self_consumed_energy_f2 = round2(self.produced_energy_f2 - self.sold_energy_f2);
        self.self_consumed_energy_f3 = round2(self.produced_energy_f3 - self.sold_energy_f3);
    }

    /// Whether identity info has been read at least once
    pub fn has_identity(&self) -> bool {
        !self.sn.is_empty()
    }

    pub fn relay_is_on(&self) -> bool {
        self.relay_state == 1
    }
}
