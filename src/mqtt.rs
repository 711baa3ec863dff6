//! MQTT publisher: on `publish_interval_ms`, assembles one JSON object per
//! enabled group from the snapshot store and publishes it at QoS 0,
//! retain=false. Grounded on `mqtt.c`'s `mqtt_publish_task`, using
//! `rumqttc`'s synchronous client the way `cli::modbus::master`'s MQTT
//! data-source mode does.
//!
//! The 32-bit/float byte-order formulas here are the standard,
//! self-consistent byte-swap semantics, not the original firmware's (its
//! BADC/DCBA branches mix up shift and mask widths). See `DESIGN.md`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{Client, MqttOptions, QoS};
use serde_json::{json, Value};

use crate::config::{MqttConfig, ParseMethod};
use crate::snapshot::SnapshotStore;

const CLIENT_ID: &str = "modbus-gateway";
const JSON_BUDGET_BYTES: usize = 8 * 1024;

pub struct MqttPublisher {
    config: MqttConfig,
    snapshot: Arc<SnapshotStore>,
    client: Option<Client>,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig, snapshot: Arc<SnapshotStore>) -> Self {
        Self {
            config,
            snapshot,
            client: None,
        }
    }

    /// Stops any running client and rebuilds it from the new config,
    /// restarting only if still enabled. Mirrors `mqtt_update_config`'s
    /// stop/replace/restart-if-enabled lifecycle.
    pub fn reconfigure(&mut self, config: MqttConfig) -> Result<()> {
        self.client = None;
        self.config = config;
        if self.config.enabled {
            self.connect()?;
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        let (host, port) = parse_broker_url(&self.config.broker_url)?;
        let mut options = MqttOptions::new(CLIENT_ID, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if !self.config.username.is_empty() {
            options.set_credentials(&self.config.username, &self.config.password);
        }
        let (client, mut connection) = Client::new(options, 10);
        // rumqttc requires the event loop to be polled for the client to make
        // progress; drive it on a background thread the way the
        // subscribe-side connections elsewhere in this codebase do.
        std::thread::spawn(move || {
            for notification in connection.iter() {
                if let Err(e) = notification {
                    log::warn!("mqtt connection error: {e:#}");
                    break;
                }
            }
        });
        self.client = Some(client);
        Ok(())
    }

    /// Runs forever, publishing every `publish_interval_ms`.
    pub fn run(&mut self) -> Result<()> {
        if self.config.enabled {
            self.connect()?;
        }
        loop {
            if self.config.enabled {
                if let Err(e) = self.publish_once() {
                    log::warn!("mqtt publish failed: {e:#}");
                }
            }
            std::thread::sleep(Duration::from_millis(self.config.publish_interval_ms as u64));
        }
    }

    fn publish_once(&mut self) -> Result<()> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        let mut root = serde_json::Map::new();
        for &group_id in &self.config.group_ids {
            if group_id as usize >= self.snapshot.group_count() {
                log::warn!("mqtt config references out-of-range group id {group_id}");
                continue;
            }
            let Some(row) = self.snapshot.read(group_id as usize) else {
                continue;
            };
            let method = self
                .config
                .parse_methods
                .get(group_id as usize)
                .copied()
                .unwrap_or_default();
            let values = Value::Array(assemble_group(&row, method));
            let key = format!("group{group_id}");
            let added_size = key.len() + serde_json::to_vec(&values).map(|v| v.len()).unwrap_or(0);
            if estimate_size(&root) + added_size > JSON_BUDGET_BYTES {
                log::warn!("mqtt payload budget exceeded, skipping group {group_id}");
                continue;
            }
            root.insert(key, values);
        }
        if root.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_vec(&Value::Object(root)).context("encoding mqtt payload")?;
        client
            .publish(&self.config.topic, QoS::AtMostOnce, false, payload)
            .context("publishing mqtt message")
    }
}

fn estimate_size(value: &serde_json::Map<String, Value>) -> usize {
    serde_json::to_vec(&Value::Object(value.clone()))
        .map(|v| v.len())
        .unwrap_or(0)
}

/// Decodes one group's row into a JSON array per the configured parse
/// method. Bit-mode groups emit exactly `row.count` 0/1 integers, LSB-first
/// — the packed bytes round up to a whole number of bytes, so the tail
/// beyond `count` is padding, not read data.
fn assemble_group(row: &crate::snapshot::GroupRow, method: ParseMethod) -> Vec<Value> {
    if !row.bits.is_empty() || row.words.is_empty() {
        return row
            .bits
            .iter()
            .flat_map(|byte| (0..8).map(move |i| json!((byte >> i) & 1)))
            .take(row.count as usize)
            .collect();
    }

    if !method.is_wide() {
        return row
            .words
            .iter()
            .map(|&w| match method {
                ParseMethod::Int16Signed => json!(w as i16),
                _ => json!(w),
            })
            .collect();
    }

    row.words
        .chunks_exact(2)
        .map(|pair| decode_wide(pair[0], pair[1], method))
        .collect()
}

/// Standard Modbus word-pair byte-order decode: `a`/`b` are the two
/// registers in wire order. `byteswap16` flips the two bytes within one
/// 16-bit register, matching the ABCD/CDAB/BADC/DCBA convention names.
fn decode_wide(a: u16, b: u16, method: ParseMethod) -> Value {
    let raw: u32 = match method {
        ParseMethod::Int32Abcd | ParseMethod::Float32Abcd => (a as u32) << 16 | b as u32,
        ParseMethod::Int32Cdab | ParseMethod::Float32Cdab => (b as u32) << 16 | a as u32,
        ParseMethod::Int32Badc | ParseMethod::Float32Badc => {
            (a.swap_bytes() as u32) << 16 | b.swap_bytes() as u32
        }
        ParseMethod::Int32Dcba | ParseMethod::Float32Dcba => {
            (b.swap_bytes() as u32) << 16 | a.swap_bytes() as u32
        }
        ParseMethod::Int16Signed | ParseMethod::Int16Unsigned => unreachable!(),
    };
    match method {
        ParseMethod::Int32Abcd | ParseMethod::Int32Cdab | ParseMethod::Int32Badc | ParseMethod::Int32Dcba => {
            json!(raw as i32)
        }
        _ => {
            let value = f32::from_bits(raw);
            json!((value * 100.0).round() / 100.0)
        }
    }
}

fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");
    let mut parts = stripped.splitn(2, ':');
    let host = parts
        .next()
        .filter(|h| !h.is_empty())
        .context("mqtt broker url has no host")?
        .to_string();
    let port = parts
        .next()
        .map(|p| p.parse::<u16>())
        .transpose()
        .context("mqtt broker url has an invalid port")?
        .unwrap_or(1883);
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_abcd_word_pair() {
        let value = decode_wide(0x1234, 0x5678, ParseMethod::Int32Abcd);
        assert_eq!(value, json!(0x1234_5678_u32 as i32));
    }

    #[test]
    fn decodes_standard_cdab_word_pair() {
        let value = decode_wide(0x1234, 0x5678, ParseMethod::Int32Cdab);
        assert_eq!(value, json!(0x5678_1234_u32 as i32));
    }

    #[test]
    fn decodes_standard_badc_word_pair() {
        let value = decode_wide(0x1234, 0x5678, ParseMethod::Int32Badc);
        assert_eq!(value, json!(0x3412_7856_u32 as i32));
    }

    #[test]
    fn decodes_standard_dcba_word_pair() {
        let value = decode_wide(0x1234, 0x5678, ParseMethod::Int32Dcba);
        assert_eq!(value, json!(0x7856_3412_u32 as i32));
    }

    #[test]
    fn decodes_int16_signed_as_negative() {
        let row = crate::snapshot::GroupRow {
            bits: vec![],
            words: vec![0xFFFE],
            count: 1,
        };
        let values = assemble_group(&row, ParseMethod::Int16Signed);
        assert_eq!(values, vec![json!(-2)]);
    }

    #[test]
    fn decodes_int16_unsigned_without_sign_extension() {
        let row = crate::snapshot::GroupRow {
            bits: vec![],
            words: vec![0xFFFE],
            count: 1,
        };
        let values = assemble_group(&row, ParseMethod::Int16Unsigned);
        assert_eq!(values, vec![json!(65534)]);
    }

    #[test]
    fn decodes_bits_lsb_first() {
        let row = crate::snapshot::GroupRow {
            bits: vec![0b0000_0101],
            words: vec![],
            count: 8,
        };
        let values = assemble_group(&row, ParseMethod::Int16Unsigned);
        assert_eq!(values, vec![json!(1), json!(0), json!(1), json!(0), json!(0), json!(0), json!(0), json!(0)]);
    }

    #[test]
    fn truncates_bits_to_the_logical_count_not_the_whole_packed_byte() {
        // 4-coil group packed as 0b1010 (coil0=0,coil1=1,coil2=0,coil3=1)
        let row = crate::snapshot::GroupRow {
            bits: vec![0b0000_1010],
            words: vec![],
            count: 4,
        };
        let values = assemble_group(&row, ParseMethod::Int16Unsigned);
        assert_eq!(values, vec![json!(0), json!(1), json!(0), json!(1)]);
    }
}
