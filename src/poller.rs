//! RTU master poller: one instance per UART, iterating its bound poll
//! groups in a fixed round, sending one request per group and writing the
//! decoded result into the shared snapshot store. Grounded on
//! `modbus_task.c`'s `modbus_poll_task`, with a per-group adaptive response
//! timeout this crate adds on top (the firmware polls with a fixed 1000ms
//! timeout).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::PollGroup;
use crate::error::Failure;
use crate::modbus::{generate_pull_request, parse_pull_response, PolledValues};
use crate::serial::SerialChannel;
use crate::snapshot::SnapshotStore;

pub const INITIAL_TIMEOUT_MS: u64 = 300;
pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_TIMEOUT_MS: u64 = 1000;
pub const DOWN_STEP_MS: u64 = 20;
pub const UP_STEP_MS: u64 = 50;
pub const SUCCESS_STREAK_FOR_DECREASE: u32 = 5;

/// Per-group adaptive timeout: widens immediately on any failure, narrows
/// gradually after a run of successes. Bounds and steps are fixed
/// quantities, not configuration.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveTimeout {
    timeout_ms: u64,
    success_streak: u32,
}

impl Default for AdaptiveTimeout {
    fn default() -> Self {
        Self {
            timeout_ms: INITIAL_TIMEOUT_MS,
            success_streak: 0,
        }
    }
}

impl AdaptiveTimeout {
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn on_success(&mut self) {
        self.success_streak += 1;
        if self.success_streak >= SUCCESS_STREAK_FOR_DECREASE {
            self.timeout_ms = self.timeout_ms.saturating_sub(DOWN_STEP_MS).max(MIN_TIMEOUT_MS);
            self.success_streak = 0;
        }
    }

    pub fn on_failure(&mut self) {
        self.success_streak = 0;
        self.timeout_ms = (self.timeout_ms + UP_STEP_MS).min(MAX_TIMEOUT_MS);
    }
}

/// Polls every enabled group bound to a single UART, once per call. The
/// caller is expected to invoke this on a fixed `poll_interval_ms` cadence
/// from its own thread, one thread per UART.
pub struct UartPoller {
    channel: SerialChannel,
    groups: Vec<(usize, PollGroup)>,
    timeouts: Vec<AdaptiveTimeout>,
    snapshot: Arc<SnapshotStore>,
}

impl UartPoller {
    pub fn new(
        channel: SerialChannel,
        groups: Vec<(usize, PollGroup)>,
        snapshot: Arc<SnapshotStore>,
    ) -> Self {
        let timeouts = groups.iter().map(|_| AdaptiveTimeout::default()).collect();
        Self {
            channel,
            groups,
            timeouts,
            snapshot,
        }
    }

    /// Runs one full round over this UART's groups, in order.
    pub fn poll_round(&mut self) {
        for i in 0..self.groups.len() {
            let (group_index, group) = self.groups[i].clone();
            if !group.enabled {
                continue;
            }
            match self.poll_one(&group, self.timeouts[i].current()) {
                Ok(values) => {
                    self.timeouts[i].on_success();
                    match values {
                        PolledValues::Bits(bits) => self.snapshot.write_bits(group_index, &bits),
                        PolledValues::Words(words) => {
                            self.snapshot.write_words(group_index, &words)
                        }
                    }
                }
                Err(e) => {
                    self.timeouts[i].on_failure();
                    self.snapshot.mark_not_ready(group_index);
                    log::warn!(
                        "poll group {group_index} (slave {}, uart {}) failed: {e:#}",
                        group.slave_addr,
                        group.uart_port
                    );
                }
            }
        }
    }

    fn poll_one(&mut self, group: &PollGroup, timeout: Duration) -> Result<PolledValues> {
        let (mut request, raw) = generate_pull_request(
            group.function_code,
            group.slave_addr,
            group.start_addr,
            group.reg_count,
        )
        .context(Failure::ConfigInvalid)?;
        self.channel.send(&raw).context(Failure::TransientIo)?;
        let response = self.channel.receive(timeout).context(Failure::TransientIo)?;
        parse_pull_response(group.function_code, &mut request, response, group.reg_count)
            .context(Failure::ProtocolDecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_widens_immediately_on_any_failure() {
        let mut t = AdaptiveTimeout::default();
        assert_eq!(t.current(), Duration::from_millis(INITIAL_TIMEOUT_MS));
        t.on_failure();
        assert_eq!(
            t.current(),
            Duration::from_millis(INITIAL_TIMEOUT_MS + UP_STEP_MS)
        );
    }

    #[test]
    fn timeout_narrows_only_after_five_consecutive_successes() {
        let mut t = AdaptiveTimeout::default();
        for _ in 0..4 {
            t.on_success();
        }
        assert_eq!(t.current(), Duration::from_millis(INITIAL_TIMEOUT_MS));
        t.on_success();
        assert_eq!(
            t.current(),
            Duration::from_millis(INITIAL_TIMEOUT_MS - DOWN_STEP_MS)
        );
    }

    #[test]
    fn timeout_never_drops_below_the_floor() {
        let mut t = AdaptiveTimeout::default();
        for _ in 0..500 {
            t.on_success();
        }
        assert_eq!(t.current(), Duration::from_millis(MIN_TIMEOUT_MS));
    }

    #[test]
    fn timeout_never_exceeds_the_ceiling() {
        let mut t = AdaptiveTimeout::default();
        for _ in 0..500 {
            t.on_failure();
        }
        assert_eq!(t.current(), Duration::from_millis(MAX_TIMEOUT_MS));
    }

    #[test]
    fn a_failure_resets_an_in_progress_success_streak() {
        let mut t = AdaptiveTimeout::default();
        for _ in 0..4 {
            t.on_success();
        }
        t.on_failure();
        for _ in 0..4 {
            t.on_success();
        }
        // streak reset by the failure means 4 successes since then is still not 5
        assert_eq!(
            t.current(),
            Duration::from_millis(INITIAL_TIMEOUT_MS + UP_STEP_MS)
        );
    }
}
