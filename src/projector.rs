//! Slave Projector: on a fixed 100ms cadence, copies each configured
//! register-map entry from the shared snapshot store into the TCP slave
//! engine's arenas, skipping any group whose `ready` flag is false.
//! Grounded on `tcp_slave_regs.c`'s `update_slave_data`/
//! `modbus_regs_update_task`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rmodbus::server::context::ModbusContext;

use crate::config::{MapEntry, MapKind, TcpSlaveConfig};
use crate::snapshot::SnapshotStore;
use crate::tcp_slave::SlaveStorage;

pub const PROJECTION_PERIOD: Duration = Duration::from_millis(100);

pub struct SlaveProjector {
    maps: Vec<MapEntry>,
    snapshot: Arc<SnapshotStore>,
    storage: Arc<RwLock<SlaveStorage>>,
}

impl SlaveProjector {
    pub fn new(
        config: &TcpSlaveConfig,
        snapshot: Arc<SnapshotStore>,
        storage: Arc<RwLock<SlaveStorage>>,
    ) -> Self {
        Self {
            maps: config.maps.clone(),
            snapshot,
            storage,
        }
    }

    /// Runs one projection pass over every configured map entry.
    pub fn project_once(&self) {
        let mut storage = self.storage.write();
        for map in &self.maps {
            let Some(row) = self.snapshot.read(map.group_index) else {
                continue;
            };
            if let Err(e) = project_one(map, &row, &mut storage) {
                log::warn!("slave projector: map for group {} failed: {e:#}", map.group_index);
            }
        }
    }

    /// Blocks forever, projecting every [`PROJECTION_PERIOD`].
    pub fn run(&self) {
        loop {
            self.project_once();
            std::thread::sleep(PROJECTION_PERIOD);
        }
    }
}

fn project_one(
    map: &MapEntry,
    row: &crate::snapshot::GroupRow,
    storage: &mut SlaveStorage,
) -> anyhow::Result<()> {
    match map.kind {
        MapKind::CoilToCoil => {
            for j in 0..map.count {
                let bit = crate::snapshot::SnapshotStore::bit_at(row, map.master_start_addr + j);
                storage.set_coil(map.slave_start_addr + j, bit)?;
            }
        }
        MapKind::DiscreteToDiscrete => {
            for j in 0..map.count {
                let bit = crate::snapshot::SnapshotStore::bit_at(row, map.master_start_addr + j);
                storage.set_discrete(map.slave_start_addr + j, bit)?;
            }
        }
        MapKind::HoldingToHolding => {
            for j in 0..map.count {
                let value = row.words[(map.master_start_addr + j) as usize];
                storage.set_holding(map.slave_start_addr + j, value)?;
            }
        }
        MapKind::InputToInput => {
            for j in 0..map.count {
                let value = row.words[(map.master_start_addr + j) as usize];
                storage.set_input(map.slave_start_addr + j, value)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegSizes;

    #[test]
    fn skips_groups_that_are_not_ready() {
        let snapshot = Arc::new(SnapshotStore::new(1));
        let storage = Arc::new(RwLock::new(SlaveStorage::default()));
        let maps = vec![MapEntry {
            kind: MapKind::HoldingToHolding,
            group_index: 0,
            master_start_addr: 0,
            slave_start_addr: 0,
            count: 4,
        }];
        let config = TcpSlaveConfig {
            maps,
            reg_sizes: RegSizes::default(),
            ..TcpSlaveConfig::default()
        };
        let projector = SlaveProjector::new(&config, snapshot, storage.clone());
        projector.project_once();
        assert_eq!(storage.read().get_holding(0).unwrap_or(0), 0);
    }

    #[test]
    fn copies_holding_words_once_the_group_is_ready() {
        let snapshot = Arc::new(SnapshotStore::new(1));
        snapshot.write_words(0, &[11, 22, 33, 44]);
        let storage = Arc::new(RwLock::new(SlaveStorage::default()));
        let maps = vec![MapEntry {
            kind: MapKind::HoldingToHolding,
            group_index: 0,
            master_start_addr: 0,
            slave_start_addr: 5,
            count: 4,
        }];
        let config = TcpSlaveConfig {
            maps,
            reg_sizes: RegSizes::default(),
            ..TcpSlaveConfig::default()
        };
        let projector = SlaveProjector::new(&config, snapshot, storage.clone());
        projector.project_once();
        assert_eq!(storage.read().get_holding(5).unwrap(), 11);
        assert_eq!(storage.read().get_holding(8).unwrap(), 44);
    }
}
