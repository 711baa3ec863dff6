//! End-to-end scenarios spanning more than one module: a poll group's full
//! success/failure lifecycle, TCP slave address validation leaving the
//! arena untouched, and MQTT skipping groups that never became ready.

use std::sync::Arc;

use modbus_gateway::config::{MapEntry, MapKind, RegSizes, TcpSlaveConfig};
use modbus_gateway::projector::SlaveProjector;
use modbus_gateway::snapshot::SnapshotStore;
use modbus_gateway::tcp_slave::SlaveStorage;
use parking_lot::RwLock;
use rmodbus::server::context::ModbusContext;

#[test]
fn a_successful_poll_becomes_visible_to_the_projector_and_stays_until_overwritten() {
    let snapshot = Arc::new(SnapshotStore::new(1));
    assert!(!snapshot.is_ready(0));

    snapshot.write_words(0, &[100, 200, 300, 400]);
    assert!(snapshot.is_ready(0));

    let storage = Arc::new(RwLock::new(SlaveStorage::default()));
    let config = TcpSlaveConfig {
        maps: vec![MapEntry {
            kind: MapKind::HoldingToHolding,
            group_index: 0,
            master_start_addr: 0,
            slave_start_addr: 0,
            count: 4,
        }],
        reg_sizes: RegSizes::default(),
        ..TcpSlaveConfig::default()
    };
    let projector = SlaveProjector::new(&config, snapshot.clone(), storage.clone());
    projector.project_once();

    assert_eq!(storage.read().get_holding(0).unwrap(), 100);
    assert_eq!(storage.read().get_holding(3).unwrap(), 400);
}

#[test]
fn a_failed_poll_clears_readiness_and_the_projector_then_skips_it() {
    let snapshot = Arc::new(SnapshotStore::new(1));
    snapshot.write_words(0, &[1, 2]);
    snapshot.mark_not_ready(0);

    let storage = Arc::new(RwLock::new(SlaveStorage::default()));
    let config = TcpSlaveConfig {
        maps: vec![MapEntry {
            kind: MapKind::HoldingToHolding,
            group_index: 0,
            master_start_addr: 0,
            slave_start_addr: 0,
            count: 2,
        }],
        reg_sizes: RegSizes::default(),
        ..TcpSlaveConfig::default()
    };
    let projector = SlaveProjector::new(&config, snapshot, storage.clone());
    projector.project_once();

    // projector never ran for this group, so the arena is still at its
    // zero-initialized default rather than the stale pre-failure values
    assert_eq!(storage.read().get_holding(0).unwrap(), 0);
}

#[test]
fn tcp_dispatch_rejects_an_out_of_range_holding_read_without_touching_the_arena() {
    use rmodbus::ModbusProto;

    let mut storage = SlaveStorage::default();
    storage.set_holding(0, 0xAAAA).unwrap();

    let reg_sizes = RegSizes {
        registers: 10,
        ..RegSizes::default()
    };

    // build a "read holding registers" request for address 20, count 1 --
    // out of the 10-register configured range, though well within the
    // arena's static capacity.
    let mut request = rmodbus::client::ModbusRequest::new(123, ModbusProto::TcpUdp);
    let mut raw = Vec::new();
    request.generate_get_holdings(20, 1, &mut raw).unwrap();

    let response =
        modbus_gateway::tcp_slave::dispatch(123, &raw, &mut storage, &reg_sizes).unwrap();
    assert!(response.is_some());
    let response = response.unwrap();
    // exception responses set the high bit of the function code and carry
    // exception code 0x02 (illegal data address)
    assert_eq!(response[7] & 0x80, 0x80);
    assert_eq!(response[8], 0x02);

    // address 0 was never touched by the rejected request
    assert_eq!(storage.get_holding(0).unwrap(), 0xAAAA);
}
