//! End-to-end scenarios: the command stack driving the simulated bus.

use ethercat_core::command::{
    execute_read, execute_read_u16, execute_write_u16, CommandFramer, ExecuteOptions, Multiplexer,
};
use ethercat_core::eeprom::Eeprom;
use ethercat_core::error::CommandError;
use ethercat_core::frame::DatagramAddress;
use ethercat_core::register;
use ethercat_core::sim::{Bus, SimSlave};

fn single_slave_framer() -> CommandFramer<Bus> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut bus = Bus::new();
    bus.add_slave(SimSlave::new());
    CommandFramer::new(bus)
}

#[test]
fn register_read_with_matching_working_counter() {
    let mut framer = single_slave_framer();
    let data = execute_read(
        &mut framer,
        DatagramAddress::positional(0),
        4,
        1,
        ExecuteOptions::default(),
    )
    .unwrap();
    // ET1100 signature: type 0x11, revision 0x00, build 0x0002
    assert_eq!(data, vec![0x11, 0x00, 0x02, 0x00]);
}

#[test]
fn missed_slave_surfaces_a_working_counter_error() {
    let mut framer = single_slave_framer();
    let err = execute_read(
        &mut framer,
        DatagramAddress::positional(1),
        4,
        1,
        ExecuteOptions::default(),
    )
    .unwrap_err();
    match err {
        CommandError::WkcMismatch { want, have, .. } => {
            assert_eq!(want, 1);
            assert_eq!(have, 0);
        }
        other => panic!("expected a working counter error, got {other}"),
    }
}

#[test]
fn station_address_configures_fixed_addressing() {
    let mut framer = single_slave_framer();

    let mut addr = DatagramAddress::positional(0);
    addr.set_offset(register::CONFIGURED_STATION_ADDRESS);
    execute_write_u16(&mut framer, addr, 0x1001, 1, ExecuteOptions::default()).unwrap();

    let mut fixed = DatagramAddress::fixed(0x1001);
    fixed.set_offset(register::ESC_TYPE);
    let esc_type = execute_read(&mut framer, fixed, 1, 1, ExecuteOptions::default()).unwrap();
    assert_eq!(esc_type, vec![0x11]);
}

#[test]
fn eeprom_words_read_back_the_default_fill() {
    let framer = single_slave_framer();
    let mut eeprom = Eeprom::new(framer, DatagramAddress::positional(0)).unwrap();

    assert_eq!(eeprom.read_word(0).unwrap(), 0xee00);
    assert_eq!(eeprom.read_word(1).unwrap(), 0xee01);
    assert_eq!(eeprom.read_word(3).unwrap(), 0xee03);

    eeprom.close();
    assert!(matches!(
        eeprom.read_word(0),
        Err(ethercat_core::eeprom::EepromError::Closed)
    ));
}

#[test]
fn broadcast_counts_every_slave() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut bus = Bus::new();
    for _ in 0..4 {
        bus.add_slave(SimSlave::new());
    }
    let mut framer = CommandFramer::new(bus);

    let value = execute_read_u16(
        &mut framer,
        DatagramAddress::broadcast(),
        4,
        ExecuteOptions::default(),
    )
    .unwrap();
    assert_eq!(value, 0x0011);
}

#[test]
fn producers_share_one_bus_cycle_through_the_multiplexer() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let _ = env_logger::builder().is_test(true).try_init();
    let mut bus = Bus::new();
    bus.add_slave(SimSlave::new());
    let framer = CommandFramer::new(bus);

    let mux = Multiplexer::new(framer);
    let finished = Arc::new(AtomicUsize::new(0));

    // one producer walks the EEPROM while the other polls a register
    let eeprom_channel = mux.open_commander().unwrap();
    let finished_eeprom = finished.clone();
    let eeprom_worker = std::thread::spawn(move || {
        let mut eeprom = Eeprom::new(eeprom_channel, DatagramAddress::positional(0)).unwrap();
        let words: Vec<u16> = (0..3).map(|i| eeprom.read_word(i).unwrap()).collect();
        finished_eeprom.fetch_add(1, Ordering::SeqCst);
        words
    });

    let mut poll_channel = mux.open_commander().unwrap();
    let finished_poll = finished.clone();
    let poll_worker = std::thread::spawn(move || {
        let mut values = Vec::new();
        for _ in 0..8 {
            values.push(
                execute_read_u16(
                    &mut poll_channel,
                    DatagramAddress::positional(0),
                    1,
                    ExecuteOptions::default(),
                )
                .unwrap(),
            );
        }
        finished_poll.fetch_add(1, Ordering::SeqCst);
        values
    });

    // drive barriers until both producers are done
    while finished.load(Ordering::SeqCst) < 2 {
        mux.cycle().unwrap();
    }

    assert_eq!(eeprom_worker.join().unwrap(), vec![0xee00, 0xee01, 0xee02]);
    let polled = poll_worker.join().unwrap();
    assert!(polled.iter().all(|&v| v == 0x0011));
}
