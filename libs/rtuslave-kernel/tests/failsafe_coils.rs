//! Failsafe coil pulsing, end to end
//!
//! The application enables four coils, arms the pulse driver over a mask of
//! two of them, and the tests observe physical pin images toggling while the
//! logical coil states read back unchanged over the bus.

mod support;

use rtuslave_frame::{testkit, CallbackKind};
use rtuslave_kernel::FailsafeConfig;
use support::Rig;

const COIL_ACCESS: &[CallbackKind] = &[CallbackKind::ReadCoils, CallbackKind::WriteCoils];

const PULSED: FailsafeConfig = FailsafeConfig {
    mask: 0b0011,
    safe_state: 0,
    on_ms: 100,
    off_ms: 100,
};

fn read_coils(rig: &mut Rig, quantity: u16) -> Vec<bool> {
    let response = rig.transact(&testkit::read_request(1, 0x01, 0, quantity));
    testkit::parse_read_bits(&response, 1, 0x01, quantity as usize).expect("coil data")
}

#[test]
fn test_coil_write_read_roundtrip() {
    let mut rig = Rig::new(COIL_ACCESS);

    let request = testkit::write_multiple_coils(1, 0, &[true, true, false, false]);
    let response = rig.transact(&request);
    assert!(testkit::is_ack(&response, 1, 0x0F));

    assert_eq!(read_coils(&mut rig, 4), vec![true, true, false, false]);
    // Unmasked coils drive their pins directly
    assert_eq!(rig.app.borrow().pins, [true, true, false, false]);
}

#[test]
fn test_single_coil_write() {
    let mut rig = Rig::new(COIL_ACCESS);

    let response = rig.transact(&testkit::write_single_coil(1, 2, true));
    assert!(testkit::is_ack(&response, 1, 0x05));
    assert_eq!(read_coils(&mut rig, 4), vec![false, false, true, false]);
}

#[test]
fn test_pulse_toggles_pins_but_not_logical_state() {
    let mut rig = Rig::new(COIL_ACCESS);
    rig.kernel.enable_failsafe(PULSED);
    assert_eq!(rig.kernel.failsafe_mask(), 0b0011);

    // First poll delivers the rising edge and the application caches the mask
    rig.kernel.poll();
    assert_eq!(rig.app.borrow().failsafe_mask, 0b0011);

    // Energize coils 0 and 1 (masked), leave 2 and 3 off
    rig.transact(&testkit::write_multiple_coils(1, 0, &[true, true, false, false]));

    // The write path must not touch masked pins; the pulse path owns them
    rig.clock.advance(100);
    rig.kernel.poll();
    {
        let state = rig.app.borrow();
        assert_eq!(state.coils, [true, true, false, false]);
        // Falling edge at t=100
        assert_eq!(state.pins[0], false);
        assert_eq!(state.pins[1], false);
    }

    rig.clock.advance(100);
    rig.kernel.poll();
    {
        let state = rig.app.borrow();
        // Rising edge at t=200
        assert_eq!(state.pins[0], true);
        assert_eq!(state.pins[1], true);
    }

    // Logical state over the bus is unaffected by pulsing
    assert_eq!(read_coils(&mut rig, 4), vec![true, true, false, false]);
}

#[test]
fn test_logically_off_coils_are_not_pulsed() {
    let mut rig = Rig::new(COIL_ACCESS);
    rig.kernel.enable_failsafe(PULSED);

    // Coil 1 masked but off: the pulse path leaves its pin alone
    rig.transact(&testkit::write_multiple_coils(1, 0, &[true, false, false, false]));

    rig.clock.advance(200);
    rig.kernel.poll();
    let state = rig.app.borrow();
    assert!(!state.pins[1]);
    assert!(!state.pins[2]);
    assert!(!state.pins[3]);
}

#[test]
fn test_masked_coil_write_skips_physical_output() {
    let mut rig = Rig::new(COIL_ACCESS);
    rig.kernel.enable_failsafe(PULSED);
    rig.kernel.poll();

    // Write while the pulse is in its low phase
    rig.clock.advance(100);
    rig.kernel.poll();
    rig.transact(&testkit::write_single_coil(1, 0, true));

    let state = rig.app.borrow();
    assert!(state.coils[0]);
    // Physical output stays with the pulse phase, not the write
    assert!(!state.pins[0]);
}

#[test]
fn test_disabling_failsafe_returns_coils_to_normal_drive() {
    let mut rig = Rig::new(COIL_ACCESS);
    rig.kernel.enable_failsafe(PULSED);
    rig.kernel.poll();

    rig.kernel.disable_failsafe();
    assert_eq!(rig.kernel.failsafe_mask(), 0);

    rig.clock.advance(1_000);
    let edges_before = rig.app.borrow().pulse_edges;
    rig.kernel.poll();
    assert_eq!(rig.app.borrow().pulse_edges, edges_before);
}
