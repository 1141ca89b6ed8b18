// canstim/src/dut.rs
//
// Interface to the device under test.

//! Interface of the controller under test, as the core relies on it.
//!
//! Register-level drivers for concrete controllers implement this trait
//! outside the core. The operations cover what compliance testing needs:
//! configuration, frame I/O, and direct access to the fault-confinement
//! state and error counters.

use crate::frame::Frame;
use crate::timing::BitTiming;

/// Fault-confinement state of a CAN node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultState {
    /// Error active: participates fully, sends active error flags.
    ErrorActive,
    /// Error passive: sends passive error flags, obeys suspend time.
    ErrorPassive,
    /// Bus off: no participation until reintegration.
    BusOff,
    /// State could not be read.
    Invalid,
}

/// Secondary sample point configuration for the CAN FD data phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SspKind {
    /// Secondary sample point disabled.
    Disabled,
    /// Fixed offset only.
    Offset,
    /// Measured transceiver delay plus offset.
    MeasuredPlusOffset,
}

/// Protocol version a controller can be put into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CanVersion {
    /// Classical CAN 2.0 only.
    Can20,
    /// CAN FD tolerant (acknowledges, never transmits FD).
    CanFdTolerant,
    /// Full CAN FD support.
    CanFdEnabled,
}

/// A device under test, abstracted over its register interface.
pub trait DutAdapter {
    /// Hard-resets the controller.
    fn reset(&mut self);

    /// Enables the controller (joins the bus after integration).
    fn enable(&mut self);

    /// Disables the controller.
    fn disable(&mut self);

    /// Programs nominal and data bit timing.
    fn configure_bit_timing(&mut self, nominal: BitTiming, data: BitTiming);

    /// Programs the secondary sample point.
    fn configure_ssp(&mut self, ssp: SspKind, offset: u32);

    /// Selects the protocol version.
    fn set_can_version(&mut self, version: CanVersion);

    /// Queues a frame for transmission.
    fn send_frame(&mut self, frame: &Frame);

    /// Reads the next received frame.
    fn read_frame(&mut self) -> Frame;

    /// Whether a received frame is waiting.
    fn has_rx_frame(&mut self) -> bool;

    /// Receive error counter.
    fn rec(&mut self) -> u16;

    /// Transmit error counter.
    fn tec(&mut self) -> u16;

    /// Overwrites the receive error counter.
    fn set_rec(&mut self, value: u16);

    /// Overwrites the transmit error counter.
    fn set_tec(&mut self, value: u16);

    /// Reads the fault-confinement state.
    fn fault_state(&mut self) -> FaultState;

    /// Forces a fault-confinement state.
    fn set_fault_state(&mut self, state: FaultState);

    /// Asks a bus-off controller to reintegrate.
    fn send_reintegration_request(&mut self);
}
