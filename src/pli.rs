// canstim/src/pli.rs
//
// Interface to the simulator-side CAN agent.

//! Interface of the simulator bridge that consumes test sequences.
//!
//! The real implementation lives on the HDL side of the test bench (a PLI
//! process feeding the CAN agent's driver and monitor FIFOs); the core only
//! needs the operations below. Tests implement the trait with an in-memory
//! recorder to check what a simulator would be told to do.

use crate::flags::BitValue;
use std::time::Duration;

/// Event that arms the monitor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorTrigger {
    /// Start monitoring the moment the driver starts.
    DriverStart,
    /// Start monitoring on a falling edge of the DUT's TX pin.
    TxFalling,
}

/// The simulator-side CAN agent, as seen from a test.
///
/// Driver items are replayed onto the DUT's RX pin; monitor items are
/// checked against its TX pin, sampled every `sample_period`.
pub trait PliBridge {
    /// Queues one driver item.
    fn driver_push_item(&mut self, value: BitValue, duration: Duration, message: Option<&str>);

    /// Queues one monitor item.
    fn monitor_push_item(
        &mut self,
        value: BitValue,
        duration: Duration,
        sample_period: Duration,
        message: Option<&str>,
    );

    /// Starts replaying queued driver items.
    fn driver_start(&mut self);

    /// Blocks until the driver FIFO has drained.
    fn driver_wait_finish(&mut self);

    /// Discards queued driver items.
    fn driver_flush(&mut self);

    /// Stops the driver.
    fn driver_stop(&mut self);

    /// Arms the monitor.
    fn monitor_start(&mut self);

    /// Blocks until the monitor FIFO has drained.
    fn monitor_wait_finish(&mut self);

    /// Discards queued monitor items.
    fn monitor_flush(&mut self);

    /// Stops the monitor.
    fn monitor_stop(&mut self);

    /// Selects the event that arms the monitor.
    fn monitor_set_trigger(&mut self, trigger: MonitorTrigger);

    /// Tells the monitor how late the DUT samples its RX pin, so checks
    /// line up with the DUT's view of the bus.
    fn monitor_set_input_delay(&mut self, delay: Duration);

    /// Whether the test controller waits for the monitor before evaluating.
    fn set_wait_for_monitor(&mut self, wait: bool);

    /// Whether every monitored item matched.
    fn check_result(&mut self) -> bool;
}
