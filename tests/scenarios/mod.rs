//! Scenario tests for the echo ranger.
//!
//! Most scenarios run on a virtual timebase (`ManualClock` + `VirtualAlarms`)
//! and are fully deterministic. The `realtime` scenarios use the alarm
//! thread and wall-clock delays, and allow for scheduling jitter.

mod command_gate;
mod common;
mod config_file;
mod echo_capture;
mod realtime;
