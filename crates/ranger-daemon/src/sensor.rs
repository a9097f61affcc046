//! Sensor backend construction.
//!
//! Each backend yields a [`CycleController`] whose trigger pin drives either
//! the simulated sensor or a real GPIO line, plus the alarm thread backing
//! the echo timeout. Pending alarms hold the capture, which holds the alarm
//! service, so the rig stops the alarm thread explicitly on shutdown or drop.

use anyhow::{Context, Result};
use embedded_hal::digital::OutputPin;
use ranger_common::config::RangerConfig;
use ranger_common::time::duration_to_us;
use ranger_core::{
    ActiveFlag, AlarmService, CycleController, EdgeCapture, HostDelay, SimulatedSensor,
    SystemClock, ThreadAlarms,
};
use std::sync::Arc;
use tracing::info;

/// Controller plus the services it depends on.
pub struct SensorRig<P: OutputPin> {
    /// Cycle controller driving the trigger pin.
    pub controller: CycleController<P, HostDelay>,
    alarms: Arc<ThreadAlarms>,
}

impl<P: OutputPin> SensorRig<P> {
    /// Stop the alarm thread; pending echo edges and timeouts are discarded.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.controller.stop() {
            tracing::warn!(error = %e, "Failed to park trigger line");
        }
        self.alarms.stop();
    }
}

impl<P: OutputPin> Drop for SensorRig<P> {
    fn drop(&mut self) {
        self.alarms.stop();
    }
}

fn capture_for(config: &RangerConfig, alarms: Arc<ThreadAlarms>) -> Arc<EdgeCapture> {
    EdgeCapture::new(
        Arc::new(SystemClock::new()),
        alarms,
        duration_to_us(config.timing.echo_timeout),
    )
}

/// Build a rig around the in-process simulated sensor.
///
/// # Errors
///
/// Returns an error if the alarm thread cannot start or the controller
/// rejects the configuration.
pub fn simulated(config: &RangerConfig, active: ActiveFlag) -> Result<SensorRig<SimulatedSensor>> {
    let alarms = Arc::new(ThreadAlarms::start().context("Failed to start alarm thread")?);
    let capture = capture_for(config, Arc::clone(&alarms));

    let sensor_alarms: Arc<dyn AlarmService> = alarms.clone();
    let sensor = SimulatedSensor::new(Arc::clone(&capture), sensor_alarms, &config.simulation);

    info!(
        distance_cm = config.simulation.distance_cm,
        latency_us = config.simulation.response_latency.as_micros(),
        drop_every = config.simulation.drop_every,
        "Using simulated sensor"
    );

    let controller = CycleController::new(sensor, HostDelay::new(), capture, active, config)
        .context("Failed to create cycle controller")?;
    Ok(SensorRig { controller, alarms })
}

/// Raspberry Pi GPIO backend.
#[cfg(feature = "gpio")]
pub mod gpio {
    use super::{capture_for, SensorRig};
    use anyhow::{Context, Result};
    use embedded_hal::digital::{ErrorType, OutputPin};
    use ranger_common::config::RangerConfig;
    use ranger_core::{ActiveFlag, CycleController, EdgeDetector, HostDelay, ThreadAlarms};
    use rppal::gpio::{Gpio, InputPin, Level, Trigger};
    use std::convert::Infallible;
    use std::sync::Arc;
    use tracing::info;

    /// Trigger line on a GPIO output.
    ///
    /// Owns the echo input too, so the interrupt stays registered for as
    /// long as the controller lives.
    pub struct GpioTrigger {
        pin: rppal::gpio::OutputPin,
        _echo: InputPin,
    }

    impl ErrorType for GpioTrigger {
        type Error = Infallible;
    }

    impl OutputPin for GpioTrigger {
        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.pin.set_high();
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.pin.set_low();
            Ok(())
        }
    }

    /// Build a rig on the configured BCM pins.
    ///
    /// # Errors
    ///
    /// Returns an error if the GPIO peripheral or pins are unavailable.
    pub fn rig(config: &RangerConfig, active: ActiveFlag) -> Result<SensorRig<GpioTrigger>> {
        let alarms = Arc::new(ThreadAlarms::start().context("Failed to start alarm thread")?);
        let capture = capture_for(config, Arc::clone(&alarms));

        let gpio = Gpio::new().context("Failed to open GPIO peripheral")?;
        let trigger = gpio
            .get(config.sensor.trigger_pin)
            .with_context(|| format!("Failed to claim trigger pin {}", config.sensor.trigger_pin))?
            .into_output_low();
        let mut echo = gpio
            .get(config.sensor.echo_pin)
            .with_context(|| format!("Failed to claim echo pin {}", config.sensor.echo_pin))?
            .into_input_pulldown();

        let edge_capture = Arc::clone(&capture);
        let mut detector = EdgeDetector::new();
        echo.set_async_interrupt(Trigger::Both, move |level: Level| {
            let at_us = edge_capture.now_us();
            if let Some(event) = detector.sample(level == Level::High, at_us) {
                edge_capture.on_edge(event);
            }
        })
        .context("Failed to register echo interrupt")?;

        info!(
            trigger_pin = config.sensor.trigger_pin,
            echo_pin = config.sensor.echo_pin,
            "Using GPIO sensor"
        );

        let pin = GpioTrigger {
            pin: trigger,
            _echo: echo,
        };
        let controller = CycleController::new(pin, HostDelay::new(), capture, active, config)
            .context("Failed to create cycle controller")?;
        Ok(SensorRig { controller, alarms })
    }
}
