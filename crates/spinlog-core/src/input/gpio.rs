//! Raspberry Pi GPIO backend (feature `rpi`).
//!
//! ## Hardware
//!
//! Pedal reed switch and start/stop button are wired active-high with the
//! internal pull-up enabled; each fires an asynchronous rising-edge
//! interrupt whose callback sets the channel's [`EdgeLatch`](super::EdgeLatch).
//! The indicator LED is a plain push-pull output, low at setup.
//!
//! Pin numbers are BCM numbers. All setup happens in [`GpioBoard::open`]: if
//! the GPIO character device cannot be opened or a pin is busy, the error is
//! raised there as [`InputError::HardwareUnavailable`], never while polling.
//!
//! Host builds without the feature keep the same API; `open` always fails.

use crate::error::InputError;
use crate::input::Shutdown;
use crate::storage::GpioConfig;

pub use imp::{GpioIndicator, GpioInput};

/// Entry point for the real hardware.
pub struct GpioBoard;

impl GpioBoard {
    /// Configure the pins and register edge interrupts.
    pub fn open(
        config: &GpioConfig,
        shutdown: Shutdown,
    ) -> Result<(GpioInput, GpioIndicator), InputError> {
        imp::open(config, shutdown)
    }
}

#[cfg(feature = "rpi")]
mod imp {
    use std::sync::Arc;
    use std::time::Duration;

    use rppal::gpio::{Event, Gpio, InputPin, OutputPin, Trigger};
    use tracing::{debug, info};

    use crate::error::InputError;
    use crate::input::{Channel, Indicator, InputSource, LatchSet, Shutdown, Wait};
    use crate::storage::GpioConfig;

    const CHANNELS: [Channel; 2] = [Channel::Pedal, Channel::StartStop];

    pub struct GpioInput {
        latches: LatchSet,
        shutdown: Shutdown,
        // Interrupts stay registered for as long as the pins are alive.
        _pedal: InputPin,
        _start_stop: InputPin,
    }

    pub struct GpioIndicator {
        pin: OutputPin,
    }

    fn unavailable(what: &str, err: rppal::gpio::Error) -> InputError {
        InputError::HardwareUnavailable(format!("{what}: {err}"))
    }

    fn edge_input(
        gpio: &Gpio,
        bcm: u8,
        channel: Channel,
        latches: &LatchSet,
    ) -> Result<InputPin, InputError> {
        let mut pin = gpio
            .get(bcm)
            .map_err(|e| unavailable(&format!("{channel} pin {bcm}"), e))?
            .into_input_pullup();
        let latch = Arc::clone(latches.get(channel)?);
        pin.set_async_interrupt(Trigger::RisingEdge, None, move |_event: Event| {
            latch.trigger();
        })
        .map_err(|e| unavailable(&format!("{channel} interrupt on pin {bcm}"), e))?;
        debug!(%channel, pin = bcm, "edge detection armed");
        Ok(pin)
    }

    pub(super) fn open(
        config: &GpioConfig,
        shutdown: Shutdown,
    ) -> Result<(GpioInput, GpioIndicator), InputError> {
        info!("setting up GPIO");
        let gpio = Gpio::new().map_err(|e| unavailable("GPIO controller", e))?;
        let latches = LatchSet::new(Duration::from_millis(config.debounce_ms), &CHANNELS);

        let pedal = edge_input(&gpio, config.pedal_sensor_pin, Channel::Pedal, &latches)?;
        let start_stop = edge_input(&gpio, config.start_stop_pin, Channel::StartStop, &latches)?;
        let led = gpio
            .get(config.indicator_pin)
            .map_err(|e| unavailable(&format!("indicator pin {}", config.indicator_pin), e))?
            .into_output_low();

        Ok((
            GpioInput {
                latches,
                shutdown,
                _pedal: pedal,
                _start_stop: start_stop,
            },
            GpioIndicator { pin: led },
        ))
    }

    impl InputSource for GpioInput {
        fn wait_for_any(
            &mut self,
            channels: &[Channel],
            poll_interval: Duration,
        ) -> Result<Wait, InputError> {
            self.latches.wait(channels, poll_interval, &self.shutdown)
        }

        fn discard(&mut self, channel: Channel) -> Result<(), InputError> {
            self.latches.get(channel)?.take();
            Ok(())
        }
    }

    impl Indicator for GpioIndicator {
        fn set(&mut self, on: bool) {
            if on {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
        }
    }

    impl Drop for GpioIndicator {
        fn drop(&mut self) {
            self.pin.set_low();
        }
    }
}

#[cfg(not(feature = "rpi"))]
mod imp {
    use std::convert::Infallible;
    use std::time::Duration;

    use crate::error::InputError;
    use crate::input::{Channel, Indicator, InputSource, Shutdown, Wait};
    use crate::storage::GpioConfig;

    pub struct GpioInput {
        never: Infallible,
    }

    pub struct GpioIndicator {
        never: Infallible,
    }

    pub(super) fn open(
        _config: &GpioConfig,
        _shutdown: Shutdown,
    ) -> Result<(GpioInput, GpioIndicator), InputError> {
        Err(InputError::HardwareUnavailable(
            "built without the `rpi` feature; use --simulate".into(),
        ))
    }

    impl InputSource for GpioInput {
        fn wait_for_any(&mut self, _: &[Channel], _: Duration) -> Result<Wait, InputError> {
            match self.never {}
        }

        fn discard(&mut self, _: Channel) -> Result<(), InputError> {
            match self.never {}
        }
    }

    impl Indicator for GpioIndicator {
        fn set(&mut self, _: bool) {
            match self.never {}
        }
    }
}
