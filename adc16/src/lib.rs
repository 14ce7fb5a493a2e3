//! Monitor, control, and calibration of the ADC16 front end (HMCAD1511 ADCs behind the CASPER
//! `adc16_controller` gateware).
//!
//! Everything here talks to the hardware through a [`transport::Transport`], which is shared
//! between devices as an `Arc<Mutex<T>>`. Devices only hold a weak pointer to it.

pub mod core;
pub mod prelude;
pub mod snapadc;
pub mod transport;
