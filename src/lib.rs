//! llapbridge: LLAP serial radio to cloud MQTT bridge
//!
//! Reads the fixed-width LLAP frames a sensor radio writes to a serial port,
//! turns them into typed readings and publishes each one to the device
//! telemetry topic of a cloud MQTT bridge, authenticated with a short-lived
//! signed token.
//!
//! ## Modules
//!
//! * `config`: TOML configuration: logger, serial port, LLAP normalisation
//!   and the transport section defined by `llapbridge-mqtt`. Validated with
//!   the `validator` crate.
//!
//! * `core`: Runtime components:
//!   - LLAP frame assembly, decoding and value normalisation
//!   - Byte sources (serial port)
//!   - The bridge driving the pipeline and spawning publishes
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.

pub mod config;
pub mod core;
pub mod logger;
