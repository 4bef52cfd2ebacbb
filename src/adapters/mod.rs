//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements         | Connects to                    |
//! |---------------|--------------------|--------------------------------|
//! | `config_file` | ConfigPort         | JSON file on disk              |
//! | `generation`  | GenerationAdapter  | External generator process     |
//! | `log_sink`    | EventSink          | `log` facade                   |
//! | `printer`     | PrintAdapter       | ESC/POS thermal printer        |
//! | `themes`      | ThemeResolver      | Tag → theme JSON table         |
//! | `time`        | Clock              | `std::time::Instant`           |
//!
//! The device link adapters live in [`crate::link`]; the simulated
//! counterparts in [`crate::sim`].

pub mod config_file;
pub mod generation;
pub mod log_sink;
pub mod printer;
pub mod themes;
pub mod time;
