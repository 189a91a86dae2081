//! Configuration: typed structs parsed from the flat configuration map
//! interface, plus a TOML convenience loader for `iron-node`
//! (spec.md §6; ambient stack §1 of `SPEC_FULL.md`).

mod loader;
mod map;
mod root;

pub use loader::{load_from_path, parse_toml_str, validate_config};
pub use map::ConfigMap;
pub use root::{BpfConfig, FecContextConfig, OscMapConfig, PathControllerConfig, WeightConfig};
