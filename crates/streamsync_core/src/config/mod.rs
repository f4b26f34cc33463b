//! Configuration surface for the alignment engine.
//!
//! All tunables are explicit named parameters with documented defaults;
//! nothing is read from the environment or from disk. Callers construct
//! settings in code or deserialize them from whatever store they own.

mod settings;

pub use settings::SyncSettings;
