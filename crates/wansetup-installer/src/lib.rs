//! Extraction, handoff, and copy-payload driver for the wansetup
//! installer. Built on `wansetup-core` for the wire/envelope/package
//! codecs; owns the process-level state machine that neither the codec
//! nor the CLI facade should know about.

pub mod copy;
pub mod descriptor;
pub mod driver;

pub use descriptor::SetupDescriptor;
pub use driver::{
    extract, load_descriptor, register_setup, run_setup_async, spawn_child, PostSetupCommand,
    RunSetupHandle, Setup, SpawnOutcome,
};
