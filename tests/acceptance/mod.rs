//! Workspace-level acceptance tests for the VM HAL.

mod common;
mod critical_section_test;
mod idle_test;
mod lifecycle_test;
mod tick_test;
mod timeslice_test;
