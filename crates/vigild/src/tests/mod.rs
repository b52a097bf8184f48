//! Test suites for the `vigild` daemon.

mod support;
