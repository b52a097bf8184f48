//! Behavioural suites for status tracking.

mod crash_detection_behaviour;
