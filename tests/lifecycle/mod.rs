//! Behavioural coverage for the lifecycle manager.

mod bdd_steps;
mod scenarios;
mod test_helpers;
