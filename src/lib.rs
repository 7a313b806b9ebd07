//! Campaign orchestration for building-energy simulations: template sweeps,
//! URBANopt invocation, REopt job dispatch, and results aggregation.

pub mod config;
pub mod domain;
pub mod report;
pub mod reopt;
pub mod results;
pub mod scenario;
pub mod simulator;
pub mod sweep;
pub mod telemetry;
pub mod urdb;
