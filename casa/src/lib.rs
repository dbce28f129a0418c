//! Computer-aided scenario analysis for basin-simulation projects.
//!
//! Starting from a base-case project deck, this crate explores a
//! multi-dimensional parameter space with design-of-experiments
//! generators, materialises every parameter vector as a mutated deck,
//! drives a pipeline of simulator applications over a batch scheduler,
//! harvests observables, fits polynomial+kriging response surfaces and
//! samples them with Monte-Carlo and Markov-Chain Monte-Carlo solvers for
//! uncertainty quantification, calibration and sensitivity analysis. The
//! [`scenario::Scenario`] type owns one complete workflow.

pub mod app;
pub mod case;
mod convert;
pub mod digger;
pub mod doe;
pub mod error;
pub mod gridmap;
pub mod mc;
pub mod mutate;
pub mod observable;
pub mod parameter;
pub mod project;
pub mod proxy;
pub mod quality;
pub mod runner;
pub mod scenario;
pub mod sensitivity;
pub mod serial;
pub mod space;
