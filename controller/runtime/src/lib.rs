#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use bilrost_controller_core as core;
pub use bilrost_controller_dex as dex;
pub use bilrost_controller_k8s_api as k8s;

mod args;
pub mod controller;
pub mod handler;
pub mod metrics;
mod repository;

pub use self::{args::Args, repository::KubeRepository};
