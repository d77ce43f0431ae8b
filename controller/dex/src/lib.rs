//! Registers apps as OIDC clients on [Dex](https://dexidp.io).

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod api;
mod factory;
mod registry;

pub use self::{
    factory::DexRegistererFactory,
    registry::{secret_name, DexAppRegisterer, CLIENT_SECRET_KEY},
};
