//! Bilrost controller core
//!
//! The controller secures applications exposed through an ingress by inserting an OIDC
//! authenticating proxy between the ingress and the application's service. This crate holds the
//! domain model and the capabilities the security orchestration is built from:
//!
//! - A [`Backupper`] keeps the ingress' original upstream so it can be restored.
//! - An [`AppRegisterer`] registers the application as an OIDC client on an identity backend; an
//!   [`AppRegistererFactory`] selects the registerer for an [`AuthBackend`].
//! - An [`OidcProvisioner`] creates the proxy and swaps the ingress backend to point at it.
//!
//! ```text
//! [ Ingress ] -> [ App ] -> [ Security ] -> [ Backupper ]
//!                                       \-> [ AppRegisterer ]
//!                                       \-> [ OidcProvisioner ]
//! ```
//!
//! [`Security`] composes these into the secure and rollback sagas. Every step of both sagas is
//! idempotent, so a failed saga is retried by running it again from the top.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authbackend;
pub mod backup;
pub mod model;
pub mod proxy;
pub mod security;

pub use self::{
    authbackend::{AppRegisterer, AppRegistererFactory, OidcApp, OidcAppRegistryData},
    backup::{BackupData, Backupper},
    model::{
        App, AuthBackend, AuthBackendKind, DexBackend, KubernetesIngress, KubernetesService,
        Oauth2ProxySettings, ProxySettings,
    },
    proxy::{OidcProvisioner, OidcProxySettings, UnprovisionSettings},
    security::{AuthBackendRepository, MissingBackup, Security, SecurityService, ServiceTranslator},
};
