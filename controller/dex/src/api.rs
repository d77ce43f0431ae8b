//! A client for the subset of Dex's gRPC API (`api.Dex`) used to manage OAuth2 clients.

use anyhow::{Context, Result};
use http::uri::PathAndQuery;
use std::time::Duration;
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    transport::{Channel, Endpoint},
};

#[cfg(test)]
use mockall::automock;

const CREATE_CLIENT: &str = "/api.Dex/CreateClient";
const DELETE_CLIENT: &str = "/api.Dex/DeleteClient";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, PartialEq, prost::Message)]
pub struct Client {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub secret: String,
    #[prost(string, repeated, tag = "3")]
    pub redirect_uris: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub trusted_peers: Vec<String>,
    #[prost(bool, tag = "5")]
    pub public: bool,
    #[prost(string, tag = "6")]
    pub name: String,
    #[prost(string, tag = "7")]
    pub logo_url: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateClientReq {
    #[prost(message, optional, tag = "1")]
    pub client: Option<Client>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateClientResp {
    #[prost(bool, tag = "1")]
    pub already_exists: bool,
    #[prost(message, optional, tag = "2")]
    pub client: Option<Client>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteClientReq {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteClientResp {
    #[prost(bool, tag = "1")]
    pub not_found: bool,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait DexApi: Send + Sync {
    /// Creates the client. An existing client with the same ID is left untouched.
    async fn create_client(&self, client: Client) -> Result<CreateClientResp>;

    async fn delete_client(&self, id: &str) -> Result<DeleteClientResp>;
}

#[derive(Clone, Debug)]
pub struct GrpcDexApi {
    grpc: Grpc<Channel>,
}

// === impl GrpcDexApi ===

impl GrpcDexApi {
    /// Builds a client for the API at `addr`. The connection is established on first use.
    pub fn connect_lazy(addr: &str) -> Result<Self> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let channel = Endpoint::from_shared(uri)
            .with_context(|| format!("invalid Dex API address {addr}"))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .connect_lazy();
        Ok(Self {
            grpc: Grpc::new(channel),
        })
    }
}

#[async_trait::async_trait]
impl DexApi for GrpcDexApi {
    async fn create_client(&self, client: Client) -> Result<CreateClientResp> {
        let mut grpc = self.grpc.clone();
        grpc.ready().await.context("Dex API is not ready")?;
        let rsp = grpc
            .unary(
                tonic::Request::new(CreateClientReq {
                    client: Some(client),
                }),
                PathAndQuery::from_static(CREATE_CLIENT),
                ProstCodec::default(),
            )
            .await?;
        Ok(rsp.into_inner())
    }

    async fn delete_client(&self, id: &str) -> Result<DeleteClientResp> {
        let mut grpc = self.grpc.clone();
        grpc.ready().await.context("Dex API is not ready")?;
        let rsp = grpc
            .unary(
                tonic::Request::new(DeleteClientReq { id: id.to_string() }),
                PathAndQuery::from_static(DELETE_CLIENT),
                ProstCodec::default(),
            )
            .await?;
        Ok(rsp.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn create_request_wire_format() {
        let req = CreateClientReq {
            client: Some(Client {
                id: "a".to_string(),
                redirect_uris: vec!["b".to_string()],
                ..Default::default()
            }),
        };
        // client (field 1, len 6) { id (field 1) "a", redirect_uris (field 3) "b" }
        assert_eq!(
            req.encode_to_vec(),
            vec![0x0a, 0x06, 0x0a, 0x01, b'a', 0x1a, 0x01, b'b']
        );
    }

    #[test]
    fn rejects_invalid_address() {
        assert!(GrpcDexApi::connect_lazy("dex api:5557").is_err());
    }
}
