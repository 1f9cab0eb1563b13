use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::wire::{self, PARTY_HEADER, PayloadBody};
use super::{CandidateBatch, SignalingChannel, SlotFetch};
use crate::config::RelayClientConfig;
use crate::error::TransportError;
use crate::model::PartyId;

/// Relay client speaking the `pollcall-relay` HTTP API.
#[derive(Clone)]
pub struct HttpSignalingChannel {
    client: Client,
    base: Url,
    party: PartyId,
}

impl HttpSignalingChannel {
    pub fn new(party: PartyId, config: &RelayClientConfig) -> Result<Self, TransportError> {
        let base = Url::parse(&config.base_url)
            .map_err(|err| TransportError::RelayUnreachable(format!("invalid relay url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::RelayUnreachable(format!(
                "relay url {base} cannot carry a path"
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(http_error)?;
        Ok(Self {
            client,
            base,
            party,
        })
    }

    fn endpoint(&self, route: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TransportError::RelayUnreachable("cannot mutate relay url path".into())
            })?;
            segments.pop_if_empty().extend(route);
        }
        Ok(url)
    }

    fn identify(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(PARTY_HEADER, self.party.as_str())
    }

    async fn send(
        &self,
        phase: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, TransportError> {
        tracing::trace!(phase, op = "client.send", state = "start");
        let attempt = self.identify(request).send().await;
        tracing::trace!(
            phase,
            op = "client.send",
            state = "end",
            result = ?attempt.as_ref().map(Response::status)
        );
        attempt.map_err(http_error)
    }

    async fn post_payload(
        &self,
        phase: &'static str,
        route: &[&str],
        payload: &str,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(route)?;
        let body = PayloadBody {
            payload: payload.to_string(),
        };
        let response = self.send(phase, self.client.post(url).json(&body)).await?;
        ensure_success(response.status())
    }

    async fn fetch_slot(
        &self,
        phase: &'static str,
        route: &[&str],
    ) -> Result<SlotFetch, TransportError> {
        let url = self.endpoint(route)?;
        let response = self.send(phase, self.client.get(url)).await?;
        match response.status() {
            StatusCode::OK => decode(response).await,
            StatusCode::NOT_FOUND => Ok(SlotFetch::empty()),
            status => Err(TransportError::Rejected {
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl SignalingChannel for HttpSignalingChannel {
    fn local_party(&self) -> &PartyId {
        &self.party
    }

    async fn send_offer(&self, callee: &PartyId, offer: &str) -> Result<(), TransportError> {
        self.post_payload("send_offer", &wire::offer_route(callee), offer)
            .await
    }

    async fn fetch_offer(&self, caller: &PartyId) -> Result<SlotFetch, TransportError> {
        self.fetch_slot("fetch_offer", &wire::offer_route(caller)).await
    }

    async fn send_answer(&self, caller: &PartyId, answer: &str) -> Result<(), TransportError> {
        self.post_payload("send_answer", &wire::answer_route(caller), answer)
            .await
    }

    async fn fetch_answer(&self, callee: &PartyId) -> Result<SlotFetch, TransportError> {
        self.fetch_slot("fetch_answer", &wire::answer_route(callee)).await
    }

    async fn send_candidate(
        &self,
        receiver: &PartyId,
        candidate: &str,
    ) -> Result<(), TransportError> {
        self.post_payload("send_candidate", &wire::candidates_route(receiver), candidate)
            .await
    }

    async fn fetch_candidates(&self, peer: &PartyId) -> Result<CandidateBatch, TransportError> {
        let url = self.endpoint(&wire::candidates_route(peer))?;
        let response = self
            .send("fetch_candidates", self.client.get(url))
            .await?;
        match response.status() {
            StatusCode::OK => decode(response).await,
            StatusCode::NOT_FOUND => Ok(CandidateBatch::default()),
            status => Err(TransportError::Rejected {
                status: status.as_u16(),
            }),
        }
    }

    async fn clear_call_state(
        &self,
        first: &PartyId,
        second: &PartyId,
    ) -> Result<(), TransportError> {
        // The relay only lets a party clear conversations it belongs to.
        let peer = if first == &self.party { second } else { first };
        let url = self.endpoint(&wire::call_route(peer))?;
        let response = self
            .send("clear_call_state", self.client.delete(url))
            .await?;
        ensure_success(response.status())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let body = response.bytes().await.map_err(http_error)?;
    serde_json::from_slice(&body).map_err(|err| TransportError::Decode(err.to_string()))
}

fn ensure_success(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Rejected {
            status: status.as_u16(),
        })
    }
}

fn http_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::RelayTimeout
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::RelayUnreachable(err.to_string())
    }
}
