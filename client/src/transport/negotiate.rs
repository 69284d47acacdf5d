//! Negotiate step and hub URL handling

use super::ConnectError;
use reqwest::Url;
use serde::Deserialize;

/// Body of a successful `POST {hub}/negotiate` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: Option<String>,
    pub connection_token: Option<String>,
    pub negotiate_version: Option<u32>,
    /// Redirect target (Azure SignalR style)
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// Value to pass as the `id` query parameter when upgrading
    pub fn transport_id(&self) -> Option<&str> {
        self.connection_token
            .as_deref()
            .or(self.connection_id.as_deref())
    }
}

pub fn parse_hub_url(url: &str) -> Result<Url, ConnectError> {
    let parsed = Url::parse(url).map_err(|e| ConnectError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(parsed),
        other => Err(ConnectError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", other),
        }),
    }
}

/// `{hub}/negotiate?negotiateVersion=1`, keeping any existing query
pub fn negotiate_url(hub: &Url) -> Result<Url, ConnectError> {
    let mut url = hub.clone();
    let path = format!("{}/negotiate", hub.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");

    let scheme = match hub.scheme() {
        "ws" => Some("http"),
        "wss" => Some("https"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        set_scheme(&mut url, scheme)?;
    }
    Ok(url)
}

/// Hub URL with a WebSocket scheme and, when given, the `id` query parameter
pub fn websocket_url(hub: &Url, id: Option<&str>) -> Result<Url, ConnectError> {
    let mut url = hub.clone();
    let scheme = match hub.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    set_scheme(&mut url, scheme)?;
    if let Some(id) = id {
        url.query_pairs_mut().append_pair("id", id);
    }
    Ok(url)
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<(), ConnectError> {
    url.set_scheme(scheme).map_err(|_| ConnectError::InvalidUrl {
        url: url.to_string(),
        reason: format!("cannot switch scheme to {}", scheme),
    })
}

/// Run the negotiate step against `hub`
pub async fn negotiate(
    client: &reqwest::Client,
    hub: &Url,
) -> Result<NegotiateResponse, ConnectError> {
    let url = negotiate_url(hub)?;

    let response = client
        .post(url.clone())
        .send()
        .await
        .map_err(|source| ConnectError::Negotiate {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(ConnectError::NegotiateStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let negotiated: NegotiateResponse =
        response
            .json()
            .await
            .map_err(|source| ConnectError::Negotiate {
                url: url.to_string(),
                source,
            })?;

    if let Some(error) = negotiated.error {
        return Err(ConnectError::NegotiateRejected(error));
    }
    if let Some(redirect) = negotiated.url {
        return Err(ConnectError::Redirected(redirect));
    }

    Ok(negotiated)
}
