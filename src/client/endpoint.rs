use url::Url;

use crate::client::ClientError;

/// Port the server listens on during local development.
pub const DEV_PORT: u16 = 5000;

/// Derive the websocket endpoint from the page origin.
///
/// Same host as the page; local and LAN hosts are pointed at `dev_port`.
pub fn endpoint_for_origin(origin: &str, dev_port: u16) -> Result<Url, ClientError> {
    let mut url = Url::parse(origin)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    let local = url
        .host_str()
        .is_some_and(|h| h == "localhost" || h == "127.0.0.1" || h.starts_with("192.168."));

    url.set_scheme(scheme)
        .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;
    if local {
        url.set_port(Some(dev_port))
            .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;
    }
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
