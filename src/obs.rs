//! Handles communication with OBS through obs-websocket (protocol version 5).

use std::{
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use anyhow::Context;
use base64::Engine;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tungstenite::{client::IntoClientRequest, Message, WebSocket};

/// The settings object of an OBS input.
pub(crate) type Settings = serde_json::Map<String, Value>;

/// The RPC version spoken by this client.
const RPC_VERSION: u32 = 1;

/// Opcodes of the messages that are used.
mod op {
    pub(super) const HELLO: u8 = 0;
    pub(super) const IDENTIFY: u8 = 1;
    pub(super) const IDENTIFIED: u8 = 2;
    pub(super) const REQUEST: u8 = 6;
    pub(super) const REQUEST_RESPONSE: u8 = 7;
}

/// Parameters of a screenshot request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScreenshotRequest<'a> {
    /// The source to take a screenshot of.
    pub(crate) source_name: &'a str,
    /// The image format, e.g. `png`.
    pub(crate) format: &'a str,
    /// The width the screenshot is scaled to.
    pub(crate) width: u32,
    /// The height the screenshot is scaled to.
    pub(crate) height: u32,
    /// The compression quality, `-1` for the format default.
    pub(crate) quality: i32,
}

/// The requests the capture loop makes to OBS.
pub(crate) trait ObsApi {
    /// Returns the settings of the given input.
    fn get_input_settings(&mut self, input_name: &str) -> anyhow::Result<Settings>;

    /// Takes a screenshot and returns it base64 encoded, possibly as a data URI.
    fn get_source_screenshot(&mut self, request: &ScreenshotRequest<'_>)
        -> anyhow::Result<String>;

    /// Updates the settings of the given input.
    ///
    /// With `overlay` the given settings are merged into the existing ones.
    fn set_input_settings(
        &mut self,
        input_name: &str,
        settings: Settings,
        overlay: bool,
    ) -> anyhow::Result<()>;
}

/// A single obs-websocket message.
#[derive(Debug, Deserialize)]
struct Envelope {
    /// The opcode.
    op: u8,
    /// The payload.
    d: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    obs_web_socket_version: Option<String>,
    rpc_version: u32,
    authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
struct AuthChallenge {
    challenge: String,
    salt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    request_id: String,
    request_status: RequestStatus,
    #[serde(default)]
    response_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    result: bool,
    code: u32,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputSettingsResponse {
    input_settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotResponse {
    image_data: String,
}

/// Builds a message with the given opcode and payload.
fn envelope(op: u8, d: Value) -> Value {
    json!({ "op": op, "d": d })
}

/// Computes the authentication string for the given password and challenge.
pub(crate) fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    let secret = engine.encode(Sha256::digest(format!("{password}{salt}")));
    engine.encode(Sha256::digest(format!("{secret}{challenge}")))
}

/// A blocking obs-websocket connection.
pub(crate) struct ObsClient {
    /// The underlying websocket.
    socket: WebSocket<TcpStream>,
    /// The id of the last request that was sent.
    last_request_id: u64,
}

impl ObsClient {
    /// Connects to OBS and authenticates with the given password.
    ///
    /// `timeout` bounds connecting as well as every single read and write.
    pub(crate) fn connect(
        host: &str,
        port: u16,
        password: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let stream = connect_tcp(host, port, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let url = if host.contains(':') {
            format!("ws://[{host}]:{port}")
        } else {
            format!("ws://{host}:{port}")
        };
        let (socket, _) = tungstenite::client(url.as_str().into_client_request()?, stream)
            .map_err(|err| anyhow::anyhow!("websocket handshake with {url} failed: {err}"))?;

        let mut client = ObsClient {
            socket,
            last_request_id: 0,
        };
        client.identify(password)?;

        Ok(client)
    }

    /// Performs the `Hello`/`Identify` exchange.
    fn identify(&mut self, password: &str) -> anyhow::Result<()> {
        let message = self.read_envelope()?;
        if message.op != op::HELLO {
            anyhow::bail!("expected Hello from OBS, got opcode {}", message.op);
        }
        let hello: Hello = serde_json::from_value(message.d).context("malformed Hello")?;
        debug!(
            "obs-websocket {} (rpc version {})",
            hello.obs_web_socket_version.as_deref().unwrap_or("<unknown>"),
            hello.rpc_version
        );

        let mut identify = json!({
            "rpcVersion": RPC_VERSION,
            "eventSubscriptions": 0,
        });
        if let Some(AuthChallenge { challenge, salt }) = &hello.authentication {
            identify["authentication"] = Value::from(auth_response(password, salt, challenge));
        }
        self.send(op::IDENTIFY, identify)?;

        let message = self.read_envelope()?;
        if message.op != op::IDENTIFIED {
            anyhow::bail!("expected Identified from OBS, got opcode {}", message.op);
        }

        Ok(())
    }

    /// Sends a message.
    fn send(&mut self, op: u8, d: Value) -> anyhow::Result<()> {
        self.socket
            .send(Message::Text(envelope(op, d).to_string()))?;
        Ok(())
    }

    /// Reads the next text message, skipping control frames.
    fn read_envelope(&mut self) -> anyhow::Result<Envelope> {
        loop {
            match self.socket.read()? {
                Message::Text(text) => {
                    return serde_json::from_str(&text).context("malformed message from OBS")
                }
                Message::Close(frame) => anyhow::bail!("OBS closed the connection: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Sends a request and waits for its response data.
    fn request(&mut self, request_type: &str, request_data: Value) -> anyhow::Result<Value> {
        self.last_request_id += 1;
        let request_id = self.last_request_id.to_string();

        self.send(
            op::REQUEST,
            json!({
                "requestType": request_type,
                "requestId": request_id,
                "requestData": request_data,
            }),
        )?;

        loop {
            let message = self.read_envelope()?;
            if message.op != op::REQUEST_RESPONSE {
                continue;
            }

            let response: RequestResponse = serde_json::from_value(message.d)
                .with_context(|| format!("malformed response to {request_type}"))?;
            if response.request_id != request_id {
                continue;
            }

            let RequestStatus {
                result,
                code,
                comment,
            } = response.request_status;
            if !result {
                anyhow::bail!(
                    "{request_type} failed with code {code}: {}",
                    comment.unwrap_or_default()
                );
            }

            return Ok(response.response_data.unwrap_or(Value::Null));
        }
    }
}

/// Opens a TCP connection to the first reachable address of `host`.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> anyhow::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}"))?
    {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(err) => Err(err).with_context(|| format!("failed to connect to {host}:{port}")),
        None => anyhow::bail!("{host} did not resolve to any address"),
    }
}

impl ObsApi for ObsClient {
    fn get_input_settings(&mut self, input_name: &str) -> anyhow::Result<Settings> {
        let data = self.request("GetInputSettings", json!({ "inputName": input_name }))?;
        let response: InputSettingsResponse = serde_json::from_value(data)?;
        Ok(response.input_settings)
    }

    fn get_source_screenshot(
        &mut self,
        request: &ScreenshotRequest<'_>,
    ) -> anyhow::Result<String> {
        let data = self.request(
            "GetSourceScreenshot",
            json!({
                "sourceName": request.source_name,
                "imageFormat": request.format,
                "imageWidth": request.width,
                "imageHeight": request.height,
                "imageCompressionQuality": request.quality,
            }),
        )?;
        let response: ScreenshotResponse = serde_json::from_value(data)?;
        Ok(response.image_data)
    }

    fn set_input_settings(
        &mut self,
        input_name: &str,
        settings: Settings,
        overlay: bool,
    ) -> anyhow::Result<()> {
        self.request(
            "SetInputSettings",
            json!({
                "inputName": input_name,
                "inputSettings": settings,
                "overlay": overlay,
            }),
        )?;
        Ok(())
    }
}

/// Queries the native resolution of a source from its `width`/`height` settings.
///
/// Returns `None` if the settings cannot be read or the size is below 8x8.
pub(crate) fn native_size(api: &mut impl ObsApi, source_name: &str) -> Option<(u32, u32)> {
    let settings = match api.get_input_settings(source_name) {
        Ok(settings) => settings,
        Err(err) => {
            debug!("native size of '{source_name}' unknown: {err:#}");
            return None;
        }
    };

    let dimension = |key: &str| {
        settings
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
    };

    match (dimension("width"), dimension("height")) {
        (Some(width), Some(height)) if width >= 8 && height >= 8 => Some((width, height)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! An in-memory stand-in for OBS.

    use std::collections::BTreeMap;

    use super::*;

    /// Records requests and answers them from memory.
    #[derive(Default)]
    pub(crate) struct FakeObs {
        /// The settings of every known input.
        pub(crate) inputs: BTreeMap<String, Settings>,
        /// The screenshot payload, `None` makes screenshot requests fail.
        pub(crate) screenshot: Option<String>,
        /// The `(width, height)` of every screenshot request.
        pub(crate) screenshot_sizes: Vec<(u32, u32)>,
        /// The names of every input whose settings were set.
        pub(crate) updated_inputs: Vec<String>,
    }

    impl ObsApi for FakeObs {
        fn get_input_settings(&mut self, input_name: &str) -> anyhow::Result<Settings> {
            self.inputs
                .get(input_name)
                .cloned()
                .with_context(|| format!("no source named `{input_name}`"))
        }

        fn get_source_screenshot(
            &mut self,
            request: &ScreenshotRequest<'_>,
        ) -> anyhow::Result<String> {
            assert_eq!(request.format, "png");
            assert_eq!(request.quality, -1);
            self.screenshot_sizes.push((request.width, request.height));
            self.screenshot.clone().context("source not rendering")
        }

        fn set_input_settings(
            &mut self,
            input_name: &str,
            settings: Settings,
            overlay: bool,
        ) -> anyhow::Result<()> {
            let current = self
                .inputs
                .get_mut(input_name)
                .with_context(|| format!("no source named `{input_name}`"))?;
            if overlay {
                current.extend(settings);
            } else {
                *current = settings;
            }
            self.updated_inputs.push(input_name.to_string());
            Ok(())
        }
    }
}
