//! axum WebSocket transport.
//!
//! Resolves the client address before upgrading, then maps axum
//! [`Message`]s to and from pump [`Frame`]s.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use relay_core::Address;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::connection::{run_connection, Frame, TransportError};
use crate::server::AppState;

/// Header consulted when the `address` query parameter is absent.
pub const ADDRESS_HEADER: &str = "x-client-address";

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub address: Option<String>,
}

/// The query parameter wins; the header is the fallback. Blank values count
/// as absent.
pub fn resolve_address(params: &ConnectParams, headers: &HeaderMap) -> Option<Address> {
    let from_query = params
        .address
        .as_deref()
        .and_then(|raw| Address::parse(raw).ok());

    from_query.or_else(|| {
        headers
            .get(ADDRESS_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Address::parse(raw).ok())
    })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let Some(address) = resolve_address(&params, &headers) else {
        warn!("websocket request without client address rejected");
        return (StatusCode::BAD_REQUEST, "client address required").into_response();
    };

    debug!(address = %address, "upgrading websocket");
    let limits = state.limits.clone();
    ws.max_message_size(limits.max_frame_bytes)
        .max_frame_size(limits.max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let (stream, sink) = split_socket(socket);
            run_connection(address, stream, sink, state.hub, limits).await;
        })
}

/// Split an upgraded socket into the frame stream and sink the pumps expect.
pub fn split_socket(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
    impl Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(frame_from_message).map_err(transport_error));
    let sink = sink
        .sink_map_err(transport_error)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(message_from_frame(frame))));
    (stream, sink)
}

fn transport_error(error: axum::Error) -> TransportError {
    TransportError::Io(error.to_string())
}

fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Data(Bytes::copy_from_slice(text.as_str().as_bytes())),
        Message::Binary(data) => Frame::Data(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

/// Data goes out as text whenever it is valid UTF-8, which every encoded
/// envelope is.
fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Data(data) => match std::str::from_utf8(&data) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(data),
        },
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(address: Option<&str>) -> ConnectParams {
        ConnectParams {
            address: address.map(str::to_owned),
        }
    }

    fn headers(address: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Client-Address", HeaderValue::from_static(address));
        headers
    }

    #[test]
    fn query_parameter_takes_precedence() {
        let resolved = resolve_address(&params(Some("alice")), &headers("bob")).unwrap();
        assert_eq!(resolved.as_str(), "alice");
    }

    #[test]
    fn header_is_the_fallback() {
        let resolved = resolve_address(&params(None), &headers("bob")).unwrap();
        assert_eq!(resolved.as_str(), "bob");

        let resolved = resolve_address(&params(Some("")), &headers("bob")).unwrap();
        assert_eq!(resolved.as_str(), "bob");
    }

    #[test]
    fn missing_address_resolves_to_none() {
        assert!(resolve_address(&params(None), &HeaderMap::new()).is_none());
        assert!(resolve_address(&params(Some("  ")), &headers(" ")).is_none());
    }

    #[test]
    fn text_and_binary_both_become_data() {
        assert_eq!(
            frame_from_message(Message::Text("{}".into())),
            Frame::Data(Bytes::from_static(b"{}"))
        );
        assert_eq!(
            frame_from_message(Message::Binary(Bytes::from_static(b"{}"))),
            Frame::Data(Bytes::from_static(b"{}"))
        );
        assert_eq!(frame_from_message(Message::Close(None)), Frame::Close);
    }

    #[test]
    fn utf8_data_is_sent_as_text() {
        assert!(matches!(
            message_from_frame(Frame::Data(Bytes::from_static(b"{\"seq\":1}"))),
            Message::Text(_)
        ));
        assert!(matches!(
            message_from_frame(Frame::Data(Bytes::from_static(&[0xff, 0xfe]))),
            Message::Binary(_)
        ));
        assert!(matches!(message_from_frame(Frame::Close), Message::Close(None)));
    }
}
