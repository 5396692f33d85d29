use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{PushError, PushResult, WsFrame};

pub mod tungstenite;

/// Future returned by [`PushTransport::connect`].
pub type TransportConnectFuture<R, W> = Pin<Box<dyn Future<Output = PushResult<(R, W)>> + Send>>;

/// Transport boundary for push channel IO.
///
/// The connection actor owns state and reconnection policy; the transport only knows how to
/// open a socket and hand back a frame stream plus a frame sink. Tests swap in the in-memory
/// transports from [`crate::testing`].
pub trait PushTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = PushResult<WsFrame>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = PushError> + Send + Sync + Unpin + 'static;

    fn connect(&self, url: String) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
