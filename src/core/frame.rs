use bytes::Bytes;

/// Transport-neutral push channel frame.
///
/// Transports convert their native frame representation into/from `WsFrame`; everything above
/// the transport only ever sees this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    /// Build a text frame from an owned string without re-validating UTF-8.
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: Bytes) -> Self {
        Self::Close(Some(WsCloseFrame { code, reason }))
    }

    /// Payload of data-carrying frames. Control frames yield `None`.
    #[inline]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            WsFrame::Text(bytes) | WsFrame::Binary(bytes) => Some(bytes.as_ref()),
            WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => None,
        }
    }

    pub fn describe_close(&self) -> Option<String> {
        match self {
            WsFrame::Close(Some(frame)) => Some(format!(
                "code={} reason={}",
                frame.code,
                String::from_utf8_lossy(frame.reason.as_ref())
            )),
            WsFrame::Close(None) => Some("remote closed".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_exposed_only_for_data_frames() {
        assert_eq!(WsFrame::text("hi").payload(), Some(&b"hi"[..]));
        assert_eq!(
            WsFrame::Binary(Bytes::from_static(b"\x01")).payload(),
            Some(&b"\x01"[..])
        );
        assert!(WsFrame::Ping(Bytes::new()).payload().is_none());
        assert!(WsFrame::Close(None).payload().is_none());
    }

    #[test]
    fn close_frames_describe_themselves() {
        let frame = WsFrame::close(1001, Bytes::from_static(b"going away"));
        assert_eq!(
            frame.describe_close().as_deref(),
            Some("code=1001 reason=going away")
        );
        assert_eq!(
            WsFrame::Close(None).describe_close().as_deref(),
            Some("remote closed")
        );
        assert!(WsFrame::text("x").describe_close().is_none());
    }
}
