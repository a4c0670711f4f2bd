/// An outbound RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header),
/// then call [`serialize`](Self::serialize). `CSeq` is always the first
/// header (RFC 2326 §12.17), `User-Agent` the second (§12.41).
#[must_use]
pub struct RtspRequest {
    pub method: &'static str,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

/// Client identification string included in every request
/// per RFC 2326 §12.41.
pub const USER_AGENT: &str = "camgrab/0.1";

impl RtspRequest {
    pub fn new(method: &'static str, uri: &str, cseq: u32) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: vec![
                ("CSeq".to_string(), cseq.to_string()),
                ("User-Agent".to_string(), USER_AGENT.to_string()),
            ],
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_options() {
        let req = RtspRequest::new("OPTIONS", "rtsp://camera:554/stream", 1);
        let s = req.serialize();
        assert!(s.starts_with("OPTIONS rtsp://camera:554/stream RTSP/1.0\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.contains("User-Agent: camgrab/0.1\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serialize_setup_with_transport() {
        let req = RtspRequest::new("SETUP", "rtsp://camera:554/stream/track1", 3)
            .add_header("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1");
        let s = req.serialize();
        assert!(s.contains("CSeq: 3\r\n"));
        assert!(s.contains("Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n"));
    }

    #[test]
    fn cseq_is_first_header() {
        let req = RtspRequest::new("PLAY", "rtsp://camera/stream", 4).add_header("Session", "abc");
        let s = req.serialize();
        let cseq = s.find("CSeq:").unwrap();
        let session = s.find("Session:").unwrap();
        assert!(cseq < session);
    }
}
