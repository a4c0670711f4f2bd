use crate::error::{CameraError, ParseErrorKind, Result};

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body is
/// parsed separately: the transport reads `Content-Length` bytes after
/// the blank line and attaches them via [`parse`](Self::parse).
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    /// Headers as ordered (name, value) pairs. Names are stored
    /// as-received; lookups via [`get_header`](Self::get_header) are
    /// case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Parse an RTSP response from its head text (status line plus
    /// headers) and an already-read body.
    pub fn parse(head: &str, body: Vec<u8>) -> Result<Self> {
        let mut lines = head.lines();

        let status_line = lines.next().filter(|l| !l.is_empty()).ok_or(CameraError::Parse {
            kind: ParseErrorKind::EmptyResponse,
        })?;

        // `Reason-Phrase` may contain spaces, so split at most twice
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        let text = parts.next().unwrap_or_default();

        if !version.starts_with("RTSP/") {
            return Err(CameraError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }
        let status_code = code.parse::<u16>().map_err(|_| CameraError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon_pos = line.find(':').ok_or(CameraError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        Ok(RtspResponse {
            status_code,
            status_text: text.to_string(),
            headers,
            body,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Returns the server-assigned session ID from the Session header,
    /// with any `;timeout=` parameter stripped (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    /// Declared body length, defaulting to 0 when absent (RFC 2326 §12.14).
    pub fn content_length(head_value: Option<&str>) -> usize {
        head_value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// Convert a non-OK response into the error it represents.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(CameraError::Status {
                code: self.status_code,
                text: self.status_text,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok_response() {
        let head = "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY\r\n";
        let resp = RtspResponse::parse(head, Vec::new()).unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.cseq(), Some("1"));
        assert_eq!(
            resp.get_header("public"),
            Some("OPTIONS, DESCRIBE, SETUP, PLAY")
        );
    }

    #[test]
    fn parse_status_with_spaces_in_reason() {
        let head = "RTSP/1.0 404 Stream Not Found\r\nCSeq: 2\r\n";
        let resp = RtspResponse::parse(head, Vec::new()).unwrap();
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.status_text, "Stream Not Found");
        assert!(matches!(
            resp.into_result(),
            Err(CameraError::Status { code: 404, .. })
        ));
    }

    #[test]
    fn session_id_strips_timeout() {
        let head = "RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 12345678;timeout=60\r\n";
        let resp = RtspResponse::parse(head, Vec::new()).unwrap();
        assert_eq!(resp.session_id(), Some("12345678"));
    }

    #[test]
    fn parse_empty_response() {
        assert!(matches!(
            RtspResponse::parse("", Vec::new()),
            Err(CameraError::Parse {
                kind: ParseErrorKind::EmptyResponse
            })
        ));
    }

    #[test]
    fn parse_invalid_status_line() {
        assert!(RtspResponse::parse("HTTP/1.1 200 OK\r\n", Vec::new()).is_err());
        assert!(RtspResponse::parse("RTSP/1.0 abc OK\r\n", Vec::new()).is_err());
    }

    #[test]
    fn parse_invalid_header() {
        let head = "RTSP/1.0 200 OK\r\nNoColonHere\r\n";
        assert!(matches!(
            RtspResponse::parse(head, Vec::new()),
            Err(CameraError::Parse {
                kind: ParseErrorKind::InvalidHeader
            })
        ));
    }

    #[test]
    fn content_length_defaults_to_zero() {
        assert_eq!(RtspResponse::content_length(None), 0);
        assert_eq!(RtspResponse::content_length(Some("142")), 142);
        assert_eq!(RtspResponse::content_length(Some("junk")), 0);
    }
}
