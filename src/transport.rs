//! Network transport for RTSP signaling and RTP media reception.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP**: carries RTSP request/response signaling. One blocking TCP
//!   connection per camera session.
//! - **Interleaved TCP** (RFC 2326 §10.12): after PLAY, RTP data is
//!   multiplexed onto the same TCP connection using `$` framing. A demux
//!   thread takes over the read side, routing data frames to the packet
//!   callback and response messages back to whoever is waiting on
//!   [`request`](RtspConnection::request).
//! - **UDP**: RTP arrives on a client-bound even/odd port pair
//!   (RFC 3550 §11); a receive thread forwards datagrams to the packet
//!   callback.
//!
//! Interleaved TCP is the default: it traverses NAT and survives lossy
//! networks better than UDP, which matters more here than latency.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::RngExt;

use crate::error::{CameraError, Result};
use crate::protocol::{RtspRequest, RtspResponse};

/// Which transport to request in SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// Interleaved RTP over the RTSP TCP connection.
    #[default]
    Tcp,
    /// RTP over a separate UDP port pair.
    Udp,
}

/// Raw media bytes handed up from the transport (one RTP datagram or
/// one interleaved frame). Runs on the transport's receive thread.
pub type PacketCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Interleaved channel carrying RTP in our SETUP request
/// (`interleaved=0-1`; channel 1 is RTCP).
pub const RTP_CHANNEL: u8 = 0;

const FRAME_MARKER: u8 = b'$';

enum ReadPath {
    /// Handshake phase: responses are read inline on the caller's thread.
    Direct(BufReader<TcpStream>),
    /// Playing phase: a demux thread owns the read side and forwards
    /// response messages here.
    Demuxed {
        responses: Receiver<RtspResponse>,
        handle: Option<JoinHandle<()>>,
    },
}

/// A blocking RTSP control connection to one camera.
///
/// Owns the CSeq counter: every request sent through
/// [`request`](Self::request) is numbered in order (RFC 2326 §12.17).
pub struct RtspConnection {
    writer: TcpStream,
    read_path: ReadPath,
    reply_timeout: Duration,
    cseq: u32,
}

impl RtspConnection {
    /// Open a TCP connection to the camera's RTSP port.
    pub fn connect(authority: &str, timeout: Duration) -> Result<Self> {
        let addr = resolve(authority)?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        let reader_stream = stream.try_clone()?;
        tracing::debug!(%addr, "RTSP control connection established");
        Ok(Self {
            writer: stream,
            read_path: ReadPath::Direct(BufReader::new(reader_stream)),
            reply_timeout: timeout,
            cseq: 0,
        })
    }

    /// Build, send, and await one request/response exchange.
    ///
    /// Non-2xx statuses are returned as [`CameraError::Status`].
    pub fn request(
        &mut self,
        method: &'static str,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> Result<RtspResponse> {
        self.cseq += 1;
        let mut req = RtspRequest::new(method, uri, self.cseq);
        for (name, value) in headers {
            req = req.add_header(name, value);
        }

        tracing::debug!(method, uri, cseq = self.cseq, "request");
        self.writer.write_all(req.serialize().as_bytes())?;

        let response = match &mut self.read_path {
            ReadPath::Direct(reader) => read_response(reader)?,
            ReadPath::Demuxed { responses, .. } => {
                responses.recv_timeout(self.reply_timeout).map_err(|e| {
                    let kind = match e {
                        RecvTimeoutError::Timeout => std::io::ErrorKind::TimedOut,
                        RecvTimeoutError::Disconnected => std::io::ErrorKind::ConnectionAborted,
                    };
                    CameraError::Io(std::io::Error::from(kind))
                })?
            }
        };

        tracing::debug!(method, status = response.status_code, "response");
        response.into_result()
    }

    /// Hand the read side to a demux thread (call after PLAY when using
    /// interleaved transport).
    ///
    /// `$`-framed data on [`RTP_CHANNEL`] goes to `on_packet`; other
    /// channels (RTCP) are discarded; response messages are routed back
    /// to [`request`](Self::request) callers. The thread exits when the
    /// socket errors out or [`close`](Self::close) shuts it down.
    pub fn start_interleaved(&mut self, mut on_packet: PacketCallback) -> Result<()> {
        let placeholder = ReadPath::Demuxed {
            responses: mpsc::channel().1,
            handle: None,
        };
        let mut reader = match std::mem::replace(&mut self.read_path, placeholder) {
            ReadPath::Direct(reader) => reader,
            demuxed => {
                self.read_path = demuxed;
                return Err(CameraError::UnsupportedTransport(
                    "interleaved demux already started".to_string(),
                ));
            }
        };

        // the demux thread blocks in read; no per-read deadline wanted
        reader.get_ref().set_read_timeout(None)?;

        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("rtsp-demux".to_string())
            .spawn(move || {
                let exit = loop {
                    match demux_one(&mut reader) {
                        Ok(Demuxed::Rtp(payload)) => on_packet(&payload),
                        Ok(Demuxed::OtherChannel) => {}
                        Ok(Demuxed::Response(response)) => {
                            if tx.send(response).is_err() {
                                break "connection dropped";
                            }
                        }
                        Err(e) => {
                            break if matches!(&e, CameraError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof)
                            {
                                "connection closed by camera"
                            } else {
                                tracing::debug!(error = %e, "demux read failed");
                                "read error"
                            };
                        }
                    }
                };
                tracing::debug!(reason = exit, "demux loop exited");
            })?;

        self.read_path = ReadPath::Demuxed {
            responses: rx,
            handle: Some(handle),
        };
        Ok(())
    }

    /// Shut the connection down and join the demux thread if running.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        if let ReadPath::Demuxed { handle, .. } = &mut self.read_path {
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    tracing::warn!("demux thread panicked");
                }
            }
        }
    }
}

impl Drop for RtspConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve(authority: &str) -> Result<SocketAddr> {
    authority
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| CameraError::InvalidAddress {
            address: authority.to_string(),
            reason: "did not resolve to any address".to_string(),
        })
}

enum Demuxed {
    Rtp(Vec<u8>),
    OtherChannel,
    Response(RtspResponse),
}

/// Read one interleaved frame or one RTSP response from the stream.
fn demux_one(reader: &mut BufReader<TcpStream>) -> Result<Demuxed> {
    let mut first = [0u8; 1];
    reader.read_exact(&mut first)?;

    if first[0] == FRAME_MARKER {
        // $ <channel:u8> <length:u16 BE> <payload>  (RFC 2326 §10.12)
        let mut header = [0u8; 3];
        reader.read_exact(&mut header)?;
        let channel = header[0];
        let length = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload)?;
        if channel == RTP_CHANNEL {
            return Ok(Demuxed::Rtp(payload));
        }
        return Ok(Demuxed::OtherChannel);
    }

    // not a data frame: the byte starts a response status line
    let mut head = String::new();
    head.push(first[0] as char);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(CameraError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        let blank = line == "\r\n" || line == "\n";
        head.push_str(&line);
        if blank {
            break;
        }
    }
    let body = read_body(reader, &head)?;
    Ok(Demuxed::Response(RtspResponse::parse(&head, body)?))
}

/// Read one full RTSP response (head, then Content-Length body bytes).
fn read_response(reader: &mut BufReader<TcpStream>) -> Result<RtspResponse> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(CameraError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        if line == "\r\n" || line == "\n" {
            // some cameras send stray blank lines between messages
            if head.is_empty() {
                continue;
            }
            break;
        }
        head.push_str(&line);
    }
    let body = read_body(reader, &head)?;
    RtspResponse::parse(&head, body)
}

fn read_body(reader: &mut BufReader<TcpStream>, head: &str) -> Result<Vec<u8>> {
    let declared = head
        .lines()
        .find_map(|l| l.split_once(':').filter(|(n, _)| n.trim().eq_ignore_ascii_case("Content-Length")))
        .map(|(_, v)| v);
    let length = RtspResponse::content_length(declared);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).map_err(|_| CameraError::Parse {
        kind: crate::error::ParseErrorKind::TruncatedBody,
    })?;
    Ok(body)
}

/// Client-side UDP RTP receiver bound to an even/odd port pair
/// (RFC 3550 §11: RTP on the even port, RTCP on the odd).
pub struct UdpRtpReceiver {
    rtp_socket: Arc<UdpSocket>,
    // held so the port stays reserved; RTCP traffic is ignored
    _rtcp_socket: UdpSocket,
    rtp_port: u16,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UdpRtpReceiver {
    /// Bind an even/odd UDP port pair for RTP/RTCP.
    pub fn bind() -> Result<Self> {
        let (rtp_socket, rtcp_socket, rtp_port) = bind_port_pair()?;
        rtp_socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        Ok(Self {
            rtp_socket: Arc::new(rtp_socket),
            _rtcp_socket: rtcp_socket,
            rtp_port,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    /// `client_port` pair for the SETUP Transport header.
    pub fn ports(&self) -> (u16, u16) {
        (self.rtp_port, self.rtp_port + 1)
    }

    /// Spawn the receive loop. Datagrams go to `on_packet` until
    /// [`stop`](Self::stop).
    pub fn start(&mut self, mut on_packet: PacketCallback) {
        self.running.store(true, Ordering::SeqCst);
        let socket = Arc::clone(&self.rtp_socket);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("rtp-udp-recv".to_string())
            .spawn(move || {
                // 65536 covers any UDP datagram
                let mut buf = vec![0u8; 65536];
                while running.load(Ordering::SeqCst) {
                    match socket.recv(&mut buf) {
                        Ok(n) => on_packet(&buf[..n]),
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                tracing::warn!(error = %e, "UDP receive error");
                            }
                            break;
                        }
                    }
                }
                tracing::debug!("UDP receive loop exited");
            })
            .map_err(|e| tracing::error!(error = %e, "spawning UDP receive thread"))
            .ok();
        self.handle = handle;
    }

    /// Stop the receive loop and join its thread. Safe to call twice.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("UDP receive thread panicked");
            }
        }
    }
}

impl Drop for UdpRtpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RTP convention wants the even port of a consecutive pair. Ephemeral
/// binds hand out arbitrary ports, so probe random even bases instead.
fn bind_port_pair() -> Result<(UdpSocket, UdpSocket, u16)> {
    let mut last_err: Option<std::io::Error> = None;
    for _ in 0..16 {
        let base = rand::rng().random_range(10000u16..30000) & !1;
        let rtp = match UdpSocket::bind(("0.0.0.0", base)) {
            Ok(s) => s,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        match UdpSocket::bind(("0.0.0.0", base + 1)) {
            Ok(rtcp) => return Ok((rtp, rtcp, base)),
            Err(e) => last_err = Some(e),
        }
    }
    Err(CameraError::Io(last_err.unwrap_or_else(|| {
        std::io::Error::from(std::io::ErrorKind::AddrInUse)
    })))
}
