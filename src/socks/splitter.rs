//! First-flight payload shaping
//!
//! Runs once per CONNECT, after the reply and before the relay pumps. It
//! sniffs the first client byte and, for TLS ClientHello or plaintext
//! HTTP, forwards the initial bytes to the upstream peer in deliberately
//! shaped fragments so that the SNI or `Host:` substring never travels
//! contiguously in a single TCP segment. Reads stay contiguous; only the
//! writes are fragmented, and only once — after this pass the normal
//! relay takes over.

use rand::Rng;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// TLS handshake record type; a ClientHello starts with it.
const TLS_HANDSHAKE: u8 = 0x16;
/// Inclusive bounds for the randomized ClientHello fragment buffer.
const TLS_CHUNK_MIN: usize = 80;
const TLS_CHUNK_MAX: usize = 179;
/// Window sniffed for a `Host:` header.
const HTTP_SNIFF_LEN: usize = 512;

/// What the relay should do after the shaping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplitOutcome {
    /// Proceed to the bidirectional relay.
    Relay,
    /// The client went away mid-sniff; end the session cleanly.
    ClientClosed,
}

/// Sniff the first client byte, forward it, and shape the rest of the
/// initial burst according to what it looks like. Client-side read
/// failures end the session without error; upstream write failures
/// propagate.
pub(crate) async fn shape_first_flight<C, U>(
    client: &mut C,
    upstream: &mut U,
) -> io::Result<SplitOutcome>
where
    C: AsyncRead + Unpin + ?Sized,
    U: AsyncWrite + Unpin + ?Sized,
{
    let mut first = [0u8; 1];
    match client.read(&mut first).await {
        Ok(1) => {}
        Ok(_) => {
            debug!("client closed before sending payload");
            return Ok(SplitOutcome::ClientClosed);
        }
        Err(e) => {
            debug!("could not read first payload byte: {e}");
            return Ok(SplitOutcome::ClientClosed);
        }
    }
    upstream.write_all(&first).await?;
    upstream.flush().await?;

    match first[0] {
        TLS_HANDSHAKE => shape_tls(client, upstream).await,
        b if is_http_initial(b) => shape_http(client, upstream).await,
        _ => Ok(SplitOutcome::Relay),
    }
}

/// Forward up to a randomized number of ClientHello bytes as one
/// fragment, so the SNI extension lands across a segment boundary.
async fn shape_tls<C, U>(client: &mut C, upstream: &mut U) -> io::Result<SplitOutcome>
where
    C: AsyncRead + Unpin + ?Sized,
    U: AsyncWrite + Unpin + ?Sized,
{
    debug!("tls clienthello detected");

    let chunk = rand::thread_rng().gen_range(TLS_CHUNK_MIN..=TLS_CHUNK_MAX);
    let mut buf = vec![0u8; chunk];
    let read = match client.read(&mut buf).await {
        Ok(0) => {
            debug!("client closed inside clienthello");
            return Ok(SplitOutcome::ClientClosed);
        }
        Ok(n) => n,
        Err(e) => {
            debug!("could not read clienthello fragment: {e}");
            return Ok(SplitOutcome::ClientClosed);
        }
    };

    upstream.write_all(&buf[..read]).await?;
    upstream.flush().await?;
    debug!("clienthello fragment: read {read} / wrote {read} (buffer {chunk})");

    Ok(SplitOutcome::Relay)
}

/// Split the header block around the first `Host:` occurrence so the
/// marker never crosses the wire in one piece.
async fn shape_http<C, U>(client: &mut C, upstream: &mut U) -> io::Result<SplitOutcome>
where
    C: AsyncRead + Unpin + ?Sized,
    U: AsyncWrite + Unpin + ?Sized,
{
    debug!("plain http detected");

    let mut buf = [0u8; HTTP_SNIFF_LEN];
    let read = match client.read(&mut buf).await {
        Ok(0) => {
            debug!("client closed inside http header");
            return Ok(SplitOutcome::ClientClosed);
        }
        Ok(n) => n,
        Err(e) => {
            debug!("could not read http header: {e}");
            return Ok(SplitOutcome::ClientClosed);
        }
    };

    match find_host_marker(&buf[..read]) {
        Some(idx) => {
            // The matched five bytes are replaced by the four bytes
            // "Host"; the colon does not survive the split.
            upstream.write_all(&buf[..idx]).await?;
            upstream.flush().await?;
            upstream.write_all(b"Host").await?;
            upstream.flush().await?;
            upstream.write_all(&buf[idx + 5..read]).await?;
            upstream.flush().await?;
            debug!("http header: read {read} / split at {idx}");
        }
        None => {
            upstream.write_all(&buf[..read]).await?;
            upstream.flush().await?;
            debug!("http header: read {read} / no host marker");
        }
    }

    Ok(SplitOutcome::Relay)
}

/// Uppercase A-Z plus lowercase b-z; a leading 'a' (0x61) is not
/// treated as HTTP.
fn is_http_initial(byte: u8) -> bool {
    matches!(byte, 0x41..=0x5A | 0x62..=0x7A)
}

/// Position of the first case-insensitive `host:` in `buf`.
fn find_host_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(5).position(|w| w.eq_ignore_ascii_case(b"host:"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// AsyncWrite double that records each write as a separate fragment.
    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<Vec<u8>>,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.get_mut().writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_tls_clienthello_is_fragmented() {
        let mut payload = vec![0x16];
        payload.extend((0..299).map(|i| i as u8));
        let mut client = Cursor::new(payload.clone());
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::Relay);
        assert_eq!(upstream.writes.len(), 2);
        assert_eq!(upstream.writes[0], vec![0x16]);

        let fragment = &upstream.writes[1];
        assert!((TLS_CHUNK_MIN..=TLS_CHUNK_MAX).contains(&fragment.len()));
        assert_eq!(fragment[..], payload[1..1 + fragment.len()]);
    }

    #[tokio::test]
    async fn test_tls_short_hello() {
        // Fewer ClientHello bytes than the fragment buffer: short read is fine.
        let mut payload = vec![0x16];
        payload.extend_from_slice(&[0xAA; 20]);
        let mut client = Cursor::new(payload);
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::Relay);
        assert_eq!(upstream.writes.len(), 2);
        assert_eq!(upstream.writes[1], vec![0xAA; 20]);
    }

    #[tokio::test]
    async fn test_http_host_header_is_split() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut client = Cursor::new(request.to_vec());
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::Relay);
        assert_eq!(
            upstream.writes,
            vec![
                b"G".to_vec(),
                b"ET / HTTP/1.1\r\n".to_vec(),
                b"Host".to_vec(),
                b" example.com\r\n\r\n".to_vec(),
            ]
        );

        // The marker never appears inside any single fragment.
        for fragment in &upstream.writes {
            assert!(find_host_marker(fragment).is_none());
        }
    }

    #[tokio::test]
    async fn test_http_host_marker_case_insensitive() {
        let request = b"GET / HTTP/1.1\r\nhOsT: x.org\r\n\r\n";
        let mut client = Cursor::new(request.to_vec());
        let mut upstream = RecordingWriter::default();

        shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(upstream.writes.len(), 4);
        assert_eq!(upstream.writes[2], b"Host".to_vec());
        assert_eq!(upstream.writes[3], b" x.org\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_http_without_host_marker_passes_through() {
        let request = b"OPTIONS * HTTP/1.1\r\nX-Probe: 1\r\n\r\n";
        let mut client = Cursor::new(request.to_vec());
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::Relay);
        assert_eq!(
            upstream.writes,
            vec![b"O".to_vec(), request[1..].to_vec()]
        );
    }

    #[tokio::test]
    async fn test_unknown_first_byte_is_left_alone() {
        let mut client = Cursor::new(vec![0x00, 0x01, 0x02, 0x03]);
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::Relay);
        assert_eq!(upstream.writes, vec![vec![0x00]]);
        // The rest stays buffered for the relay.
        assert_eq!(client.position(), 1);
    }

    #[tokio::test]
    async fn test_lowercase_a_is_not_http() {
        let mut client = Cursor::new(b"absolutely not shaped".to_vec());
        let mut upstream = RecordingWriter::default();

        shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(upstream.writes, vec![vec![b'a']]);
        assert_eq!(client.position(), 1);
    }

    #[tokio::test]
    async fn test_client_eof_before_first_byte() {
        let mut client = Cursor::new(Vec::new());
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::ClientClosed);
        assert!(upstream.writes.is_empty());
    }

    #[tokio::test]
    async fn test_client_eof_after_tls_byte() {
        let mut client = Cursor::new(vec![0x16]);
        let mut upstream = RecordingWriter::default();

        let outcome = shape_first_flight(&mut client, &mut upstream).await.unwrap();

        assert_eq!(outcome, SplitOutcome::ClientClosed);
        assert_eq!(upstream.writes, vec![vec![0x16]]);
    }

    #[test]
    fn test_is_http_initial_ranges() {
        assert!(is_http_initial(b'A'));
        assert!(is_http_initial(b'Z'));
        assert!(is_http_initial(b'b'));
        assert!(is_http_initial(b'z'));
        assert!(!is_http_initial(b'a'));
        assert!(!is_http_initial(b'0'));
        assert!(!is_http_initial(0x16));
    }

    #[test]
    fn test_find_host_marker() {
        assert_eq!(find_host_marker(b"Host: x"), Some(0));
        assert_eq!(find_host_marker(b"\r\nHOST: x"), Some(2));
        assert_eq!(find_host_marker(b"ghost"), None);
        assert_eq!(find_host_marker(b"hos"), None);
        assert_eq!(find_host_marker(b""), None);
    }
}
