use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream};

use crate::config::NetworkConfig;
use crate::identity::Identity;
use crate::service::ConnectionChecker;
use crate::store::SnapshotCache;

const INVALID_IDENTITY_RESPONSE: &str = "error invalid_identity";

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("request line longer than {0} bytes")]
    LineTooLong(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Serve one query connection until the peer closes it
///
/// Each request line holds one identity, answered by one response line.
pub fn handle_connection(
    config: &NetworkConfig,
    checker: &ConnectionChecker,
    cache: &mut SnapshotCache,
    stream: TcpStream,
) -> Result<(), ConnectionError> {
    let timeout = config.connection_timeout();

    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let peer_addr = stream.peer_addr().ok();

    let mut writer = BufWriter::new(stream.try_clone()?);
    let mut reader = BufReader::new(stream);

    let limit = config.max_line_len as u64 + 1;
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = (&mut reader).take(limit).read_line(&mut line)?;

        if bytes_read == 0 {
            return Ok(());
        }

        let complete = line.ends_with('\n');

        if !complete && bytes_read as u64 >= limit {
            return Err(ConnectionError::LineTooLong(config.max_line_len));
        }

        let request = line.trim_end_matches(&['\r', '\n'][..]);
        let response = respond(checker, cache, request, peer_addr);

        writer.write_all(response.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        // Final line without newline, peer has shut down its write half
        if !complete {
            return Ok(());
        }
    }
}

fn respond(
    checker: &ConnectionChecker,
    cache: &mut SnapshotCache,
    request: &str,
    peer_addr: Option<SocketAddr>,
) -> String {
    match Identity::parse(request) {
        Ok(identity) => checker.check_cached(cache, &identity, peer_addr).to_string(),
        Err(err) => {
            ::log::debug!("Invalid identity in request {:?}: {}", request, err);

            INVALID_IDENTITY_RESPONSE.to_string()
        }
    }
}
