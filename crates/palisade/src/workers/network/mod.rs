mod connection;

use std::net::{TcpListener, TcpStream};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::NetworkConfig;
use crate::service::ConnectionChecker;

pub use connection::{handle_connection, ConnectionError};

pub fn run_acceptor(
    listener: TcpListener,
    connection_sender: Sender<TcpStream>,
) -> anyhow::Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => match connection_sender.try_send(stream) {
                Ok(()) => (),
                Err(TrySendError::Full(_)) => {
                    ::log::warn!("All connection workers busy, closing new connection");
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(anyhow::anyhow!("connection workers disconnected"));
                }
            },
            Err(err) => {
                ::log::warn!("Accepting connection failed: {:#}", err);
            }
        }
    }

    Ok(())
}

pub fn run_connection_worker(
    config: NetworkConfig,
    checker: ConnectionChecker,
    connection_receiver: Receiver<TcpStream>,
) -> anyhow::Result<()> {
    let mut cache = checker.gate().store().cache();

    for stream in connection_receiver {
        if let Err(err) = handle_connection(&config, &checker, &mut cache, stream) {
            ::log::debug!("Connection closed: {:#}", err);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::thread::{self, sleep};
    use std::time::{Duration, Instant};

    use crossbeam_channel::bounded;

    use super::*;

    fn spawn_acceptor(
        channel_size: usize,
    ) -> (
        std::net::SocketAddr,
        Receiver<TcpStream>,
        thread::JoinHandle<anyhow::Result<()>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (sender, receiver) = bounded(channel_size);

        let handle = thread::spawn(move || run_acceptor(listener, sender));

        (addr, receiver, handle)
    }

    #[test]
    fn test_full_channel_closes_connection() {
        let (addr, receiver, _handle) = spawn_acceptor(1);

        let _queued = TcpStream::connect(addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);

        while receiver.is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(10));
        }

        assert_eq!(receiver.len(), 1);

        let mut rejected = TcpStream::connect(addr).unwrap();

        rejected
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut buffer = [0u8; 1];

        assert_eq!(rejected.read(&mut buffer).unwrap(), 0);
        assert_eq!(receiver.len(), 1);
    }

    #[test]
    fn test_acceptor_stops_without_workers() {
        let (addr, receiver, handle) = spawn_acceptor(1);

        drop(receiver);

        let _stream = TcpStream::connect(addr).unwrap();

        assert!(handle.join().unwrap().is_err());
    }
}
