#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::Context;
use palisade::config::Config;

// FIXME: should ideally try different ports and use sync primitives to find
// out if the service was successfully started
pub fn run_palisade(config: Config) {
    ::std::thread::spawn(move || {
        palisade::run(config).unwrap();
    });

    sleep(Duration::from_secs(1));
}

/// Config with all files inside `dir`, polling quickly and listening on
/// `port` on localhost
pub fn test_config(dir: &Path, port: u16) -> Config {
    let mut config = Config::default();

    config.access.path = dir.join("whitelist.txt");
    config.access.poll_interval_ms = 20;
    config.attempts.path = dir.join("whitelist_pending.json");
    config.attempts.flush_interval_ms = 20;
    config.network.address = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    config.network.connection_workers = 2;

    config
}

pub struct QueryClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl QueryClient {
    pub fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).with_context(|| "connect")?;

        stream.set_read_timeout(Some(Duration::from_secs(1)))?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    pub fn query(&mut self, request: &str) -> anyhow::Result<String> {
        self.writer
            .write_all(format!("{}\n", request).as_bytes())
            .with_context(|| "send request")?;

        let mut response = String::new();

        self.reader
            .read_line(&mut response)
            .with_context(|| "read response")?;

        Ok(response.trim_end().to_string())
    }
}

pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        if condition() {
            return true;
        }

        sleep(Duration::from_millis(10));
    }

    false
}
