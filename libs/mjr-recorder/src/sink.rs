use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    Error,
    codec::HEADER,
    config::{SinkConfig, endpoint_with_port, millis},
};

/// Destination for an encoded stream.
///
/// Writes block until every byte is accepted or the transport fails; a failed
/// write leaves the sink unusable and the recorder abandons it.
pub trait Sink: Send + fmt::Debug {
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flushes and releases the transport. Called at most once.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Total bytes in the stream, preamble included.
    fn size(&self) -> io::Result<u64>;

    /// Moves the finished recording from `from` to `to`.
    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Opens the sink described by `config` for a recording at `path`, writing the
/// preamble (or the remote handshake that carries it).
pub fn open(config: &SinkConfig, path: &Path, name: &str) -> Result<Box<dyn Sink>, Error> {
    match config {
        SinkConfig::File => Ok(Box::new(FileSink::create(path)?)),
        SinkConfig::Remote {
            endpoint,
            connect_timeout_ms,
            write_timeout_ms,
        } => {
            let sink = RemoteSink::connect(
                endpoint,
                name,
                millis(*connect_timeout_ms),
                millis(*write_timeout_ms),
            )?;
            Ok(Box::new(sink))
        }
    }
}

#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self, Error> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(HEADER)?;
        debug!(?path, "opened recording file");
        Ok(Self { file })
    }
}

impl Sink for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Persistent connection to a remote archive server.
///
/// The handshake is `[len][file name]` followed by `[len][preamble]`, where
/// both lengths are 4 byte native-endian integers; the archive server reads
/// them that way, unlike the big-endian lengths inside the stream itself.
#[derive(Debug)]
pub struct RemoteSink {
    stream: TcpStream,
    addr: SocketAddr,
    sent: u64,
}

impl RemoteSink {
    pub fn connect(
        endpoint: &str,
        name: &str,
        connect_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        if endpoint.trim().is_empty() {
            return Err(Error::HostNotFound(endpoint.to_string()));
        }
        let endpoint = endpoint_with_port(endpoint);
        let addr = endpoint
            .to_socket_addrs()
            .map_err(|_| Error::HostNotFound(endpoint.clone()))?
            .next()
            .ok_or_else(|| Error::HostNotFound(endpoint.clone()))?;
        let stream = match connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(Error::Connect)?;
        stream.set_write_timeout(write_timeout).map_err(Error::Connect)?;
        info!(%addr, "remote archive server connected");

        let mut sink = Self {
            stream,
            addr,
            sent: 0,
        };
        let mut handshake = Vec::with_capacity(name.len() + HEADER.len() + 8);
        push_chunk(&mut handshake, name.as_bytes())?;
        push_chunk(&mut handshake, HEADER)?;
        // dropping `sink` on failure closes the socket
        sink.write(&handshake).map_err(Error::Handshake)?;
        info!(%addr, name, "remote file name transmitted");
        Ok(sink)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

fn push_chunk(buf: &mut Vec<u8>, chunk: &[u8]) -> Result<(), Error> {
    let len = i32::try_from(chunk.len()).map_err(|_| {
        Error::Handshake(io::Error::new(
            io::ErrorKind::InvalidInput,
            "handshake field too long",
        ))
    })?;
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(chunk);
    Ok(())
}

impl Sink for RemoteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.sent += buf.len() as u64;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.flush()?;
        self.stream.shutdown(Shutdown::Both)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.sent)
    }

    fn rename(&mut self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "remote recordings are named by the archive server",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Read, net::TcpListener, thread};
    use tempfile::TempDir;

    #[test]
    fn test_file_sink_preamble() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.mjr");
        let mut sink = FileSink::create(&path).unwrap();
        sink.write(b"abc").unwrap();
        assert_eq!(sink.size().unwrap(), 11);
        sink.shutdown().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"MJR00001abc");
    }

    #[test]
    fn test_file_sink_rename() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("a.mjr.tmp");
        let to = temp.path().join("a.mjr");
        let mut sink = FileSink::create(&from).unwrap();
        sink.rename(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"MJR00001");
    }

    #[test]
    fn test_remote_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![];
            stream.read_to_end(&mut buf).unwrap();
            buf
        });

        let mut sink = RemoteSink::connect(&addr.to_string(), "cam1.mjr", None, None).unwrap();
        assert_eq!(sink.peer_addr(), addr);
        sink.write(b"frame").unwrap();
        assert_eq!(sink.size().unwrap(), (4 + 8 + 4 + 8 + 5) as u64);
        sink.shutdown().unwrap();

        let buf = server.join().unwrap();
        let mut expected = vec![];
        expected.extend_from_slice(&8i32.to_ne_bytes());
        expected.extend_from_slice(b"cam1.mjr");
        expected.extend_from_slice(&8i32.to_ne_bytes());
        expected.extend_from_slice(b"MJR00001");
        expected.extend_from_slice(b"frame");
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_remote_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = RemoteSink::connect(&addr.to_string(), "x.mjr", None, None).unwrap_err();
        assert!(matches!(err, Error::Connect(_)), "{err:?}");
    }

    #[test]
    fn test_remote_host_not_found() {
        let err = RemoteSink::connect("", "x.mjr", None, None).unwrap_err();
        assert!(matches!(err, Error::HostNotFound(_)), "{err:?}");
    }

    #[test]
    fn test_remote_rename_unsupported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut sink = RemoteSink::connect(&addr.to_string(), "x.mjr", None, None).unwrap();
        let err = sink
            .rename(Path::new("x.mjr.tmp"), Path::new("x.mjr"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
