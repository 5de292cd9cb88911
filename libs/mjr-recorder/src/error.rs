use std::{io, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("recorder handle destroyed")]
    #[diagnostic(
        code(mjr::destroyed),
        help("this holder already released its share of the recorder")
    )]
    Destroyed,

    #[error("invalid payload: {0}")]
    #[diagnostic(
        code(mjr::invalid_payload),
        help("frames must be non-empty and fit the 16 bit length field")
    )]
    InvalidPayload(&'static str),

    #[error("sink not established")]
    #[diagnostic(code(mjr::no_sink))]
    SinkNotEstablished,

    #[error("recorder is not writable")]
    #[diagnostic(
        code(mjr::not_writable),
        help("the recording was closed or abandoned after a transport error")
    )]
    NotWritable,

    #[error("transport {0}")]
    #[diagnostic(
        code(mjr::transport),
        help("the recording was abandoned, create a new recorder to continue")
    )]
    Transport(#[source] io::Error),

    #[error("unsupported codec '{0}'")]
    #[diagnostic(
        code(mjr::unsupported_codec),
        help("supported codecs: vp8, vp9, h264, opus, g711, pcmu, pcma, g722, text")
    )]
    UnsupportedCodec(String),

    #[error("not a directory {0}")]
    #[diagnostic(code(mjr::not_a_directory))]
    NotADirectory(PathBuf),

    #[error("io {0}")]
    #[diagnostic(code(mjr::io))]
    Io(#[from] io::Error),

    #[error("remote archive host not found {0}")]
    #[diagnostic(code(mjr::host_not_found))]
    HostNotFound(String),

    #[error("remote archive connect {0}")]
    #[diagnostic(code(mjr::connect))]
    Connect(#[source] io::Error),

    #[error("remote archive handshake {0}")]
    #[diagnostic(code(mjr::handshake))]
    Handshake(#[source] io::Error),

    #[error("info block too large ({0} bytes)")]
    #[diagnostic(code(mjr::info_too_large))]
    InfoTooLarge(usize),

    #[error("json {0}")]
    #[diagnostic(code(mjr::json))]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Integer status for the append/close surface. Creation errors share `-1`
    /// since no handle exists for them.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidPayload(_) => -2,
            Error::SinkNotEstablished => -3,
            Error::NotWritable => -4,
            Error::Transport(_) => -5,
            _ => -1,
        }
    }

    pub fn is_stream_closed(&self) -> bool {
        match self {
            Error::Transport(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
