//! Structured recorder for real-time media and data frames.
//!
//! Frames are appended to an MJR stream, either a local file or a connection to
//! a remote archive server, and post-processed into a playable container
//! later on. Audio and video need separate recorders; muxing them together is
//! left to post-processing.
//!
//! ```no_run
//! use mjr_recorder::{Recorder, RecorderConfig};
//!
//! let config = RecorderConfig::default().with_temp_names(None);
//! let recorder = Recorder::create(&config, Some("/tmp/rec".as_ref()), "opus", Some("call"))?;
//! recorder.append(&[0u8; 160])?;
//! recorder.close()?;
//! recorder.destroy();
//! # Ok::<(), mjr_recorder::Error>(())
//! ```

pub mod codec;
pub mod config;
mod error;
pub mod naming;
mod recorder;
pub mod sink;

pub use codec::MediaKind;
pub use config::{RecorderConfig, SinkConfig};
pub use error::Error;
pub use recorder::{Recorder, RecorderHandle};
