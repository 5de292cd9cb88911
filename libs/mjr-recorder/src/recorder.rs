use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{self, AtomicBool, AtomicU64},
    },
};

use arc_swap::ArcSwapOption;
use tracing::{debug, error, info, warn};

use crate::{
    Error, RecorderConfig,
    codec::{self, HEADER, Info, MediaKind},
    naming::{self, Target},
    sink::{self, Sink},
};

/// A single recording.
///
/// Every mutation of the sink goes through `inner`, so concurrent appends are
/// written whole and in the order they take the lock. `writable` is a lock-free
/// hint for callers and the authoritative close switch: once it flips to
/// `false` it never comes back.
pub struct Recorder {
    kind: MediaKind,
    codec: String,
    created_at: i64,
    target: Target,
    writable: AtomicBool,
    header_sent: AtomicBool,
    frames_written: AtomicU64,
    /// Stream offset just past the last complete frame.
    committed_len: AtomicU64,
    inner: Mutex<Inner>,
}

struct Inner {
    sink: Option<Box<dyn Sink>>,
    buf: Vec<u8>,
    file_name: String,
}

impl Recorder {
    /// Creates a recording for `codec`, opening the configured sink.
    ///
    /// `dir` is created if missing. Without `filename` a random
    /// `recording-<n>.mjr` name is generated.
    pub fn create(
        config: &RecorderConfig,
        dir: Option<&Path>,
        codec: &str,
        filename: Option<&str>,
    ) -> Result<RecorderHandle, Error> {
        let kind = MediaKind::from_codec(codec).ok_or_else(|| {
            error!(codec, "unsupported codec");
            Error::UnsupportedCodec(codec.to_string())
        })?;
        let target = Target::resolve(dir, filename, config.temp_extension.as_deref());
        if let Some(dir) = &target.dir {
            naming::ensure_dir(dir)?;
        }
        let sink = sink::open(&config.sink, &target.working_path(), &target.working)?;
        info!(name = %target.working, %kind, codec, "created recorder");
        Ok(Self::from_parts(kind, codec, target, sink))
    }

    /// Wraps an already opened sink. The sink must have written the preamble.
    pub fn with_sink(
        codec: &str,
        target: Target,
        sink: Box<dyn Sink>,
    ) -> Result<RecorderHandle, Error> {
        let kind = MediaKind::from_codec(codec)
            .ok_or_else(|| Error::UnsupportedCodec(codec.to_string()))?;
        Ok(Self::from_parts(kind, codec, target, sink))
    }

    fn from_parts(
        kind: MediaKind,
        codec: &str,
        target: Target,
        sink: Box<dyn Sink>,
    ) -> RecorderHandle {
        let recorder = Recorder {
            kind,
            codec: codec.to_string(),
            created_at: codec::now_micros(),
            inner: Mutex::new(Inner {
                sink: Some(sink),
                buf: Vec::new(),
                file_name: target.working.clone(),
            }),
            target,
            writable: AtomicBool::new(true),
            header_sent: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
            committed_len: AtomicU64::new(HEADER.len() as u64),
        };
        RecorderHandle::new(Arc::new(recorder))
    }

    /// Appends one frame, writing the info block first if this is the first one.
    ///
    /// Blocks for the duration of the write. A transport failure abandons the
    /// recording: the sink is released and every later append fails with
    /// [`Error::NotWritable`].
    pub fn append(&self, payload: &[u8]) -> Result<(), Error> {
        codec::frame_len(self.kind, payload.len())?;
        if !self.is_writable() {
            return Err(Error::NotWritable);
        }
        let mut inner = self.lock();
        // close may have won while we waited on the lock
        if !self.is_writable() {
            return Err(Error::NotWritable);
        }
        let Inner { sink, buf, .. } = &mut *inner;
        let Some(sink) = sink.as_mut() else {
            return Err(Error::SinkNotEstablished);
        };

        let now = codec::now_micros();
        let first = !self.header_sent.load(atomic::Ordering::Acquire);
        buf.clear();
        if first {
            let info = Info::new(self.kind, &self.codec, self.created_at, now);
            codec::encode_info(buf, &info)?;
        }
        codec::encode_frame(buf, self.kind, payload, now)?;

        if let Err(err) = sink.write(buf) {
            self.abandon(&mut inner, &err);
            return Err(Error::Transport(err));
        }
        let written = buf.len() as u64;
        if first {
            self.header_sent.store(true, atomic::Ordering::Release);
            debug!(name = %inner.file_name, "wrote info block");
        }
        self.committed_len.fetch_add(written, atomic::Ordering::AcqRel);
        self.frames_written.fetch_add(1, atomic::Ordering::AcqRel);
        Ok(())
    }

    fn abandon(&self, inner: &mut Inner, err: &std::io::Error) {
        self.writable.store(false, atomic::Ordering::Release);
        let committed = self.committed_len.load(atomic::Ordering::Acquire);
        error!(
            name = %inner.file_name,
            ?err,
            committed,
            "error saving frame, abandoning recording"
        );
        if let Some(mut sink) = inner.sink.take() {
            if let Err(err) = sink.shutdown() {
                warn!(name = %inner.file_name, ?err, "failed to release abandoned sink");
            }
        }
    }

    /// Stops the recording. Only the first call does any work: it releases
    /// the sink and renames a temporary file to its canonical name. Later calls,
    /// and calls after an abandoned append, succeed without doing anything.
    pub fn close(&self) -> Result<(), Error> {
        if self
            .writable
            .compare_exchange(
                true,
                false,
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }
        let mut inner = self.lock();
        let Some(mut sink) = inner.sink.take() else {
            return Ok(());
        };
        if let Err(err) = sink.shutdown() {
            warn!(name = %inner.file_name, ?err, "failed to flush recording");
        }
        match sink.size() {
            Ok(bytes) => info!(name = %inner.file_name, bytes, "recording closed"),
            Err(err) => warn!(
                name = %inner.file_name,
                ?err,
                "recording closed, size unknown"
            ),
        }
        if self.target.is_temporary() {
            let from = self.target.working_path();
            let to = self.target.canonical_path();
            match sink.rename(&from, &to) {
                Ok(()) => {
                    info!(name = %self.target.canonical, "recording renamed");
                    inner.file_name = self.target.canonical.clone();
                }
                Err(err) => error!(
                    from = %self.target.working,
                    to = %self.target.canonical,
                    ?err,
                    "error renaming recording"
                ),
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(atomic::Ordering::Acquire)
    }

    pub fn header_sent(&self) -> bool {
        self.header_sent.load(atomic::Ordering::Acquire)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Creation time in microseconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn directory(&self) -> Option<&Path> {
        self.target.dir.as_deref()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Current file name: the temporary name until a successful close renames it.
    pub fn file_name(&self) -> String {
        self.lock().file_name.clone()
    }

    pub fn path(&self) -> PathBuf {
        let name = self.file_name();
        match self.directory() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(atomic::Ordering::Acquire)
    }

    /// Bytes in the stream up to the end of the last complete frame, preamble included.
    pub fn committed_len(&self) -> u64 {
        self.committed_len.load(atomic::Ordering::Acquire)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.close();
        debug!(name = %self.target.working, "recorder freed");
    }
}

/// One holder's share of a [`Recorder`].
///
/// Cloning a handle adds a holder. [`RecorderHandle::destroy`] releases this
/// holder's share once, no matter how often it is called; the recorder is
/// closed and freed when the last share goes away.
pub struct RecorderHandle {
    recorder: ArcSwapOption<Recorder>,
}

impl RecorderHandle {
    fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder: ArcSwapOption::new(Some(recorder)),
        }
    }

    /// The recorder, unless this holder already destroyed its share.
    pub fn get(&self) -> Result<Arc<Recorder>, Error> {
        self.recorder.load_full().ok_or(Error::Destroyed)
    }

    pub fn append(&self, payload: &[u8]) -> Result<(), Error> {
        self.get()?.append(payload)
    }

    pub fn close(&self) -> Result<(), Error> {
        self.get()?.close()
    }

    pub fn destroy(&self) {
        if let Some(recorder) = self.recorder.swap(None) {
            debug!(
                holders = Arc::strong_count(&recorder) - 1,
                "released recorder share"
            );
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.recorder.load().is_none()
    }

    pub fn is_writable(&self) -> bool {
        self.recorder
            .load_full()
            .is_some_and(|recorder| recorder.is_writable())
    }
}

impl Clone for RecorderHandle {
    fn clone(&self) -> Self {
        Self {
            recorder: ArcSwapOption::new(self.recorder.load_full()),
        }
    }
}

impl std::fmt::Debug for RecorderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.recorder.load_full() {
            Some(recorder) => f
                .debug_struct("RecorderHandle")
                .field("name", &recorder.target.working)
                .field("kind", &recorder.kind)
                .field("writable", &recorder.is_writable())
                .finish(),
            None => f.write_str("RecorderHandle(destroyed)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    #[derive(Debug, Default)]
    struct Probe {
        data: Mutex<Vec<u8>>,
        writes: AtomicUsize,
        shutdowns: AtomicUsize,
        renames: AtomicUsize,
        drops: AtomicUsize,
        fail_writes: AtomicBool,
        fail_shutdown: AtomicBool,
    }

    #[derive(Debug)]
    struct ProbeSink(Arc<Probe>);

    impl Sink for ProbeSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<()> {
            self.0.writes.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.0.data.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_shutdown.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            Ok(())
        }

        fn size(&self) -> io::Result<u64> {
            Ok(self.0.data.lock().unwrap().len() as u64)
        }

        fn rename(&mut self, _from: &Path, _to: &Path) -> io::Result<()> {
            self.0.renames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for ProbeSink {
        fn drop(&mut self) {
            self.0.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn probe_recorder(codec: &str, temp: Option<&str>) -> (RecorderHandle, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let target = Target::new(None, "rec", temp);
        let handle =
            Recorder::with_sink(codec, target, Box::new(ProbeSink(probe.clone()))).unwrap();
        (handle, probe)
    }

    /// Splits the recorded bytes (after the preamble) into info text and frame payload lengths.
    fn frames(data: &[u8]) -> (String, Vec<usize>) {
        let info_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        let info = String::from_utf8(data[2..2 + info_len].to_vec()).unwrap();
        let mut rest = &data[2 + info_len..];
        let mut lens = vec![];
        while !rest.is_empty() {
            assert_eq!(&rest[..8], codec::FRAME_HEADER);
            let len = u16::from_be_bytes([rest[8], rest[9]]) as usize;
            lens.push(len);
            rest = &rest[10 + len..];
        }
        (info, lens)
    }

    #[test]
    fn test_info_block_written_once() {
        let (handle, probe) = probe_recorder("opus", None);
        let recorder = handle.get().unwrap();
        assert!(!recorder.header_sent());
        for len in [10, 20, 30] {
            handle.append(&vec![1u8; len]).unwrap();
        }
        assert!(recorder.header_sent());
        let (info, lens) = frames(&probe.data.lock().unwrap());
        assert!(info.starts_with(r#"{"t":"a","c":"opus","s":"#), "{info}");
        assert_eq!(lens, vec![10, 20, 30]);
        assert_eq!(recorder.frames_written(), 3);
        let total = probe.data.lock().unwrap().len() as u64;
        assert_eq!(recorder.committed_len(), HEADER.len() as u64 + total);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (handle, probe) = probe_recorder("vp8", Some("tmp"));
        handle.append(b"frame").unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probe.renames.load(Ordering::SeqCst), 1);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
        let recorder = handle.get().unwrap();
        assert_eq!(recorder.file_name(), "rec.mjr");
    }

    #[test]
    fn test_append_after_close_does_no_io() {
        let (handle, probe) = probe_recorder("vp8", None);
        handle.close().unwrap();
        let err = handle.append(b"frame").unwrap_err();
        assert!(matches!(err, Error::NotWritable));
        assert_eq!(err.code(), -4);
        assert_eq!(probe.writes.load(Ordering::SeqCst), 0);
        assert!(!handle.is_writable());
    }

    #[test]
    fn test_invalid_payload() {
        let (handle, probe) = probe_recorder("text", None);
        assert_eq!(handle.append(&[]).unwrap_err().code(), -2);
        let big = vec![0u8; u16::MAX as usize];
        assert_eq!(handle.append(&big).unwrap_err().code(), -2);
        assert_eq!(probe.writes.load(Ordering::SeqCst), 0);
        assert!(handle.is_writable());
    }

    #[test]
    fn test_transport_error_abandons() {
        let (handle, probe) = probe_recorder("opus", Some("tmp"));
        handle.append(b"ok").unwrap();
        probe.fail_writes.store(true, Ordering::SeqCst);
        let err = handle.append(b"lost").unwrap_err();
        assert_eq!(err.code(), -5);
        assert!(err.is_stream_closed());
        assert!(!handle.is_writable());
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);

        probe.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(handle.append(b"again").unwrap_err().code(), -4);
        handle.close().unwrap();
        // abandoned recordings keep their working name
        assert_eq!(probe.renames.load(Ordering::SeqCst), 0);
        assert_eq!(handle.get().unwrap().file_name(), "rec.mjr.tmp");
        assert_eq!(probe.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abandon_survives_failed_shutdown() {
        let (handle, probe) = probe_recorder("vp8", None);
        probe.fail_writes.store(true, Ordering::SeqCst);
        probe.fail_shutdown.store(true, Ordering::SeqCst);
        assert_eq!(handle.append(b"lost").unwrap_err().code(), -5);
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
        assert_eq!(handle.append(b"again").unwrap_err().code(), -4);
        handle.close().unwrap();
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_releases_once() {
        let (handle, probe) = probe_recorder("g722", None);
        let holders: Vec<_> = (0..8).map(|_| handle.clone()).collect();
        handle.destroy();
        handle.destroy();
        assert!(handle.is_destroyed());
        assert!(matches!(handle.append(b"x"), Err(Error::Destroyed)));
        assert_eq!(handle.close().unwrap_err().code(), -1);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 0);

        thread::scope(|s| {
            for holder in &holders {
                s.spawn(move || {
                    holder.append(b"frame").unwrap();
                    holder.destroy();
                    holder.destroy();
                });
            }
        });
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
        assert!(holders.iter().all(RecorderHandle::is_destroyed));
    }

    #[test]
    fn test_clone_of_destroyed_handle() {
        let (handle, probe) = probe_recorder("pcmu", None);
        handle.destroy();
        let clone = handle.clone();
        assert!(clone.is_destroyed());
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let (handle, probe) = probe_recorder("h264", None);
        thread::scope(|s| {
            for i in 0..4u8 {
                let handle = handle.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        handle.append(&vec![i; 100 + i as usize]).unwrap();
                    }
                });
            }
        });
        let data = probe.data.lock().unwrap();
        let (_, lens) = frames(&data);
        assert_eq!(lens.len(), 200);
        let info_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        let mut rest = &data[2 + info_len..];
        while !rest.is_empty() {
            let len = u16::from_be_bytes([rest[8], rest[9]]) as usize;
            let payload = &rest[10..10 + len];
            let tag = payload[0];
            assert_eq!(len, 100 + tag as usize);
            assert!(payload.iter().all(|b| *b == tag));
            rest = &rest[10 + len..];
        }
    }

    #[test]
    fn test_concurrent_close_single_winner() {
        let (handle, probe) = probe_recorder("vp9", Some("tmp"));
        thread::scope(|s| {
            for _ in 0..8 {
                let handle = handle.clone();
                s.spawn(move || handle.close().unwrap());
            }
        });
        assert_eq!(probe.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(probe.renames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_codec() {
        let probe = Arc::new(Probe::default());
        let err = Recorder::with_sink(
            "mp3",
            Target::new(None, "rec", None),
            Box::new(ProbeSink(probe.clone())),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedCodec(_)));
        assert_eq!(probe.drops.load(Ordering::SeqCst), 1);
    }
}
