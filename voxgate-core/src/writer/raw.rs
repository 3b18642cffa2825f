//! Headerless PCM passthrough.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::warn;

use super::{whole_frames, Writer, WriterKind};
use crate::audio::StreamSpec;
use crate::error::{Result, VoxError};

pub struct RawWriter {
    spec: StreamSpec,
    file: Option<BufWriter<File>>,
}

impl RawWriter {
    pub fn new(spec: StreamSpec) -> Self {
        Self { spec, file: None }
    }
}

impl Writer for RawWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Raw
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        self.file = Some(BufWriter::new(File::create(path)?));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Err(VoxError::not_open("raw"));
        };
        let frames = whole_frames(&self.spec, data);
        file.write_all(&data[..frames * self.spec.frame_bytes()])?;
        Ok(frames)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

impl Drop for RawWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("raw writer close on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;

    #[test]
    fn writes_whole_frames_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.raw");
        let mut writer = RawWriter::new(StreamSpec::new(SampleFormat::S16Le, 2, 8_000));

        writer.open(&path).unwrap();
        // Two stereo frames plus a dangling sample.
        let frames = writer.write(&[1, 0, 2, 0, 3, 0, 4, 0, 5, 0]).unwrap();
        assert_eq!(frames, 2);
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn close_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RawWriter::new(StreamSpec::new(SampleFormat::U8, 1, 8_000));
        writer.open(&dir.path().join("a.raw")).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());
    }

    #[test]
    fn write_after_close_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.raw");
        let mut writer = RawWriter::new(StreamSpec::new(SampleFormat::U8, 1, 8_000));
        writer.open(&path).unwrap();
        writer.write(&[1, 2]).unwrap();
        writer.close().unwrap();

        assert!(matches!(writer.write(&[3]), Err(VoxError::Encoder(_))));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2]);
    }

    #[test]
    fn reopen_closes_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.raw");
        let second = dir.path().join("second.raw");
        let mut writer = RawWriter::new(StreamSpec::new(SampleFormat::U8, 1, 8_000));

        writer.open(&first).unwrap();
        writer.write(&[7, 8, 9]).unwrap();
        writer.open(&second).unwrap();
        writer.write(&[1]).unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), vec![7, 8, 9]);
        assert_eq!(std::fs::read(&second).unwrap(), vec![1]);
    }
}
