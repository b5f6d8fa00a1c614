use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use liblzma::write::XzEncoder;
use std::io::{Error, Write};

/// Flushes trailing codec state and hands back the wrapped writer.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for GzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for BzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use std::io::{Cursor, Read};

    struct TestFinisher {
        inner: Cursor<Vec<u8>>,
        should_fail: bool,
    }

    impl Finish<Cursor<Vec<u8>>> for TestFinisher {
        fn finish(self) -> Result<Cursor<Vec<u8>>, Error> {
            if self.should_fail {
                Err(Error::other("Test failure"))
            } else {
                Ok(self.inner)
            }
        }
    }

    #[test]
    fn test_finish_trait_success() {
        let finisher = TestFinisher {
            inner: Cursor::new(vec![1, 2, 3]),
            should_fail: false,
        };

        let returned_cursor = finisher.finish().unwrap();
        assert_eq!(returned_cursor.get_ref(), &vec![1, 2, 3]);
    }

    #[test]
    fn test_finish_trait_failure() {
        let finisher = TestFinisher {
            inner: Cursor::new(vec![1, 2, 3]),
            should_fail: true,
        };

        let error = finisher.finish().unwrap_err();
        assert_eq!(error.to_string(), "Test failure");
    }

    #[test]
    fn test_xz_encoder_finish_impl() {
        let encoder = XzEncoder::new(Cursor::new(Vec::new()), 1);
        assert!(Finish::finish(encoder).is_ok());
    }

    #[test]
    fn test_gz_encoder_finish_writes_trailer() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(6));
        encoder.write_all(b"hello gzip").unwrap();
        let bytes = Finish::finish(encoder).unwrap();

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "hello gzip");
    }
}
