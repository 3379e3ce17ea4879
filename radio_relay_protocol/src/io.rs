// Read adapter that turns socket receive timeouts into liveness checks.
//
// Both the hub sessions and the agent transports read with a short socket
// timeout so their receive threads can notice a cleared liveness flag. A
// timeout that lands in the middle of a packet must not lose the bytes that
// were already consumed, so the retry happens below the codec: `RetryOnTimeout`
// keeps re-issuing the read while `keep_going()` returns true, and only gives
// up (with `ConnectionAborted`) once it returns false.

use std::io::{self, Read};

use crate::error::is_timeout;

pub struct RetryOnTimeout<R, F> {
    inner: R,
    keep_going: F,
}

impl<R, F> RetryOnTimeout<R, F>
where
    R: Read,
    F: Fn() -> bool,
{
    pub fn new(inner: R, keep_going: F) -> Self {
        Self { inner, keep_going }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R, F> Read for RetryOnTimeout<R, F>
where
    R: Read,
    F: Fn() -> bool,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => {
                    if !(self.keep_going)() {
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "reader stopped",
                        ));
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Reader that times out a fixed number of times before yielding data.
    struct Flaky {
        timeouts_left: usize,
        data: &'static [u8],
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.timeouts_left > 0 {
                self.timeouts_left -= 1;
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn retries_timeouts_while_alive() {
        let flaky = Flaky {
            timeouts_left: 3,
            data: b"abcd",
        };
        let mut reader = RetryOnTimeout::new(flaky, || true);
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn gives_up_once_stopped() {
        let checks = Cell::new(0);
        let flaky = Flaky {
            timeouts_left: 100,
            data: b"",
        };
        let mut reader = RetryOnTimeout::new(flaky, || {
            checks.set(checks.get() + 1);
            checks.get() < 2
        });
        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(checks.get(), 2);
    }
}
