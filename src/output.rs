use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{ChildStderr, ChildStdout};

/// A readable view of a probe's output.
///
/// Output routing is mutually exclusive: in sink mode both stdout and stderr
/// of the probe are redirected into one caller-supplied file, and readers
/// hand back clones of that file handle. In pipe mode stdout and stderr are
/// two independent streams; fetching one transfers it to the caller, and a
/// restart installs a fresh pair.
pub enum OutputReader {
	Sink(tokio::fs::File),
	Stdout(ChildStdout),
	Stderr(ChildStderr),
}

impl AsyncRead for OutputReader {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		match self.get_mut() {
			OutputReader::Sink(file) => Pin::new(file).poll_read(cx, buf),
			OutputReader::Stdout(pipe) => Pin::new(pipe).poll_read(cx, buf),
			OutputReader::Stderr(pipe) => Pin::new(pipe).poll_read(cx, buf),
		}
	}
}
