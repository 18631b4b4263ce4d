use std::io::{self, Write};
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogOutput, MainConfig};

const SYSLOG_SOCKET: &str = "/dev/log";
const SYSLOG_TAG: &str = "logs_agent";
// daemon.info
const SYSLOG_PRI: u8 = 30;

/// Install the process-wide subscriber according to `[main]`.
pub fn init(cfg: &MainConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::new(cfg.log_level.as_directive());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cfg.log_output {
        LogOutput::Stdout => builder.with_writer(io::stdout).init(),
        LogOutput::Stderr => builder.with_writer(io::stderr).init(),
        LogOutput::Null => builder.with_writer(io::sink).init(),
        LogOutput::Syslog => {
            let writer = SyslogWriter::connect(SYSLOG_SOCKET)
                .context("unable to connect to local syslog daemon")?;
            builder
                .with_ansi(false)
                .without_time()
                .with_writer(writer)
                .init();
        }
    }
    Ok(())
}

/// Sends each formatted line as one `<PRI>tag: line` datagram to the local
/// syslog socket.
#[derive(Clone)]
pub struct SyslogWriter {
    socket: Arc<UnixDatagram>,
}

impl SyslogWriter {
    fn connect(path: &str) -> io::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(SyslogWriter {
            socket: Arc::new(socket),
        })
    }
}

impl Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let line = line.trim_end();
        if !line.is_empty() {
            let frame = format!("<{}>{}: {}", SYSLOG_PRI, SYSLOG_TAG, line);
            self.socket.send(frame.as_bytes())?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
