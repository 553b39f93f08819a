use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::config::ExchangeConfig;
use crate::error::Error;
use crate::runner::Pacer;

/// Blocking bulk transfers on an open device.
pub trait BulkChannel {
    fn send(&mut self, data: &[u8]) -> Result<usize, Error>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub exchanges: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub mismatches: u64,
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} exchanges ({} replies, {} timeouts, {} mismatches)",
            self.exchanges, self.replies, self.timeouts, self.mismatches
        )
    }
}

pub fn payload(message: &str, n: u64) -> Vec<u8> {
    format!("{} {}", message, n).into_bytes()
}

/// Writes one reply to the console: the text on one line, then the hex dump if asked.
pub fn print_reply<W: Write>(out: &mut W, reply: &[u8], hex: bool) -> Result<(), Error> {
    writeln!(out, "{}", String::from_utf8_lossy(reply))?;
    if hex {
        writeln!(out, "Hex: 0x{}", reply.iter().map(|b| format!("{:02x}", b)).collect::<String>())?;
    }
    Ok(())
}

/// Runs the write/read/print/pause cycle until `config.count` exchanges are done
/// or `running` is cleared. Any error other than a transfer timeout ends the session.
pub fn run_session<C, P, W>(
    channel: &mut C,
    config: &ExchangeConfig,
    pacer: &mut P,
    running: &AtomicBool,
    out: &mut W,
) -> Result<SessionReport, Error>
where
    C: BulkChannel,
    P: Pacer,
    W: Write,
{
    let mut report = SessionReport::default();
    let mut buffer = vec![0u8; config.read_size];

    for n in 0..config.count {
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let message = payload(&config.message, n);
        match channel.send(&message) {
            Ok(written) => debug!("sent {} bytes for exchange {}", written, n),
            Err(e) if e.is_timeout() => {
                warn!("{}", e);
                report.timeouts += 1;
            }
            Err(e) => return Err(e),
        }

        match channel.receive(&mut buffer) {
            Ok(len) => {
                let reply = &buffer[..len];
                print_reply(out, reply, config.hex)?;
                report.replies += 1;
                if config.verify_echo && reply != message.as_slice() {
                    warn!(
                        "reply {:?} does not echo {:?}",
                        String::from_utf8_lossy(reply),
                        String::from_utf8_lossy(&message)
                    );
                    report.mismatches += 1;
                }
            }
            Err(e) if e.is_timeout() => {
                warn!("no reply to exchange {}: {}", n, e);
                report.timeouts += 1;
            }
            Err(e) => return Err(e),
        }
        report.exchanges += 1;

        pacer.pause(config.interval);
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::runner::tests::RecordingPacer;

    /// Replies come from a script; an empty script echoes what was last sent.
    #[derive(Default)]
    pub struct ScriptedChannel {
        pub sent: Vec<Vec<u8>>,
        pub send_errors: VecDeque<Option<rusb::Error>>,
        pub replies: VecDeque<Result<Vec<u8>, rusb::Error>>,
    }

    impl ScriptedChannel {
        pub fn echo() -> Self {
            ScriptedChannel::default()
        }

        pub fn with_replies(replies: Vec<Result<Vec<u8>, rusb::Error>>) -> Self {
            ScriptedChannel { replies: replies.into(), ..Default::default() }
        }
    }

    impl BulkChannel for ScriptedChannel {
        fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
            if let Some(Some(source)) = self.send_errors.pop_front() {
                return Err(Error::Write { endpoint: 0x01, source });
            }
            self.sent.push(data.to_vec());
            Ok(data.len())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            let reply = match self.replies.pop_front() {
                Some(Ok(reply)) => reply,
                Some(Err(source)) => return Err(Error::Read { endpoint: 0x81, source }),
                None => self.sent.last().cloned().unwrap_or_default(),
            };
            let len = reply.len().min(buf.len());
            buf[..len].copy_from_slice(&reply[..len]);
            Ok(len)
        }
    }

    fn config(count: u64) -> ExchangeConfig {
        ExchangeConfig { count, ..ExchangeConfig::default() }
    }

    fn lines(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec()).unwrap().lines().map(String::from).collect()
    }

    #[test]
    fn test_payload_format() {
        assert_eq!(payload("test", 0), b"test 0".to_vec());
        assert_eq!(payload("test", 41), b"test 41".to_vec());
        assert_eq!(payload("ping", 7), b"ping 7".to_vec());
    }

    #[test]
    fn test_counter_increases_within_session() {
        let mut channel = ScriptedChannel::echo();
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        let report = run_session(&mut channel, &config(4), &mut pacer, &running, &mut out).unwrap();

        assert_eq!(report.exchanges, 4);
        assert_eq!(report.replies, 4);
        assert_eq!(
            channel.sent,
            vec![b"test 0".to_vec(), b"test 1".to_vec(), b"test 2".to_vec(), b"test 3".to_vec()]
        );
        assert_eq!(lines(&out), vec!["test 0", "test 1", "test 2", "test 3"]);
        assert_eq!(pacer.pauses, vec![Duration::from_secs(1); 4]);
    }

    #[test]
    fn test_read_error_ends_session() {
        let mut channel = ScriptedChannel::with_replies(vec![Ok(b"test 0".to_vec()), Err(rusb::Error::NoDevice)]);
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        let err = run_session(&mut channel, &config(10), &mut pacer, &running, &mut out).unwrap_err();

        assert!(matches!(err, Error::Read { source: rusb::Error::NoDevice, .. }));
        assert!(!err.is_fatal());
        assert_eq!(channel.sent.len(), 2);
        assert_eq!(lines(&out), vec!["test 0"]);
    }

    #[test]
    fn test_write_error_ends_session() {
        let mut channel = ScriptedChannel::echo();
        channel.send_errors = vec![None, Some(rusb::Error::Pipe)].into();
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        let err = run_session(&mut channel, &config(10), &mut pacer, &running, &mut out).unwrap_err();
        assert!(matches!(err, Error::Write { source: rusb::Error::Pipe, .. }));
        assert_eq!(pacer.pauses.len(), 1);
    }

    #[test]
    fn test_timeouts_keep_session_alive() {
        let mut channel = ScriptedChannel::with_replies(vec![Err(rusb::Error::Timeout), Ok(b"late".to_vec())]);
        channel.send_errors = vec![None, None, Some(rusb::Error::Timeout)].into();
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        let report = run_session(&mut channel, &config(3), &mut pacer, &running, &mut out).unwrap();

        assert_eq!(report.exchanges, 3);
        assert_eq!(report.timeouts, 2);
        assert_eq!(report.replies, 2);
        // the third write timed out, so the echo is of "test 1"
        assert_eq!(lines(&out), vec!["late", "test 1"]);
    }

    #[test]
    fn test_verify_echo_counts_mismatches() {
        let mut channel = ScriptedChannel::with_replies(vec![Ok(b"test 0".to_vec()), Ok(b"garbage".to_vec())]);
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(true);
        let mut out = Vec::new();
        let config = ExchangeConfig { count: 3, verify_echo: true, ..ExchangeConfig::default() };

        let report = run_session(&mut channel, &config, &mut pacer, &running, &mut out).unwrap();
        assert_eq!(report.mismatches, 1);
        assert_eq!(report.replies, 3);
    }

    #[test]
    fn test_reply_truncated_to_read_size() {
        let mut channel = ScriptedChannel::with_replies(vec![Ok(b"0123456789".to_vec())]);
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(true);
        let mut out = Vec::new();
        let config = ExchangeConfig { count: 1, read_size: 4, ..ExchangeConfig::default() };

        run_session(&mut channel, &config, &mut pacer, &running, &mut out).unwrap();
        assert_eq!(lines(&out), vec!["0123"]);
    }

    #[test]
    fn test_stops_when_not_running() {
        let mut channel = ScriptedChannel::echo();
        let mut pacer = RecordingPacer::default();
        let running = AtomicBool::new(false);
        let mut out = Vec::new();

        let report = run_session(&mut channel, &config(5), &mut pacer, &running, &mut out).unwrap();
        assert_eq!(report, SessionReport::default());
        assert!(channel.sent.is_empty());
    }

    #[test]
    fn test_report_summary() {
        let report = SessionReport { exchanges: 5, replies: 4, timeouts: 1, mismatches: 2 };
        assert_eq!(report.to_string(), "5 exchanges (4 replies, 1 timeouts, 2 mismatches)");
    }

    #[test]
    fn test_print_reply_hex() {
        let mut out = Vec::new();
        print_reply(&mut out, b"ok\xff", true).unwrap();
        assert_eq!(lines(&out), vec!["ok\u{fffd}", "Hex: 0x6f6bff"]);
    }
}
