use crate::error::{Error, Result};
use std::path::PathBuf;

/// Which side of the exchange this process plays. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connects to the responder and sends the first half-round.
    Initiator,
    /// Listens, pre-posts the first receive, and answers each half-round.
    Responder,
}

/// Immutable session configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Peer address; absent means this process is the responder.
    pub peer: Option<String>,
    pub port: u16,
    /// Transfer buffer size in bytes.
    pub size: usize,
    /// Number of full ping-pong rounds (two half-rounds each).
    pub rounds: usize,
    /// Spin on the buffer contents before polling the completion queue.
    pub busy_poll: bool,
    /// Overwrite the outgoing buffer with a per-half-round pattern byte.
    pub pattern_fill: bool,
    /// Shadow transferred data into the device mapping around completions.
    pub mirror_copy: bool,
    /// Use the device mapping itself as the transfer buffer.
    pub device_buffer: bool,
    /// Memory-mappable device resource backing the two modes above.
    pub device: Option<PathBuf>,
}

impl Config {
    pub fn role(&self) -> Role {
        if self.peer.is_some() {
            Role::Initiator
        } else {
            Role::Responder
        }
    }

    /// Total payload moved by a complete run.
    pub fn total_bytes(&self) -> usize {
        self.rounds * self.size * 2
    }

    /// Rejects contradictory option combinations before any resource is
    /// acquired.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::Argument("buffer size must be at least 1 byte".into()));
        }
        if self.rounds == 0 {
            return Err(Error::Argument("round count must be at least 1".into()));
        }
        if self.mirror_copy && self.device_buffer {
            return Err(Error::Argument(
                "--mirror-copy and --device-buffer are mutually exclusive".into(),
            ));
        }
        if (self.mirror_copy || self.device_buffer) && self.device.is_none() {
            return Err(Error::Argument(
                "--mirror-copy and --device-buffer require --device <PATH>".into(),
            ));
        }
        if self.device.is_some() && !(self.mirror_copy || self.device_buffer) {
            return Err(Error::Argument(
                "--device is only meaningful with --mirror-copy or --device-buffer".into(),
            ));
        }
        if self.busy_poll && !self.pattern_fill {
            return Err(Error::Argument(
                "--busy-poll spins on the fill pattern and requires --pattern-fill".into(),
            ));
        }
        Ok(())
    }
}

/// Parses a byte count with an optional binary suffix: `4096`, `4k`, `2M`, `1G`.
pub fn parse_size(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, 'k')) | Some((i, 'K')) => (&s[..i], 10),
        Some((i, 'm')) | Some((i, 'M')) => (&s[..i], 20),
        Some((i, 'g')) | Some((i, 'G')) => (&s[..i], 30),
        _ => (s, 0),
    };
    let n: usize = digits
        .parse()
        .map_err(|_| format!("invalid byte count: {s:?}"))?;
    n.checked_shl(shift)
        .filter(|v| v >> shift == n)
        .ok_or_else(|| format!("byte count overflows: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            peer: None,
            port: 12345,
            size: 16,
            rounds: 16,
            busy_poll: false,
            pattern_fill: false,
            mirror_copy: false,
            device_buffer: false,
            device: None,
        }
    }

    #[test]
    fn role_follows_peer_argument() {
        assert_eq!(base().role(), Role::Responder);
        let cfg = Config {
            peer: Some("10.0.0.1".into()),
            ..base()
        };
        assert_eq!(cfg.role(), Role::Initiator);
    }

    #[test]
    fn mirror_and_device_buffer_are_mutually_exclusive() {
        let cfg = Config {
            mirror_copy: true,
            device_buffer: true,
            device: Some("/dev/mem0".into()),
            ..base()
        };
        assert!(matches!(cfg.validate(), Err(Error::Argument(_))));
    }

    #[test]
    fn device_modes_require_a_device_path() {
        for device_buffer in [false, true] {
            let cfg = Config {
                mirror_copy: !device_buffer,
                device_buffer,
                ..base()
            };
            assert!(matches!(cfg.validate(), Err(Error::Argument(_))));
        }
    }

    #[test]
    fn device_path_alone_is_rejected() {
        let cfg = Config {
            device: Some("/dev/mem0".into()),
            ..base()
        };
        assert!(matches!(cfg.validate(), Err(Error::Argument(_))));
    }

    #[test]
    fn busy_poll_requires_pattern_fill() {
        let cfg = Config {
            busy_poll: true,
            ..base()
        };
        assert!(matches!(cfg.validate(), Err(Error::Argument(_))));
        let cfg = Config {
            busy_poll: true,
            pattern_fill: true,
            ..base()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_size_or_rounds_is_rejected() {
        assert!(Config { size: 0, ..base() }.validate().is_err());
        assert!(Config { rounds: 0, ..base() }.validate().is_err());
    }

    #[test]
    fn total_bytes_counts_both_directions() {
        let cfg = Config {
            size: 4096,
            rounds: 8,
            ..base()
        };
        assert_eq!(cfg.total_bytes(), 65536);
    }

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(parse_size("16"), Ok(16));
        assert_eq!(parse_size("4k"), Ok(4096));
        assert_eq!(parse_size("4K"), Ok(4096));
        assert_eq!(parse_size("2M"), Ok(2 << 20));
        assert_eq!(parse_size("1G"), Ok(1 << 30));
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
        assert!(parse_size("12x").is_err());
    }
}
