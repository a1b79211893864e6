//! End-to-end runs over the loopback channel pair, plus the failure paths
//! that need no RDMA device.

use pingpong::config::Config;
use pingpong::error::{Error, SetupStage};
use pingpong::memory::Buffer;
use pingpong::rdma::Connection;
use pingpong::transfer::{self, Channel};
use pingpong::loopback;
use std::io::Write;
use std::thread;

fn config(size: usize, rounds: usize, peer: Option<&str>) -> Config {
    Config {
        peer: peer.map(str::to_owned),
        port: 12345,
        size,
        rounds,
        busy_poll: false,
        pattern_fill: false,
        mirror_copy: false,
        device_buffer: false,
        device: None,
    }
}

#[test]
fn eight_rounds_of_4k_record_sixteen_samples_on_each_end() {
    let size = 4096;
    let rounds = 8;
    let (initiator, mut responder) = loopback::pair(size).unwrap();
    // The responder arms its first receive at connection setup.
    responder.post_recv().unwrap();

    let cfg_r = config(size, rounds, None);
    let cfg_i = config(size, rounds, Some("loopback"));

    let responder = thread::spawn(move || transfer::run(responder, &cfg_r, None));
    let log_i = transfer::run(initiator, &cfg_i, None).unwrap();
    let log_r = responder.join().unwrap().unwrap();

    for log in [&log_i, &log_r] {
        assert_eq!(log.len(), 16);
        assert!(log.stamps().windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(log.summary(size).bytes, 65536);
    }
}

#[test]
fn device_backed_buffers_carry_the_transfer() {
    let size = 4096;
    let rounds = 4;

    let mut backing_i = tempfile::NamedTempFile::new().unwrap();
    let mut backing_r = tempfile::NamedTempFile::new().unwrap();
    backing_i.write_all(&vec![0u8; size]).unwrap();
    backing_r.write_all(&vec![0u8; size]).unwrap();

    let buf_i = Buffer::device(backing_i.path(), size).unwrap();
    let buf_r = Buffer::device(backing_r.path(), size).unwrap();
    let (initiator, mut responder) = loopback::pair_with(buf_i, buf_r).unwrap();
    responder.post_recv().unwrap();

    let mut cfg_r = config(size, rounds, None);
    cfg_r.pattern_fill = true;
    let mut cfg_i = config(size, rounds, Some("loopback"));
    cfg_i.pattern_fill = true;

    let responder = thread::spawn(move || transfer::run(responder, &cfg_r, None));
    let log = transfer::run(initiator, &cfg_i, None).unwrap();
    responder.join().unwrap().unwrap();
    assert_eq!(log.summary(size).bytes, size * rounds * 2);

    // Shared mappings: the last half-round's pattern is visible in the
    // backing files once the buffers are dropped.
    let last_pattern = (rounds * 2) as u8;
    let contents = std::fs::read(backing_i.path()).unwrap();
    assert!(contents.iter().all(|b| *b == last_pattern));
    let contents = std::fs::read(backing_r.path()).unwrap();
    assert!(contents.iter().all(|b| *b == last_pattern));
}

#[test]
fn unresolvable_peer_fails_at_address_resolution() {
    let cfg = config(16, 16, Some("pingpong-test.invalid"));
    let buffer = Buffer::anonymous(cfg.size).unwrap();

    // Resolution fails before any buffer registration; the buffer is simply
    // dropped again, with no samples ever recorded.
    match Connection::establish(&cfg, buffer) {
        Err(err @ Error::Connection { stage, .. }) => {
            assert_eq!(stage, SetupStage::Resolve);
            assert_eq!(err.exit_code(), 4);
        }
        Err(other) => panic!("unexpected error class: {other}"),
        Ok(_) => panic!("resolution of a .invalid name cannot succeed"),
    }
}

#[test]
fn mode_validation_runs_before_any_setup() {
    let mut cfg = config(16, 16, None);
    cfg.mirror_copy = true;
    cfg.device_buffer = true;
    cfg.device = Some("/dev/mem0".into());
    assert!(matches!(cfg.validate(), Err(Error::Argument(_))));
}
