//! End-to-end rounds over loopback TCP.
//!
//! Each test assembles a real cluster: participant threads dial a coordinator
//! on a test-specific port and full rounds run through the actual sockets,
//! framing and worker pool. Participants linger briefly after their last
//! round so the coordinator classifies before the sockets close.

use std::net::IpAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use commitwire::channel::{drive_write, Channel};
use commitwire::config::{Config, CoordinatorConfig, ParticipantConfig};
use commitwire::coordinator::{Coordinator, RoundOutcome};
use commitwire::participant::{AlwaysNo, AlwaysYes, Decision, Participant, VotePolicy};
use commitwire::protocol::{Message, MsgKind, WIRE_SIZE};
use commitwire::transport::{Transport, TransportKind};

fn localhost() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn base_config(port: u16) -> Config {
    let mut cfg = Config::default();
    cfg.port = port;
    cfg.round_timeout = Duration::from_millis(500);
    cfg
}

fn transport_for(cfg: &Config) -> Transport {
    Transport::new(TransportKind::Stream, cfg.effective_msg_size(), cfg.rto)
}

fn coordinator_on(port: u16, participants: usize, workers: usize) -> Coordinator {
    let base = base_config(port);
    let transport = transport_for(&base);
    let cfg = CoordinatorConfig {
        base,
        participants,
        workers,
        bind: localhost(),
        rounds: None,
        stats_path: std::env::temp_dir().join(format!("commitwire-test-{}.stats", port)),
    };
    Coordinator::new(cfg, &transport).unwrap()
}

/// Run `rounds` rounds on a participant thread, then linger so the
/// coordinator finishes classifying before the socket closes.
fn spawn_participant<P>(port: u16, id: i16, policy: P, rounds: u64) -> JoinHandle<Vec<Decision>>
where
    P: VotePolicy + 'static,
{
    thread::spawn(move || {
        let cfg = ParticipantConfig {
            base: base_config(port),
            id,
            server: localhost(),
        };
        let transport = transport_for(&cfg.base);
        let mut participant = Participant::connect(cfg, &transport, policy).unwrap();
        let decisions: Vec<Decision> = (0..rounds)
            .map(|_| participant.run_round().unwrap())
            .collect();
        thread::sleep(Duration::from_millis(500));
        decisions
    })
}

#[test]
fn test_unanimous_round_commits() {
    let port = 7410;
    let handles: Vec<_> = (1..=3)
        .map(|id| spawn_participant(port, id, AlwaysYes, 1))
        .collect();

    let mut coordinator = coordinator_on(port, 3, 2);
    assert_eq!(
        coordinator.run_round().unwrap(),
        RoundOutcome::CommitSucceeded
    );

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![Decision::Committed]);
    }
    coordinator.shutdown().unwrap();
}

#[test]
fn test_single_dissent_cancels_for_everyone() {
    let port = 7420;
    let mut handles = vec![
        spawn_participant(port, 1, AlwaysYes, 1),
        spawn_participant(port, 2, AlwaysNo, 1),
    ];
    handles.push(spawn_participant(port, 3, AlwaysYes, 1));

    let mut coordinator = coordinator_on(port, 3, 2);
    assert_eq!(coordinator.run_round().unwrap(), RoundOutcome::CommitFailed);

    // The cancel reaches the yes voters too.
    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![Decision::Aborted]);
    }
    coordinator.shutdown().unwrap();
}

#[test]
fn test_silent_participant_fails_the_cluster() {
    let port = 7430;

    // Two participants play along; their decision wait will time out since
    // the round never reaches phase two.
    let voters: Vec<_> = (1..=2)
        .map(|id| {
            thread::spawn(move || {
                let cfg = ParticipantConfig {
                    base: base_config(port),
                    id,
                    server: localhost(),
                };
                let transport = transport_for(&cfg.base);
                let mut participant =
                    Participant::connect(cfg, &transport, AlwaysYes).unwrap();
                let _ = participant.run_round();
                thread::sleep(Duration::from_millis(500));
            })
        })
        .collect();

    // The third announces itself and then never answers anything.
    let silent = thread::spawn(move || {
        let base = base_config(port);
        let transport = transport_for(&base);
        let mut ch = loop {
            match transport.client(localhost(), port, 3) {
                Ok(ch) => break ch,
                Err(_) => thread::sleep(Duration::from_millis(20)),
            }
        };
        let len = base.effective_msg_size();
        let hello = Message::new(MsgKind::Connect, 3);
        let buf = ch.begin_write();
        hello.encode_into(buf);
        buf[WIRE_SIZE..len].fill(0);
        drive_write(&mut ch, len, u64::MAX, -1).unwrap();
        thread::sleep(Duration::from_secs(2));
    });

    let mut coordinator = coordinator_on(port, 3, 2);
    assert_eq!(coordinator.run_round().unwrap(), RoundOutcome::ClusterFailed);

    for handle in voters {
        handle.join().unwrap();
    }
    silent.join().unwrap();
    coordinator.shutdown().unwrap();
}

#[test]
fn test_many_rounds_and_stats_collection() {
    let port = 7440;
    let rounds = 5u64;
    let handles: Vec<_> = (1..=3)
        .map(|id| spawn_participant(port, id, AlwaysYes, rounds))
        .collect();

    let mut coordinator = coordinator_on(port, 3, 2);
    for _ in 0..rounds {
        assert_eq!(
            coordinator.run_round().unwrap(),
            RoundOutcome::CommitSucceeded
        );
    }

    for handle in handles {
        let decisions = handle.join().unwrap();
        assert_eq!(decisions, vec![Decision::Committed; rounds as usize]);
    }

    // Two responses per participant per round: one vote, one ack.
    let buffers = coordinator.shutdown().unwrap();
    let samples: usize = buffers.iter().map(|b| b.len()).sum();
    assert_eq!(samples, (rounds as usize) * 3 * 2);
}
