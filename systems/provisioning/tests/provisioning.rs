use std::{collections::BTreeSet, time::Duration};

use wavekeeper_core::{
    Command, Event, Placement, ResetReason, RoundConfig, RoundIndex, RoundPhase, RunPlan,
};
use wavekeeper_session::{self as session, query, Session};
use wavekeeper_system_provisioning::{Config, Provisioning};

fn placements(count: u32) -> Vec<Placement> {
    (0..count).map(|column| Placement::new(column, 3)).collect()
}

fn requested(round: u32, count: u32) -> Event {
    Event::ResourcesRequested {
        round: RoundIndex::new(round),
        count,
        speed: 1.0,
    }
}

fn tick(millis: u64) -> Event {
    Event::TimeAdvanced {
        dt: Duration::from_millis(millis),
    }
}

#[test]
fn batch_waits_for_the_slowest_resource() {
    let config = Config::new(placements(4), Duration::from_millis(300), 0x51)
        .with_jitter(Duration::from_millis(200));
    let mut provisioning = Provisioning::new(config);
    let mut commands = Vec::new();

    provisioning.handle(&[requested(0, 3)], &mut commands);
    provisioning.handle(&[tick(299)], &mut commands);
    assert!(commands.is_empty(), "batch answered before readiness");

    provisioning.handle(&[tick(201)], &mut commands);
    assert_eq!(commands.len(), 1);
    let Command::ProvideResources { round, resources } = &commands[0] else {
        panic!("unexpected command emitted: {:?}", commands[0]);
    };
    assert_eq!(*round, RoundIndex::new(0));
    assert_eq!(resources.len(), 3);

    let distinct: BTreeSet<Placement> = resources.iter().map(|handle| handle.placement).collect();
    assert_eq!(distinct.len(), 3, "resources share a placement");
}

#[test]
fn requests_beyond_placements_produce_partial_batches() {
    let mut provisioning = Provisioning::new(Config::new(placements(2), Duration::ZERO, 1));
    let mut commands = Vec::new();
    provisioning.handle(&[requested(0, 5)], &mut commands);

    let Command::ProvideResources { resources, .. } = &commands[0] else {
        panic!("unexpected command emitted: {:?}", commands[0]);
    };
    assert_eq!(resources.len(), 2);
}

#[test]
fn factory_without_placements_answers_with_empty_batch() {
    let mut provisioning = Provisioning::new(Config::new(Vec::new(), Duration::ZERO, 1));
    let mut commands = Vec::new();
    provisioning.handle(&[requested(0, 3)], &mut commands);

    assert_eq!(
        commands,
        vec![Command::ProvideResources {
            round: RoundIndex::new(0),
            resources: Vec::new(),
        }]
    );
}

#[test]
fn resource_ids_keep_increasing_across_batches() {
    let mut provisioning = Provisioning::new(Config::new(placements(3), Duration::ZERO, 9));
    let mut commands = Vec::new();
    provisioning.handle(&[requested(0, 3), requested(1, 3)], &mut commands);

    let ids: Vec<u32> = commands
        .iter()
        .flat_map(|command| match command {
            Command::ProvideResources { resources, .. } => resources.clone(),
            _ => Vec::new(),
        })
        .map(|handle| handle.id.get())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn reset_drops_pending_batches() {
    let mut provisioning =
        Provisioning::new(Config::new(placements(2), Duration::from_secs(1), 2));
    let mut commands = Vec::new();
    provisioning.handle(&[requested(0, 2)], &mut commands);
    assert_eq!(provisioning.pending_batches(), 1);

    provisioning.handle(
        &[Event::RunReset {
            reason: ResetReason::RoundTimedOut,
        }],
        &mut commands,
    );
    provisioning.handle(&[tick(5_000)], &mut commands);

    assert_eq!(provisioning.pending_batches(), 0);
    assert!(commands.is_empty());
}

#[test]
fn session_leaves_awaiting_once_batch_is_ready() {
    let mut provisioning =
        Provisioning::new(Config::new(placements(3), Duration::from_millis(400), 4));
    let mut session = Session::new();
    let mut events = Vec::new();
    session::apply(
        &mut session,
        Command::StartRun {
            plan: RunPlan::new(vec![RoundConfig::new(2, 2, 1.0)], Default::default()),
        },
        &mut events,
    );

    for _ in 0..4 {
        let mut commands = Vec::new();
        provisioning.handle(&events, &mut commands);
        events.clear();
        for command in commands {
            session::apply(&mut session, command, &mut events);
        }
        assert_eq!(query::round_phase(&session), RoundPhase::AwaitingResources);
        session::apply(
            &mut session,
            Command::Tick {
                dt: Duration::from_millis(100),
            },
            &mut events,
        );
    }

    let mut commands = Vec::new();
    provisioning.handle(&events, &mut commands);
    for command in commands {
        session::apply(&mut session, command, &mut events);
    }
    assert_eq!(query::round_phase(&session), RoundPhase::Spawning);
    assert_eq!(query::resource_capacity(&session), 2);
}
