use std::time::Duration;

use proptest::prelude::*;
use wavekeeper_core::{
    Command, Event, Placement, ResourceHandle, ResourceId, ResourceState, RoundConfig, RunPlan,
    SessionTuning,
};
use wavekeeper_session::{self as session, query, Session};

#[derive(Clone, Debug)]
enum Step {
    Tick(u64),
    Clear(u32),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0_u64..4_000).prop_map(Step::Tick),
        (0_u32..6).prop_map(Step::Clear),
    ]
}

fn round() -> impl Strategy<Value = RoundConfig> {
    (0_u32..4, 0_u32..6, 1_u32..4).prop_map(|(resources, agents, speed)| {
        RoundConfig::new(resources, agents, speed as f32)
    })
}

/// Answers resource requests and timetables the way the reference systems would.
fn respond(session: &mut Session, events: Vec<Event>, next_resource: &mut u32) {
    let mut pending = events;
    while !pending.is_empty() {
        let mut commands = Vec::new();
        for event in &pending {
            match event {
                Event::ResourcesRequested { round, count, .. } => {
                    let resources = (0..*count)
                        .map(|offset| {
                            let id = *next_resource + offset;
                            ResourceHandle::new(ResourceId::new(id), Placement::new(id, 0))
                        })
                        .collect();
                    *next_resource += count;
                    commands.push(Command::ProvideResources {
                        round: *round,
                        resources,
                    });
                }
                Event::ResourcesReady { round, agents, .. } => {
                    commands.push(Command::ScheduleSpawns {
                        round: *round,
                        offsets: (0..u64::from(*agents))
                            .map(|index| Duration::from_millis(index * 700))
                            .collect(),
                    });
                }
                _ => {}
            }
        }
        pending = Vec::new();
        for command in commands {
            session::apply(session, command, &mut pending);
        }
    }
}

fn check_invariants(session: &Session) -> Result<(), TestCaseError> {
    for resource in query::resource_view(session) {
        prop_assert!(
            resource.occupants.len() <= 1,
            "resource {:?} has {} occupants",
            resource.id,
            resource.occupants.len()
        );
        if !resource.occupants.is_empty() {
            prop_assert_eq!(resource.state, ResourceState::Reserved);
        }
    }

    let counters = query::counters(session);
    prop_assert_eq!(
        counters.resources_remaining + counters.resources_destroyed,
        query::resource_capacity(session)
    );
    Ok(())
}

proptest! {
    #[test]
    fn assignment_stays_exclusive_and_resources_are_conserved(
        rounds in proptest::collection::vec(round(), 1..4),
        steps in proptest::collection::vec(step(), 1..80),
        seed in any::<u64>(),
    ) {
        let tuning = SessionTuning {
            seed,
            ..SessionTuning::default()
        };
        let mut session = Session::new();
        let mut next_resource = 0;
        let mut events = Vec::new();
        session::apply(
            &mut session,
            Command::StartRun { plan: RunPlan::new(rounds, tuning) },
            &mut events,
        );
        respond(&mut session, events, &mut next_resource);
        check_invariants(&session)?;

        for step in steps {
            let command = match step {
                Step::Tick(millis) => Command::Tick { dt: Duration::from_millis(millis) },
                Step::Clear(id) => Command::ClearResource { resource: ResourceId::new(id) },
            };
            let mut events = Vec::new();
            session::apply(&mut session, command, &mut events);
            respond(&mut session, events, &mut next_resource);
            check_invariants(&session)?;
        }
    }

    #[test]
    fn paused_deadline_fires_exactly_remaining_after_resume(
        wait_ms in 0_u64..30_000,
        base_secs in 1_u64..20,
    ) {
        let tuning = SessionTuning {
            base_deadline: Duration::from_secs(base_secs),
            spawn_window: Duration::from_secs(60),
            ..SessionTuning::default()
        };
        let mut session = Session::new();
        let mut events = Vec::new();
        session::apply(
            &mut session,
            Command::StartRun {
                plan: RunPlan::new(vec![RoundConfig::new(1, 2, 1.0)], tuning),
            },
            &mut events,
        );
        let round = query::round_index(&session).expect("round started");
        let resource = ResourceId::new(0);
        for command in [
            Command::ProvideResources {
                round,
                resources: vec![ResourceHandle::new(resource, Placement::new(0, 0))],
            },
            Command::ScheduleSpawns { round, offsets: vec![Duration::ZERO, Duration::ZERO] },
            Command::Tick { dt: Duration::ZERO },
            Command::Tick { dt: Duration::from_millis(wait_ms.min(base_secs * 1_000 - 1)) },
            Command::ClearResource { resource },
        ] {
            session::apply(&mut session, command, &mut events);
        }

        let resumed = events.iter().rev().find_map(|event| match event {
            Event::AgentAssigned { remaining, .. } => Some(*remaining),
            _ => None,
        });
        prop_assert_eq!(resumed, Some(Duration::from_secs(base_secs)));

        events.clear();
        let remaining = Duration::from_secs(base_secs);
        session::apply(
            &mut session,
            Command::Tick { dt: remaining - Duration::from_millis(1) },
            &mut events,
        );
        let expired_early = events.iter().any(|event| matches!(event, Event::AgentExpired { .. }));
        prop_assert!(!expired_early);
        session::apply(
            &mut session,
            Command::Tick { dt: Duration::from_millis(1) },
            &mut events,
        );
        let expired = events.iter().any(|event| matches!(event, Event::AgentExpired { .. }));
        prop_assert!(expired);
    }
}
